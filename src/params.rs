//! Measurement points and the analog front-end parameters used to convert
//! their raw readings into physical units.

use crate::{Error, Result};

/// One of the four shunt-resistor channels of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementPoint {
    #[default]
    One,
    Two,
    Three,
    /// Point four measures the monitor's own supply.
    Four,
}

impl MeasurementPoint {
    pub fn from_number(number: u8) -> Result<MeasurementPoint> {
        match number {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            4 => Ok(Self::Four),
            _ => Err(Error::Invalid(format!("no measurement point {}", number))),
        }
    }

    pub(crate) fn number(self) -> u16 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
        }
    }

    pub(crate) fn index(self) -> usize {
        self.number() as usize - 1
    }
}

impl std::fmt::Display for MeasurementPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// One of the three ADCs points can be mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adc {
    Adc1,
    Adc2,
    Adc3,
}

impl Adc {
    pub(crate) const ALL: [Adc; 3] = [Adc::Adc1, Adc::Adc2, Adc::Adc3];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Adc1 => 0,
            Self::Adc2 => 1,
            Self::Adc3 => 2,
        }
    }
}

/// Front-end description of a single measurement point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointParameters {
    /// Shunt resistor value, ohms.
    pub resistor: f64,
    /// Current amplifier gain.
    pub gain: f64,
    /// ADC reference voltage, volts.
    pub vref: f64,
}

impl Default for PointParameters {
    fn default() -> Self {
        PointParameters { resistor: 1.0, gain: 50.0, vref: 3.0 }
    }
}

/// Front-end description of the whole board, indexable by point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceParameters {
    pub points: [PointParameters; 4],
}

impl Default for DeviceParameters {
    fn default() -> Self {
        // The self-measurement point has a smaller shunt than the three
        // external ones.
        let mut points = [PointParameters::default(); 4];
        points[MeasurementPoint::Four.index()].resistor = 0.5;
        DeviceParameters { points }
    }
}

impl DeviceParameters {
    pub fn point(&self, point: MeasurementPoint) -> &PointParameters {
        &self.points[point.index()]
    }

    pub fn point_mut(&mut self, point: MeasurementPoint) -> &mut PointParameters {
        &mut self.points[point.index()]
    }
}
