//! Raw measurement records as the board reports them, and their conversion
//! into physical units.

use bytemuck::{Pod, Zeroable};

use crate::params::PointParameters;
use crate::proto;

/// Core clock of the board, Hz.
const CORE_CLOCK_HZ: f64 = 168_000_000.0;
/// Full scale of the 12-bit ADCs.
const ADC_COUNTS: f64 = 4096.0;
/// Sampling period, in core clock ticks.
const SAMPLE_PERIOD_TICKS: f64 = 500.0;

// Timestamps and accumulators count two-tick units of a half-rate clock, and
// the voltage inputs sit behind a half-scale divider; hence the factors of
// two below.

/// Seconds per timestamp unit.
const TICK: f64 = 2.0 / CORE_CLOCK_HZ * 2.0;

/// The accumulated record of one measurement run, as read from the board.
/// All values are raw accumulator counts.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RawAccumulated {
    pub energy_accum: u64,
    pub elapsed_time: u64,
    pub peak_power: u32,
    pub peak_voltage: u32,
    pub peak_current: u32,
    pub n_samples: u32,
    pub avg_current: u64,
    pub avg_voltage: u64,
}

/// An instantaneous voltage/current reading, as read from the board.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RawInstantaneous {
    pub voltage: u32,
    pub current: u32,
    pub current_time: u32,
}

/// One measurement run, converted to physical units.
#[cfg_attr(feature = "python",
           pyo3::pyclass(name = "accumulated_data", module = "energymon", get_all, set_all))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccumulatedData {
    /// Accumulated energy, joules.
    pub energy_accum: f64,
    /// Length of the run, seconds.
    pub elapsed_time: f64,
    /// Highest instantaneous power seen during the run, watts.
    pub peak_power: f64,
    /// Highest voltage seen during the run, volts.
    pub peak_voltage: f64,
    /// Highest current seen during the run, amperes.
    pub peak_current: f64,
    /// Number of samples accumulated.
    pub n_samples: u64,
    /// Mean voltage over the run, volts.
    pub avg_voltage: f64,
    /// Mean current over the run, amperes.
    pub avg_current: f64,
}

/// An instantaneous reading, converted to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstantaneousData {
    /// Board timestamp of the reading, seconds.
    pub time: f64,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl RawAccumulated {
    pub fn from_bytes(bytes: &[u8; proto::ACCUMULATED_LEN]) -> RawAccumulated {
        // the board and every supported host are little-endian
        bytemuck::pod_read_unaligned(bytes)
    }

    pub fn convert(&self, params: &PointParameters) -> AccumulatedData {
        let &PointParameters { resistor, gain, vref } = params;
        let power_scale = vref * vref / gain / resistor / (ADC_COUNTS * ADC_COUNTS);
        let voltage_scale = vref / ADC_COUNTS;
        let current_scale = vref / gain / resistor / ADC_COUNTS;
        let samples = self.n_samples as f64;
        AccumulatedData {
            energy_accum: power_scale * 2.0 * SAMPLE_PERIOD_TICKS * 2.0 / CORE_CLOCK_HZ
                * self.energy_accum as f64 * 2.0,
            elapsed_time: self.elapsed_time as f64 * TICK,
            peak_power: power_scale * self.peak_power as f64 * 2.0,
            peak_voltage: voltage_scale * self.peak_voltage as f64 * 2.0,
            peak_current: current_scale * self.peak_current as f64,
            n_samples: self.n_samples as u64,
            avg_voltage: if self.n_samples == 0 { 0.0 } else {
                voltage_scale * self.avg_voltage as f64 / samples * 2.0
            },
            avg_current: if self.n_samples == 0 { 0.0 } else {
                current_scale * self.avg_current as f64 / samples
            },
        }
    }
}

impl RawInstantaneous {
    pub fn from_bytes(bytes: &[u8; proto::INSTANTANEOUS_LEN]) -> RawInstantaneous {
        bytemuck::pod_read_unaligned(bytes)
    }

    pub fn convert(&self, params: &PointParameters) -> InstantaneousData {
        let &PointParameters { resistor, gain, vref } = params;
        let voltage = vref / ADC_COUNTS * self.voltage as f64 * 2.0;
        let current = vref / gain / resistor / ADC_COUNTS * self.current as f64;
        InstantaneousData {
            time: self.current_time as f64 * TICK,
            voltage,
            current,
            power: voltage * current,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1.0)
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<RawAccumulated>(), proto::ACCUMULATED_LEN);
        assert_eq!(std::mem::size_of::<RawInstantaneous>(), proto::INSTANTANEOUS_LEN);
    }

    #[test]
    fn test_accumulated_from_bytes() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(&6u32.to_le_bytes());
        bytes.extend_from_slice(&7u64.to_le_bytes());
        bytes.extend_from_slice(&8u64.to_le_bytes());
        let raw = RawAccumulated::from_bytes(bytes.as_slice().try_into().unwrap());
        assert_eq!(raw, RawAccumulated {
            energy_accum: 1,
            elapsed_time: 2,
            peak_power: 3,
            peak_voltage: 4,
            peak_current: 5,
            n_samples: 6,
            avg_current: 7,
            avg_voltage: 8,
        });
    }

    #[test]
    fn test_instantaneous_from_bytes() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2048u32.to_le_bytes());
        bytes.extend_from_slice(&4096u32.to_le_bytes());
        bytes.extend_from_slice(&84_000_000u32.to_le_bytes());
        let raw = RawInstantaneous::from_bytes(bytes.as_slice().try_into().unwrap());
        assert_eq!(raw, RawInstantaneous {
            voltage: 2048,
            current: 4096,
            current_time: 84_000_000,
        });
    }

    // Known-answer values below are worked out by hand for the default front
    // end (1 Ω shunt, gain 50, 3 V reference).

    #[test]
    fn test_convert_peaks() {
        let raw = RawAccumulated {
            peak_power: 4096 * 4096,
            peak_voltage: 2048,
            peak_current: 4096,
            ..RawAccumulated::zeroed()
        };
        let data = raw.convert(&PointParameters::default());
        assert!(close(data.peak_power, 0.36), "{}", data.peak_power);
        assert!(close(data.peak_voltage, 3.0), "{}", data.peak_voltage);
        assert!(close(data.peak_current, 0.06), "{}", data.peak_current);
    }

    #[test]
    fn test_convert_energy_and_time() {
        let raw = RawAccumulated {
            energy_accum: 4096 * 4096,
            elapsed_time: 168_000_000,
            ..RawAccumulated::zeroed()
        };
        let data = raw.convert(&PointParameters::default());
        assert!(close(data.energy_accum, 720.0 / 168e6), "{}", data.energy_accum);
        assert!(close(data.elapsed_time, 4.0), "{}", data.elapsed_time);
    }

    #[test]
    fn test_convert_averages() {
        let raw = RawAccumulated {
            n_samples: 4,
            avg_voltage: 8192,
            avg_current: 16384,
            ..RawAccumulated::zeroed()
        };
        let data = raw.convert(&PointParameters::default());
        assert_eq!(data.n_samples, 4);
        assert!(close(data.avg_voltage, 3.0), "{}", data.avg_voltage);
        assert!(close(data.avg_current, 0.06), "{}", data.avg_current);
    }

    #[test]
    fn test_convert_no_samples() {
        let raw = RawAccumulated {
            avg_voltage: 8192,
            avg_current: 16384,
            ..RawAccumulated::zeroed()
        };
        let data = raw.convert(&PointParameters::default());
        assert_eq!(data.n_samples, 0);
        assert_eq!(data.avg_voltage, 0.0);
        assert_eq!(data.avg_current, 0.0);
    }

    #[test]
    fn test_convert_scales_with_shunt() {
        // halving the shunt doubles the measured current
        let raw = RawAccumulated { peak_current: 4096, ..RawAccumulated::zeroed() };
        let half_shunt = PointParameters { resistor: 0.5, ..PointParameters::default() };
        let data = raw.convert(&half_shunt);
        assert!(close(data.peak_current, 0.12), "{}", data.peak_current);
    }

    #[test]
    fn test_convert_instantaneous() {
        let raw = RawInstantaneous {
            voltage: 2048,
            current: 4096,
            current_time: 84_000_000,
        };
        let data = raw.convert(&PointParameters::default());
        assert!(close(data.time, 2.0), "{}", data.time);
        assert!(close(data.voltage, 3.0), "{}", data.voltage);
        assert!(close(data.current, 0.06), "{}", data.current);
        assert!(close(data.power, 0.18), "{}", data.power);
    }
}
