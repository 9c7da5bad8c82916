use crate::measurement::{RawAccumulated, RawInstantaneous};
use crate::params::{Adc, MeasurementPoint};
use crate::proto::{self, TriggerPin};
use crate::sys::Transport;
use crate::{Error, Result};

/// A handle over one energy monitor board. One method per vendor request,
/// plus the host-side bookkeeping of which measurement point occupies which
/// ADC.
#[derive(Debug)]
pub struct Device<T: Transport> {
    transport: T,
    adc_map: [Option<MeasurementPoint>; 3],
}

impl Device<crate::sys::usb::UsbTransport> {
    /// Opens the first energy monitor on the bus.
    pub fn open() -> Result<Device<crate::sys::usb::UsbTransport>> {
        Ok(Device::new(crate::sys::usb::UsbTransport::open_any()?))
    }

    /// Opens the energy monitor with the given serial number.
    pub fn open_serial(serial: &str) -> Result<Device<crate::sys::usb::UsbTransport>> {
        Ok(Device::new(crate::sys::usb::UsbTransport::open_serial(serial)?))
    }
}

impl<T: Transport> Device<T> {
    pub fn new(transport: T) -> Device<T> {
        Device { transport, adc_map: [None; 3] }
    }

    pub fn set_leds(&self, on: bool) -> Result<()> {
        log::debug!("set_leds({})", on);
        self.transport.write(proto::REQ_LEDS, on as u16, 0)
    }

    pub fn start(&self, point: MeasurementPoint) -> Result<()> {
        log::debug!("start(point {})", point);
        self.transport.write(proto::REQ_START, point.number(), 0)
    }

    pub fn stop(&self, point: MeasurementPoint) -> Result<()> {
        log::debug!("stop(point {})", point);
        self.transport.write(proto::REQ_STOP, point.number(), 0)
    }

    pub fn is_running(&self, point: MeasurementPoint) -> Result<bool> {
        Ok(self.read_u32(proto::REQ_RUNNING, point.number())? != 0)
    }

    /// How many runs have finished since the counter was last cleared.
    pub fn runs(&self, point: MeasurementPoint) -> Result<u32> {
        self.read_u32(proto::REQ_RUNS, point.number())
    }

    pub fn clear_runs(&self, point: MeasurementPoint) -> Result<()> {
        log::debug!("clear_runs(point {})", point);
        self.transport.write(proto::REQ_CLEAR_RUNS, point.number(), 0)
    }

    pub fn serial(&self) -> Result<String> {
        let mut bytes = [0u8; proto::SERIAL_LEN];
        self.transport.read(proto::REQ_GET_SERIAL, 0, 0, &mut bytes)?;
        let serial = String::from_utf8_lossy(&bytes).into_owned();
        log::debug!("serial() = {:?}", serial);
        Ok(serial)
    }

    pub fn set_serial(&self, serial: &str) -> Result<()> {
        let (value, index) = proto::serial_to_words(serial)?;
        log::debug!("set_serial({:?})", serial);
        self.transport.write(proto::REQ_SET_SERIAL, value, index)
    }

    pub fn set_trigger(&self, point: MeasurementPoint, pin: TriggerPin) -> Result<()> {
        log::debug!("set_trigger(point {}, {})", point, pin);
        self.transport.write(proto::REQ_SET_TRIGGER,
                             pin.wire_value(point.number()), pin.wire_index())
    }

    pub fn read_accumulated(&self, point: MeasurementPoint) -> Result<RawAccumulated> {
        let mut bytes = [0u8; proto::ACCUMULATED_LEN];
        self.transport.read(proto::REQ_ACCUMULATED, point.number(), 0, &mut bytes)?;
        let raw = RawAccumulated::from_bytes(&bytes);
        log::debug!("read_accumulated(point {}) = {:?}", point, raw);
        Ok(raw)
    }

    pub fn read_instantaneous(&self, point: MeasurementPoint) -> Result<RawInstantaneous> {
        let mut bytes = [0u8; proto::INSTANTANEOUS_LEN];
        self.transport.read(proto::REQ_INSTANTANEOUS, point.number(), 0, &mut bytes)?;
        let raw = RawInstantaneous::from_bytes(&bytes);
        log::trace!("read_instantaneous(point {}) = {:?}", point, raw);
        Ok(raw)
    }

    pub fn point_enabled(&self, point: MeasurementPoint) -> bool {
        self.adc_map.contains(&Some(point))
    }

    pub fn enabled_points(&self) -> Vec<MeasurementPoint> {
        self.adc_map.iter().flatten().copied().collect()
    }

    /// Maps `point` onto an ADC, picking a suitable one if `adc` is `None`.
    /// Enabling an already enabled point is a warning, not an error.
    pub fn enable_point(&mut self, point: MeasurementPoint, adc: Option<Adc>) -> Result<()> {
        if self.point_enabled(point) {
            log::warn!("measurement point {} is already enabled", point);
            return Ok(());
        }
        let adc = match adc {
            Some(adc) => match self.adc_map[adc.index()] {
                Some(occupant) => return Err(Error::AdcBusy { adc, point: occupant }),
                None => adc,
            },
            None => self.pick_adc(point)?,
        };
        // ADC3 is not wired to points 3 and 4
        if adc == Adc::Adc3 &&
                matches!(point, MeasurementPoint::Three | MeasurementPoint::Four) {
            return Err(Error::AdcUnsupported { adc, point });
        }
        log::debug!("enable_point(point {}, {:?})", point, adc);
        self.transport.write(proto::REQ_MAP_ADC, point.number(), adc.index() as u16)?;
        self.adc_map[adc.index()] = Some(point);
        Ok(())
    }

    fn pick_adc(&self, point: MeasurementPoint) -> Result<Adc> {
        // points 1 and 2 take ADC3 first, keeping the unrestricted ADCs free
        // for the points that cannot use it
        if matches!(point, MeasurementPoint::One | MeasurementPoint::Two) &&
                self.adc_map[Adc::Adc3.index()].is_none() {
            return Ok(Adc::Adc3);
        }
        Adc::ALL.into_iter()
            .find(|adc| self.adc_map[adc.index()].is_none())
            .ok_or(Error::NoFreeAdc)
    }

    /// Releases the ADC of `point`. The board has no unmap request; the slot
    /// is only released host-side.
    pub fn disable_point(&mut self, point: MeasurementPoint) {
        match self.adc_map.iter().position(|&mapped| mapped == Some(point)) {
            Some(index) => {
                log::debug!("disable_point(point {})", point);
                self.adc_map[index] = None;
            }
            None => log::warn!("measurement point {} is already disabled", point),
        }
    }

    /// Whether a triggered run has finished since the last call. Clears the
    /// board's finished-run counter when it reports one.
    pub fn measurement_completed(&self, point: MeasurementPoint) -> Result<bool> {
        let runs = self.runs(point)?;
        if runs > 1 {
            log::warn!("{} measurement runs have completed, expected one", runs);
        }
        if runs > 0 && !self.is_running(point)? {
            self.clear_runs(point)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn read_u32(&self, request: u8, value: u16) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.transport.read(request, value, 0, &mut bytes)?;
        let data = u32::from_le_bytes(bytes);
        log::trace!("read_u32({:#04x}, {}) = {:#x}", request, value, data);
        Ok(data)
    }
}
