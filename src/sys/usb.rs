//! Hardware transport: vendor control transfers through `nusb`.

use std::time::Duration;

use nusb::transfer::{Control, ControlType, Recipient};

use crate::proto::{PRODUCT_ID, VENDOR_ID};
use crate::{Error, Result};
use super::Transport;

// Control transfers are a handful of bytes; a wedged board should fail fast.
const TIMEOUT: Duration = Duration::from_millis(1000);

pub struct UsbTransport {
    interface: nusb::Interface,
}

impl std::fmt::Debug for UsbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("UsbTransport").finish_non_exhaustive()
    }
}

impl UsbTransport {
    /// Opens the first energy monitor on the bus.
    pub fn open_any() -> Result<UsbTransport> {
        Self::open_matching(None)
    }

    /// Opens the energy monitor with the given serial number.
    pub fn open_serial(serial: &str) -> Result<UsbTransport> {
        Self::open_matching(Some(serial))
    }

    fn open_matching(serial: Option<&str>) -> Result<UsbTransport> {
        let mut candidates = nusb::list_devices()?
            .filter(|info| info.vendor_id() == VENDOR_ID && info.product_id() == PRODUCT_ID)
            .filter(|info| serial.map_or(true, |serial| info.serial_number() == Some(serial)));
        let info = candidates.next().ok_or(Error::NotFound)?;
        if candidates.next().is_some() {
            log::warn!("more than one energy monitor attached, using bus {:03} device {:03}",
                       info.bus_number(), info.device_address());
        }
        log::debug!("opening energy monitor at bus {:03} device {:03}",
                    info.bus_number(), info.device_address());
        let device = info.open()?;
        device.set_configuration(1)?;
        let interface = device.claim_interface(0)?;
        Ok(UsbTransport { interface })
    }

    fn control(request: u8, value: u16, index: u16) -> Control {
        Control {
            control_type: ControlType::Vendor,
            recipient: Recipient::Interface,
            request,
            value,
            index,
        }
    }
}

impl Transport for UsbTransport {
    fn write(&self, request: u8, value: u16, index: u16) -> Result<()> {
        log::trace!("write({:#04x}, {:#06x}, {:#06x})", request, value, index);
        self.interface.control_out_blocking(Self::control(request, value, index), &[], TIMEOUT)?;
        Ok(())
    }

    fn read(&self, request: u8, value: u16, index: u16, data: &mut [u8]) -> Result<()> {
        let transferred = self.interface
            .control_in_blocking(Self::control(request, value, index), data, TIMEOUT)?;
        log::trace!("read({:#04x}, {:#06x}, {:#06x}) = {:02x?}",
                    request, value, index, &data[..transferred]);
        if transferred != data.len() {
            return Err(Error::Short { expected: data.len(), transferred });
        }
        Ok(())
    }
}
