mod sys;
mod proto;
mod params;
mod measurement;
mod device;
mod monitor;
#[cfg(feature = "python")]
mod python;

#[derive(Debug)]
pub enum Error {
    NotFound,
    NotConnected,
    Usb(nusb::transfer::TransferError),
    Io(std::io::Error),
    Short { expected: usize, transferred: usize },
    NoFreeAdc,
    AdcBusy { adc: Adc, point: MeasurementPoint },
    AdcUnsupported { adc: Adc, point: MeasurementPoint },
    Invalid(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::NotFound =>
                write!(f, "energy monitor not found"),
            Self::NotConnected =>
                write!(f, "not connected to an energy monitor"),
            Self::Usb(transfer_error) =>
                write!(f, "USB transfer error: {}", transfer_error),
            Self::Io(io_error) =>
                write!(f, "I/O error: {}", io_error),
            Self::Short { expected, transferred } =>
                write!(f, "short transfer: expected {} bytes, got {}", expected, transferred),
            Self::NoFreeAdc =>
                write!(f, "every ADC is already mapped to a measurement point"),
            Self::AdcBusy { adc, point } =>
                write!(f, "{:?} already measures point {}", adc, point),
            Self::AdcUnsupported { adc, point } =>
                write!(f, "measurement point {} cannot be measured by {:?}", point, adc),
            Self::Invalid(message) =>
                write!(f, "{}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            &Self::Usb(ref transfer_error) => Some(transfer_error),
            &Self::Io(ref io_error) => Some(io_error),
            _ => None
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<nusb::transfer::TransferError> for Error {
    fn from(error: nusb::transfer::TransferError) -> Self {
        Error::Usb(error)
    }
}

pub type Result<T> =
    core::result::Result<T, Error>;

pub use proto::TriggerPin;

pub use params::{
    Adc,
    MeasurementPoint,
    PointParameters,
    DeviceParameters,
};

pub use measurement::{
    RawAccumulated,
    RawInstantaneous,
    AccumulatedData,
    InstantaneousData,
};

pub use monitor::OutputMode;

pub type Device =
    device::Device<crate::sys::usb::UsbTransport>;

pub type Monitor =
    monitor::Monitor<crate::sys::usb::UsbTransport>;
