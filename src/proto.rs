//! Wire protocol of the energy monitor: vendor request codes and operand
//! encodings. All requests go to interface 0; OUT requests carry their
//! operands packed into `wValue`/`wIndex` and have no data stage, IN requests
//! return a fixed-length little-endian record.

use crate::{Error, Result};

/// USB vendor id of the energy monitor board.
pub const VENDOR_ID: u16 = 0xf539;
/// USB product id of the energy monitor board.
pub const PRODUCT_ID: u16 = 0xf539;

/// Switch the board LEDs (`wValue` = 0/1).
pub const REQ_LEDS: u8 = 0;
/// Start accumulating on a measurement point (`wValue` = point).
pub const REQ_START: u8 = 1;
/// Stop accumulating on a measurement point (`wValue` = point).
pub const REQ_STOP: u8 = 2;
/// Program the serial number (`wValue`/`wIndex` = four ASCII chars).
pub const REQ_SET_SERIAL: u8 = 3;
/// Arm a GPIO pin trigger (`wValue` = port letter | point << 8, `wIndex` = pin).
pub const REQ_SET_TRIGGER: u8 = 4;
/// Read the four-character serial number.
pub const REQ_GET_SERIAL: u8 = 5;
/// Read the 48-byte accumulated record of a point (`wValue` = point).
pub const REQ_ACCUMULATED: u8 = 6;
/// Map a measurement point onto an ADC (`wValue` = point, `wIndex` = ADC).
pub const REQ_MAP_ADC: u8 = 7;
/// Read whether a point is accumulating, as a 32-bit flag.
pub const REQ_RUNNING: u8 = 8;
/// Read how many runs have finished since the counter was last cleared.
pub const REQ_RUNS: u8 = 9;
/// Clear the finished-run counter of a point.
pub const REQ_CLEAR_RUNS: u8 = 10;
/// Read the 12-byte instantaneous voltage/current record of a point.
pub const REQ_INSTANTANEOUS: u8 = 11;

/// Length of the accumulated record, bytes.
pub const ACCUMULATED_LEN: usize = 48;
/// Length of the instantaneous record, bytes.
pub const INSTANTANEOUS_LEN: usize = 12;
/// Length of the serial number, ASCII characters.
pub const SERIAL_LEN: usize = 4;

/// A GPIO pin usable as a measurement trigger, named the way the silkscreen
/// names it: `P<port><pin>`, e.g. `PA0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPin {
    port: u8, // b'A'..=b'H'
    pin: u8,  // 0..=15
}

impl TriggerPin {
    pub fn parse(name: &str) -> Result<TriggerPin> {
        let invalid = || Error::Invalid(format!("invalid trigger pin {:?}", name));
        let mut chars = name.chars();
        if !matches!(chars.next(), Some('P' | 'p')) {
            return Err(invalid());
        }
        let port = match chars.next() {
            Some(letter @ ('A'..='H' | 'a'..='h')) => letter.to_ascii_uppercase() as u8,
            _ => return Err(invalid()),
        };
        let pin = match chars.as_str().parse::<u8>() {
            Ok(pin) if pin < 16 => pin,
            _ => return Err(invalid()),
        };
        Ok(TriggerPin { port, pin })
    }

    pub(crate) fn wire_value(self, point_number: u16) -> u16 {
        self.port as u16 | point_number << 8
    }

    pub(crate) fn wire_index(self) -> u16 {
        self.pin as u16
    }
}

impl std::fmt::Display for TriggerPin {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "P{}{}", self.port as char, self.pin)
    }
}

/// Packs a serial number into the `wValue`/`wIndex` pair of [`REQ_SET_SERIAL`].
pub(crate) fn serial_to_words(serial: &str) -> Result<(u16, u16)> {
    let bytes = serial.as_bytes();
    if bytes.len() != SERIAL_LEN || !bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
        return Err(Error::Invalid(format!(
            "serial number must be {} ASCII alphanumeric characters, got {:?}",
            SERIAL_LEN, serial)));
    }
    Ok((u16::from_le_bytes([bytes[0], bytes[1]]),
        u16::from_le_bytes([bytes[2], bytes[3]])))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pin_parse() {
        assert_eq!(TriggerPin::parse("PA0").unwrap(), TriggerPin { port: b'A', pin: 0 });
        assert_eq!(TriggerPin::parse("pc12").unwrap(), TriggerPin { port: b'C', pin: 12 });
        assert_eq!(TriggerPin::parse("PH15").unwrap(), TriggerPin { port: b'H', pin: 15 });
    }

    #[test]
    fn test_pin_parse_rejects() {
        for name in ["", "P", "PA", "A0", "PX0", "PA16", "PA-1", "PA0x"] {
            assert!(TriggerPin::parse(name).is_err(), "{:?} parsed", name);
        }
    }

    #[test]
    fn test_pin_wire_encoding() {
        let pin = TriggerPin::parse("PA0").unwrap();
        assert_eq!(pin.wire_value(2), 0x41 | 2 << 8);
        assert_eq!(pin.wire_index(), 0);
        let pin = TriggerPin::parse("PC5").unwrap();
        assert_eq!(pin.wire_value(1), 0x43 | 1 << 8);
        assert_eq!(pin.wire_index(), 5);
    }

    #[test]
    fn test_pin_display() {
        assert_eq!(TriggerPin::parse("pb3").unwrap().to_string(), "PB3");
    }

    #[test]
    fn test_serial_words() {
        assert_eq!(serial_to_words("EE00").unwrap(), (0x4545, 0x3030));
        assert!(serial_to_words("EE0").is_err());
        assert!(serial_to_words("EE000").is_err());
        assert!(serial_to_words("EE 0").is_err());
    }
}
