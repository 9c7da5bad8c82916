//! Session layer: the command surface of the host tool, plus the background
//! recorder that streams instantaneous samples to a file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::device::Device;
use crate::measurement::AccumulatedData;
use crate::params::{DeviceParameters, MeasurementPoint, PointParameters};
use crate::proto::TriggerPin;
use crate::sys::Transport;
use crate::{Error, Result};

/// How often the recorder samples the instantaneous readings.
const RECORD_INTERVAL: Duration = Duration::from_millis(100);

/// What the recorder writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Physical units: time, volts, amperes, watts.
    #[default]
    Converted,
    /// Raw ADC counts as the board reports them.
    Raw,
}

impl std::str::FromStr for OutputMode {
    type Err = Error;

    fn from_str(name: &str) -> Result<OutputMode> {
        match name {
            "converted" => Ok(OutputMode::Converted),
            "raw" => Ok(OutputMode::Raw),
            _ => Err(Error::Invalid(format!(
                "unknown output mode {:?}, expected \"converted\" or \"raw\"", name))),
        }
    }
}

fn lock<T: Transport>(device: &Mutex<Device<T>>) -> MutexGuard<'_, Device<T>> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One session with one energy monitor.
#[derive(Debug)]
pub struct Monitor<T: Transport> {
    device: Arc<Mutex<Device<T>>>,
    params: DeviceParameters,
    mode: OutputMode,
    recorder: Option<Recorder>,
}

impl Monitor<crate::sys::usb::UsbTransport> {
    /// Connects to the first energy monitor on the bus.
    pub fn connect() -> Result<Monitor<crate::sys::usb::UsbTransport>> {
        Ok(Monitor::new(Device::open()?))
    }

    /// Connects to the energy monitor with the given serial number.
    pub fn connect_to(serial: &str) -> Result<Monitor<crate::sys::usb::UsbTransport>> {
        Ok(Monitor::new(Device::open_serial(serial)?))
    }
}

impl<T: Transport + Send + 'static> Monitor<T> {
    pub fn new(device: Device<T>) -> Monitor<T> {
        Monitor {
            device: Arc::new(Mutex::new(device)),
            params: DeviceParameters::default(),
            mode: OutputMode::default(),
            recorder: None,
        }
    }

    pub fn serial(&self) -> Result<String> {
        lock(&self.device).serial()
    }

    pub fn set_serial(&self, serial: &str) -> Result<()> {
        lock(&self.device).set_serial(serial)
    }

    pub fn set_resistor(&mut self, point: MeasurementPoint, ohms: f64) -> Result<()> {
        check_positive("shunt resistance", ohms)?;
        self.params.point_mut(point).resistor = ohms;
        Ok(())
    }

    pub fn set_ref_voltage(&mut self, point: MeasurementPoint, volts: f64) -> Result<()> {
        check_positive("reference voltage", volts)?;
        self.params.point_mut(point).vref = volts;
        Ok(())
    }

    pub fn set_gain(&mut self, point: MeasurementPoint, gain: f64) -> Result<()> {
        check_positive("gain", gain)?;
        self.params.point_mut(point).gain = gain;
        Ok(())
    }

    pub fn set_trigger(&self, point: MeasurementPoint, pin: TriggerPin) -> Result<()> {
        lock(&self.device).set_trigger(point, pin)
    }

    pub fn set_leds(&self, on: bool) -> Result<()> {
        lock(&self.device).set_leds(on)
    }

    /// Starts accumulating on `point`, mapping it onto an ADC first if it is
    /// not mapped yet.
    pub fn start(&mut self, point: MeasurementPoint) -> Result<()> {
        let mut device = lock(&self.device);
        if !device.point_enabled(point) {
            device.enable_point(point, None)?;
        }
        device.clear_runs(point)?;
        device.start(point)
    }

    /// Like [`Monitor::start`], plus a background recorder appending
    /// instantaneous samples to `path` until the point is stopped.
    pub fn start_with_file<P: AsRef<Path>>(&mut self, path: P, point: MeasurementPoint)
            -> Result<()> {
        if let Some(recorder) = self.recorder.take() {
            recorder.finish()?;
        }
        self.start(point)?;
        self.recorder = Some(Recorder::spawn(self.device.clone(), point,
                                             *self.params.point(point), self.mode,
                                             path.as_ref())?);
        Ok(())
    }

    /// Stops accumulating on `point` and closes the recording, if one is
    /// active. Recorder I/O errors surface here.
    pub fn stop(&mut self, point: MeasurementPoint) -> Result<()> {
        lock(&self.device).stop(point)?;
        match self.recorder.take() {
            Some(recorder) => recorder.finish(),
            None => Ok(()),
        }
    }

    pub fn is_running(&self, point: MeasurementPoint) -> Result<bool> {
        lock(&self.device).is_running(point)
    }

    /// Manual trigger: toggles a run the way the board's push button does.
    pub fn trigger(&mut self, point: MeasurementPoint) -> Result<()> {
        if self.is_running(point)? {
            self.stop(point)
        } else {
            self.start(point)
        }
    }

    /// Reads the accumulated record of `point`, converted with its
    /// front-end parameters.
    pub fn accumulated(&self, point: MeasurementPoint) -> Result<AccumulatedData> {
        let raw = lock(&self.device).read_accumulated(point)?;
        Ok(raw.convert(self.params.point(point)))
    }

    /// Instantaneous power on `point`, watts.
    pub fn power(&self, point: MeasurementPoint) -> Result<f64> {
        let raw = lock(&self.device).read_instantaneous(point)?;
        Ok(raw.convert(self.params.point(point)).power)
    }

    pub fn set_mode(&mut self, mode: OutputMode) {
        self.mode = mode;
    }

    pub fn help() -> &'static str {
        HELP
    }

    /// Stops the recorder and every mapped point. Stop failures on the way
    /// out are logged, not returned; recorder errors are.
    pub fn shutdown(&mut self) -> Result<()> {
        let result = match self.recorder.take() {
            Some(recorder) => recorder.finish(),
            None => Ok(()),
        };
        let device = lock(&self.device);
        for point in device.enabled_points() {
            if let Err(error) = device.stop(point) {
                log::warn!("failed to stop measurement point {}: {}", point, error);
            }
        }
        result
    }
}

impl<T: Transport> Drop for Monitor<T> {
    fn drop(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            if let Err(error) = recorder.finish() {
                log::warn!("recorder failed: {}", error);
            }
        }
    }
}

fn check_positive(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::Invalid(format!("{} must be positive, got {}", what, value)))
    }
}

#[derive(Debug)]
struct Recorder {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<Result<()>>,
}

impl Recorder {
    fn spawn<T: Transport + Send + 'static>(device: Arc<Mutex<Device<T>>>,
                                            point: MeasurementPoint,
                                            params: PointParameters,
                                            mode: OutputMode,
                                            path: &Path) -> Result<Recorder> {
        let mut output = BufWriter::new(File::create(path)?);
        match mode {
            OutputMode::Converted => writeln!(output, "time,voltage,current,power")?,
            OutputMode::Raw => writeln!(output, "voltage,current,current_time")?,
        }
        log::debug!("recording point {} to {}", point, path.display());
        let stop = Arc::new(AtomicBool::new(false));
        let thread = thread::spawn({
            let stop = stop.clone();
            move || {
                // always take at least one sample, even if stopped right away
                loop {
                    let raw = lock(&device).read_instantaneous(point)?;
                    match mode {
                        OutputMode::Converted => {
                            let data = raw.convert(&params);
                            writeln!(output, "{},{},{},{}",
                                     data.time, data.voltage, data.current, data.power)?;
                        }
                        OutputMode::Raw => {
                            writeln!(output, "{},{},{}",
                                     raw.voltage, raw.current, raw.current_time)?;
                        }
                    }
                    if stop.load(Ordering::Relaxed) {
                        break
                    }
                    thread::sleep(RECORD_INTERVAL);
                }
                output.flush()?;
                Ok(())
            }
        });
        Ok(Recorder { stop, thread })
    }

    fn finish(self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

const HELP: &str = "\
connect                      attach to the first energy monitor found
connect_to SERIAL            attach to the monitor with the given serial
getserial                    read the four-character serial number
setserial SERIAL             program a new four-character serial number
setresistor OHMS [POINT]     set the shunt resistance used for conversion
setrefvoltage VOLTS [POINT]  set the ADC reference voltage used for conversion
setgain GAIN [POINT]         set the amplifier gain used for conversion
trigger [PIN] [POINT]        arm a GPIO pin trigger (e.g. trigger PA0), or
                             toggle a run like the board button if no PIN
leds on|off                  switch the board LEDs
start [POINT]                start accumulating on a measurement point
start_with_file PATH [POINT] start and record instantaneous samples to PATH
stop [POINT]                 stop accumulating and close the recording
is_running [POINT]           report whether a point is accumulating
getenergy [POINT]            read the accumulated record of a point
power [POINT]                read the instantaneous power of a point, watts
mode converted|raw           select the recording format
help                         show this text
exit                         stop everything and detach
";

#[cfg(test)]
mod test {
    use super::*;
    use crate::proto;
    use crate::sys::mock::MockTransport;
    use MeasurementPoint::*;

    fn monitor() -> (MockTransport, Monitor<MockTransport>) {
        let mock = MockTransport::new();
        (mock.clone(), Monitor::new(Device::new(mock)))
    }

    const INSTANTANEOUS: [u8; 12] = [
        0x00, 0x08, 0x00, 0x00, // voltage 2048
        0x00, 0x10, 0x00, 0x00, // current 4096
        0x00, 0x36, 0x65, 0x01, // current_time 23 410 176
    ];

    #[test]
    fn test_start_maps_point_once() {
        let (mock, mut mon) = monitor();
        mon.start(One).unwrap();
        mon.start(One).unwrap();
        assert_eq!(mock.writes(), vec![
            (proto::REQ_MAP_ADC, 1, 2),
            (proto::REQ_CLEAR_RUNS, 1, 0),
            (proto::REQ_START, 1, 0),
            (proto::REQ_CLEAR_RUNS, 1, 0),
            (proto::REQ_START, 1, 0),
        ]);
    }

    #[test]
    fn test_trigger_toggles() {
        let (mock, mut mon) = monitor();
        mock.stage_read(proto::REQ_RUNNING, &0u32.to_le_bytes());
        mon.trigger(One).unwrap();
        mock.stage_read(proto::REQ_RUNNING, &1u32.to_le_bytes());
        mon.trigger(One).unwrap();
        assert_eq!(mock.writes(), vec![
            (proto::REQ_MAP_ADC, 1, 2),
            (proto::REQ_CLEAR_RUNS, 1, 0),
            (proto::REQ_START, 1, 0),
            (proto::REQ_STOP, 1, 0),
        ]);
    }

    #[test]
    fn test_accumulated_uses_point_parameters() {
        let (mock, mon) = monitor();
        let mut bytes = vec![0; 24];
        bytes.extend_from_slice(&4096u32.to_le_bytes()); // peak_current
        bytes.extend_from_slice(&[0; 20]);
        mock.read_returns(proto::REQ_ACCUMULATED, &bytes);
        // default 1 Ω shunt on point 1, 0.5 Ω on the self-measurement point
        assert!((mon.accumulated(One).unwrap().peak_current - 0.06).abs() < 1e-12);
        assert!((mon.accumulated(Four).unwrap().peak_current - 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_set_resistor_changes_conversion() {
        let (mock, mut mon) = monitor();
        let mut bytes = vec![0; 24];
        bytes.extend_from_slice(&4096u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 20]);
        mock.read_returns(proto::REQ_ACCUMULATED, &bytes);
        mon.set_resistor(One, 2.0).unwrap();
        assert!((mon.accumulated(One).unwrap().peak_current - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_parameter_validation() {
        let (_mock, mut mon) = monitor();
        assert!(mon.set_resistor(One, 0.0).is_err());
        assert!(mon.set_gain(One, -1.0).is_err());
        assert!(mon.set_ref_voltage(One, f64::NAN).is_err());
        assert!(mon.set_ref_voltage(One, f64::INFINITY).is_err());
    }

    #[test]
    fn test_power() {
        let (mock, mon) = monitor();
        mock.read_returns(proto::REQ_INSTANTANEOUS, &INSTANTANEOUS);
        assert!((mon.power(One).unwrap() - 0.18).abs() < 1e-12);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("converted".parse::<OutputMode>().unwrap(), OutputMode::Converted);
        assert_eq!("raw".parse::<OutputMode>().unwrap(), OutputMode::Raw);
        assert!("fast".parse::<OutputMode>().is_err());
    }

    #[test]
    fn test_recorder_writes_samples() {
        let (mock, mut mon) = monitor();
        mock.read_returns(proto::REQ_INSTANTANEOUS, &INSTANTANEOUS);
        let file = tempfile::NamedTempFile::new().unwrap();
        mon.start_with_file(file.path(), One).unwrap();
        thread::sleep(Duration::from_millis(50));
        mon.stop(One).unwrap();
        let contents = std::fs::read_to_string(file.path()).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("time,voltage,current,power"));
        let sample = lines.next().expect("at least one sample");
        let fields: Vec<&str> = sample.split(',').collect();
        assert_eq!(fields.len(), 4);
        assert!((fields[1].parse::<f64>().unwrap() - 3.0).abs() < 1e-12);
        assert!((fields[3].parse::<f64>().unwrap() - 0.18).abs() < 1e-12);
    }

    #[test]
    fn test_recorder_raw_mode() {
        let (mock, mut mon) = monitor();
        mock.read_returns(proto::REQ_INSTANTANEOUS, &INSTANTANEOUS);
        let file = tempfile::NamedTempFile::new().unwrap();
        mon.set_mode(OutputMode::Raw);
        mon.start_with_file(file.path(), One).unwrap();
        mon.stop(One).unwrap();
        let contents = std::fs::read_to_string(file.path()).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("voltage,current,current_time"));
        assert_eq!(lines.next(), Some("2048,4096,23410176"));
    }

    #[test]
    fn test_shutdown_stops_mapped_points() {
        let (mock, mut mon) = monitor();
        mon.start(One).unwrap();
        mon.start(Two).unwrap();
        mon.shutdown().unwrap();
        let writes = mock.writes();
        assert!(writes.contains(&(proto::REQ_STOP, 1, 0)));
        assert!(writes.contains(&(proto::REQ_STOP, 2, 0)));
    }

    #[test]
    fn test_help_names_every_command() {
        for command in ["connect", "connect_to", "getserial", "setserial", "setresistor",
                        "setrefvoltage", "setgain", "trigger", "leds", "start",
                        "start_with_file", "stop", "is_running", "getenergy", "power",
                        "mode", "help", "exit"] {
            assert!(Monitor::<MockTransport>::help().contains(command), "{}", command);
        }
    }
}
