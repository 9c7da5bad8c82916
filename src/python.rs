//! The `energymon` Python extension module: the command surface exposed as
//! module-level functions over one process-wide session, with the
//! interpreter lock released around the calls that block on the device.

use std::sync::{Mutex, PoisonError};

use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::measurement::AccumulatedData;
use crate::params::MeasurementPoint;
use crate::proto::TriggerPin;
use crate::{Error, Monitor};

static MONITOR: Mutex<Option<Monitor>> = Mutex::new(None);

impl From<Error> for PyErr {
    fn from(error: Error) -> PyErr {
        match error {
            Error::NotFound | Error::Usb(_) | Error::Io(_) | Error::Short { .. } =>
                PyIOError::new_err(error.to_string()),
            Error::Invalid(_) =>
                PyValueError::new_err(error.to_string()),
            Error::NotConnected | Error::NoFreeAdc |
            Error::AdcBusy { .. } | Error::AdcUnsupported { .. } =>
                PyRuntimeError::new_err(error.to_string()),
        }
    }
}

fn session() -> std::sync::MutexGuard<'static, Option<Monitor>> {
    MONITOR.lock().unwrap_or_else(PoisonError::into_inner)
}

fn with_monitor<R>(f: impl FnOnce(&mut Monitor) -> crate::Result<R>) -> crate::Result<R> {
    match session().as_mut() {
        Some(monitor) => f(monitor),
        None => Err(Error::NotConnected),
    }
}

fn parse_point(number: u8) -> crate::Result<MeasurementPoint> {
    MeasurementPoint::from_number(number)
}

fn replace_session(monitor: Monitor) {
    if let Some(mut old) = session().replace(monitor) {
        if let Err(error) = old.shutdown() {
            log::warn!("shutting down previous session: {}", error);
        }
    }
}

/// Attaches to the first energy monitor found.
#[pyfunction]
fn connect(py: Python<'_>) -> PyResult<()> {
    py.allow_threads(|| {
        let monitor = Monitor::connect()?;
        replace_session(monitor);
        Ok(())
    })
    .map_err(PyErr::from)
}

/// Attaches to the energy monitor with the given serial number.
#[pyfunction]
fn connect_to(serial: &str) -> PyResult<()> {
    let monitor = Monitor::connect_to(serial)?;
    replace_session(monitor);
    Ok(())
}

#[pyfunction]
fn getserial() -> PyResult<String> {
    Ok(with_monitor(|monitor| monitor.serial())?)
}

#[pyfunction]
fn setserial(serial: &str) -> PyResult<()> {
    Ok(with_monitor(|monitor| monitor.set_serial(serial))?)
}

#[pyfunction]
#[pyo3(signature = (ohms, point=1))]
fn setresistor(ohms: f64, point: u8) -> PyResult<()> {
    Ok(with_monitor(|monitor| monitor.set_resistor(parse_point(point)?, ohms))?)
}

#[pyfunction]
#[pyo3(signature = (volts, point=1))]
fn setrefvoltage(volts: f64, point: u8) -> PyResult<()> {
    Ok(with_monitor(|monitor| monitor.set_ref_voltage(parse_point(point)?, volts))?)
}

#[pyfunction]
#[pyo3(signature = (gain, point=1))]
fn setgain(gain: f64, point: u8) -> PyResult<()> {
    Ok(with_monitor(|monitor| monitor.set_gain(parse_point(point)?, gain))?)
}

/// With `pin`, arms a GPIO pin trigger; without, toggles a run the way the
/// board's push button does.
#[pyfunction]
#[pyo3(signature = (pin=None, point=1))]
fn trigger(pin: Option<&str>, point: u8) -> PyResult<()> {
    Ok(with_monitor(|monitor| {
        let point = parse_point(point)?;
        match pin {
            Some(pin) => monitor.set_trigger(point, TriggerPin::parse(pin)?),
            None => monitor.trigger(point),
        }
    })?)
}

#[pyfunction]
fn leds(on: bool) -> PyResult<()> {
    Ok(with_monitor(|monitor| monitor.set_leds(on))?)
}

#[pyfunction]
#[pyo3(signature = (point=1))]
fn start(point: u8) -> PyResult<()> {
    Ok(with_monitor(|monitor| monitor.start(parse_point(point)?))?)
}

#[pyfunction]
#[pyo3(signature = (path, point=1))]
fn start_with_file(path: &str, point: u8) -> PyResult<()> {
    Ok(with_monitor(|monitor| monitor.start_with_file(path, parse_point(point)?))?)
}

#[pyfunction]
#[pyo3(signature = (point=1))]
fn stop(point: u8) -> PyResult<()> {
    Ok(with_monitor(|monitor| monitor.stop(parse_point(point)?))?)
}

/// Instantaneous power on a measurement point, watts.
#[pyfunction]
#[pyo3(signature = (point=1))]
fn power(point: u8) -> PyResult<f64> {
    Ok(with_monitor(|monitor| monitor.power(parse_point(point)?))?)
}

/// Selects the recording format, `"converted"` or `"raw"`.
#[pyfunction]
fn mode(mode: &str) -> PyResult<()> {
    let mode = mode.parse()?;
    Ok(with_monitor(|monitor| {
        monitor.set_mode(mode);
        Ok(())
    })?)
}

#[pyfunction]
fn help() -> &'static str {
    Monitor::help()
}

fn shutdown_session() -> crate::Result<()> {
    match session().take() {
        Some(mut monitor) => monitor.shutdown(),
        None => Ok(()),
    }
}

/// Stops everything and detaches from the monitor.
#[pyfunction]
fn exit() -> PyResult<()> {
    Ok(shutdown_session()?)
}

#[pyfunction]
fn quit() -> PyResult<()> {
    Ok(shutdown_session()?)
}

#[pyfunction]
#[pyo3(signature = (point=1))]
fn is_running(py: Python<'_>, point: u8) -> PyResult<bool> {
    let point = parse_point(point)?;
    Ok(py.allow_threads(|| with_monitor(|monitor| monitor.is_running(point)))?)
}

/// Reads the accumulated record of a measurement point, converted to
/// physical units with that point's front-end parameters.
#[pyfunction]
#[pyo3(signature = (point=1))]
fn getenergy(py: Python<'_>, point: u8) -> PyResult<AccumulatedData> {
    let point = parse_point(point)?;
    Ok(py.allow_threads(|| with_monitor(|monitor| monitor.accumulated(point)))?)
}

#[pymethods]
impl AccumulatedData {
    #[new]
    #[pyo3(signature = (energy_accum=0.0, elapsed_time=0.0, peak_power=0.0,
                        peak_voltage=0.0, peak_current=0.0, n_samples=0,
                        avg_voltage=0.0, avg_current=0.0))]
    fn new(energy_accum: f64, elapsed_time: f64, peak_power: f64, peak_voltage: f64,
           peak_current: f64, n_samples: u64, avg_voltage: f64, avg_current: f64) -> Self {
        AccumulatedData {
            energy_accum, elapsed_time, peak_power, peak_voltage, peak_current,
            n_samples, avg_voltage, avg_current,
        }
    }

    fn __repr__(&self) -> String {
        format!("accumulated_data(energy_accum={}, elapsed_time={}, peak_power={}, \
                 peak_voltage={}, peak_current={}, n_samples={})",
                self.energy_accum, self.elapsed_time, self.peak_power,
                self.peak_voltage, self.peak_current, self.n_samples)
    }
}

#[pymodule]
fn energymon(_py: Python, m: &Bound<'_, PyModule>) -> PyResult<()> {
    // none of the commands can work if USB enumeration is broken, so fail
    // the import instead
    if let Err(error) = nusb::list_devices() {
        return Err(PyIOError::new_err(format!("could not initialise USB: {}", error)));
    }

    m.add_function(wrap_pyfunction!(connect, m)?)?;
    m.add_function(wrap_pyfunction!(connect_to, m)?)?;
    m.add_function(wrap_pyfunction!(getserial, m)?)?;
    m.add_function(wrap_pyfunction!(setserial, m)?)?;
    m.add_function(wrap_pyfunction!(setresistor, m)?)?;
    m.add_function(wrap_pyfunction!(setrefvoltage, m)?)?;
    m.add_function(wrap_pyfunction!(setgain, m)?)?;
    m.add_function(wrap_pyfunction!(trigger, m)?)?;
    m.add_function(wrap_pyfunction!(leds, m)?)?;
    m.add_function(wrap_pyfunction!(start, m)?)?;
    m.add_function(wrap_pyfunction!(start_with_file, m)?)?;
    m.add_function(wrap_pyfunction!(stop, m)?)?;
    m.add_function(wrap_pyfunction!(power, m)?)?;
    m.add_function(wrap_pyfunction!(mode, m)?)?;
    m.add_function(wrap_pyfunction!(help, m)?)?;
    m.add_function(wrap_pyfunction!(exit, m)?)?;
    m.add_function(wrap_pyfunction!(quit, m)?)?;
    m.add_function(wrap_pyfunction!(is_running, m)?)?;
    m.add_function(wrap_pyfunction!(getenergy, m)?)?;
    m.add_class::<AccumulatedData>()?;
    Ok(())
}
