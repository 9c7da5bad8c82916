use std::io::{self, BufRead, Write};
use std::str::FromStr;

use energymon::{Error, MeasurementPoint, Monitor, OutputMode, TriggerPin};

fn main() {
    env_logger::init();

    let mut session: Option<Monitor> = None;
    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else { continue };
        if command == "exit" || command == "quit" {
            break;
        }
        if let Err(error) = run_command(&mut session, command, args) {
            eprintln!("error: {}", error);
        }
    }
    if let Some(mut monitor) = session.take() {
        if let Err(error) = monitor.shutdown() {
            eprintln!("error: {}", error);
        }
    }
}

fn run_command(session: &mut Option<Monitor>, command: &str, args: &[&str])
        -> energymon::Result<()> {
    match command {
        "help" => {
            print!("{}", Monitor::help());
            return Ok(());
        }
        "connect" => {
            *session = Some(Monitor::connect()?);
            println!("connected");
            return Ok(());
        }
        "connect_to" => {
            let serial = required(args, 0, "serial number")?;
            *session = Some(Monitor::connect_to(serial)?);
            println!("connected");
            return Ok(());
        }
        _ => {}
    }

    let monitor = session.as_mut().ok_or(Error::NotConnected)?;
    match command {
        "getserial" =>
            println!("{}", monitor.serial()?),
        "setserial" =>
            monitor.set_serial(required(args, 0, "serial number")?)?,
        "setresistor" => {
            let ohms = parse_arg(args, 0, "shunt resistance")?;
            monitor.set_resistor(parse_point(args, 1)?, ohms)?;
        }
        "setrefvoltage" => {
            let volts = parse_arg(args, 0, "reference voltage")?;
            monitor.set_ref_voltage(parse_point(args, 1)?, volts)?;
        }
        "setgain" => {
            let gain = parse_arg(args, 0, "gain")?;
            monitor.set_gain(parse_point(args, 1)?, gain)?;
        }
        "trigger" => match args.first().copied().map(TriggerPin::parse) {
            Some(Ok(pin)) =>
                monitor.set_trigger(parse_point(args, 1)?, pin)?,
            _ =>
                monitor.trigger(parse_point(args, 0)?)?,
        },
        "leds" => match args.first() {
            Some(&"on") => monitor.set_leds(true)?,
            Some(&"off") => monitor.set_leds(false)?,
            _ => return Err(Error::Invalid("expected \"leds on\" or \"leds off\"".into())),
        },
        "start" =>
            monitor.start(parse_point(args, 0)?)?,
        "start_with_file" => {
            let path = required(args, 0, "output path")?;
            monitor.start_with_file(path, parse_point(args, 1)?)?;
        }
        "stop" =>
            monitor.stop(parse_point(args, 0)?)?,
        "is_running" =>
            println!("{}", monitor.is_running(parse_point(args, 0)?)?),
        "power" =>
            println!("{:.6} W", monitor.power(parse_point(args, 0)?)?),
        "getenergy" => {
            let data = monitor.accumulated(parse_point(args, 0)?)?;
            println!("energy:       {:.6} J", data.energy_accum);
            println!("elapsed time: {:.6} s", data.elapsed_time);
            println!("peak power:   {:.6} W", data.peak_power);
            println!("peak voltage: {:.6} V", data.peak_voltage);
            println!("peak current: {:.6} A", data.peak_current);
            println!("samples:      {}", data.n_samples);
            println!("avg voltage:  {:.6} V", data.avg_voltage);
            println!("avg current:  {:.6} A", data.avg_current);
        }
        "mode" =>
            monitor.set_mode(OutputMode::from_str(required(args, 0, "output mode")?)?),
        _ =>
            return Err(Error::Invalid(format!("unknown command {:?}, try \"help\"", command))),
    }
    Ok(())
}

fn required<'a>(args: &[&'a str], at: usize, what: &str) -> energymon::Result<&'a str> {
    args.get(at).copied()
        .ok_or_else(|| Error::Invalid(format!("missing {}", what)))
}

fn parse_arg(args: &[&str], at: usize, what: &str) -> energymon::Result<f64> {
    let word = required(args, at, what)?;
    word.parse()
        .map_err(|_| Error::Invalid(format!("invalid {}: {:?}", what, word)))
}

fn parse_point(args: &[&str], at: usize) -> energymon::Result<MeasurementPoint> {
    match args.get(at) {
        None => Ok(MeasurementPoint::default()),
        Some(word) => {
            let number = word.parse()
                .map_err(|_| Error::Invalid(format!("invalid measurement point: {:?}", word)))?;
            MeasurementPoint::from_number(number)
        }
    }
}
