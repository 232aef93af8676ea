use anyhow::Context;
use dcdc_link::{ConverterController, ConverterRatings, ConverterTarget, LinkConfig};
use env_logger::Builder;
use log::{LevelFilter, info};
use std::io::{BufRead, Write};
use std::path::Path;

const HELP: &str = "\
Commands:
  connect [host] [port]   connect to the converter (defaults from config)
  disconnect
  set <volts>             apply an output voltage setpoint
  output on|off|toggle    switch the output relay
  measure on|off          start or stop sampling the output voltage
  status                  show the link state
  samples                 show the sample window
  help
  quit";

fn main() -> anyhow::Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("dcdc_link"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => LinkConfig::load(Path::new(&path)).with_context(|| format!("Failed to load config from {}", path))?,
        None => LinkConfig::default(),
    };

    info!("Starting up");
    let controller = ConverterController::new(config).context("Failed to start link executor")?;

    println!("DC-DC converter console. {}", ConverterRatings::DEFAULT);
    println!("{}", HELP);

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush().context("Failed to write prompt")?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("Failed to read command")? == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => continue,
            ["quit"] | ["exit"] => break,
            words => {
                if let Err(e) = run_command(&controller, words) {
                    println!("Error: {}", e);
                }
            }
        }
    }

    info!("Shutting down");
    Ok(())
}

fn run_command(controller: &ConverterController, words: &[&str]) -> anyhow::Result<()> {
    match words {
        ["help"] => println!("{}", HELP),
        ["connect"] => controller.connect(controller.default_target()?)?,
        ["connect", host] => {
            let port = controller.config().port.to_string();
            controller.connect(ConverterTarget::parse(host, &port)?)?
        }
        ["connect", host, port] => controller.connect(ConverterTarget::parse(host, port)?)?,
        ["disconnect"] => controller.disconnect()?,
        ["set", raw] => {
            let voltage = controller.apply_voltage(raw)?;
            println!("Requested {:.1} V", voltage);
        }
        ["output", "on"] => controller.set_output(true)?,
        ["output", "off"] => controller.set_output(false)?,
        ["output", "toggle"] => {
            let on = controller.toggle_output()?;
            println!("Requested output {}", if on { "on" } else { "off" });
        }
        ["measure", "on"] => controller.set_measurement_enabled(true)?,
        ["measure", "off"] => controller.set_measurement_enabled(false)?,
        ["status"] => {
            let status = controller.status();
            println!("{}", status.connection);
            println!(
                "  applied: {:.1} V{}",
                status.applied_voltage,
                if status.voltage_pending { " (pending)" } else { "" }
            );
            println!(
                "  output: {}{}",
                if status.output_on { "on" } else { "off" },
                if status.output_pending { " (pending)" } else { "" }
            );
            println!(
                "  measurement: {} ({} V, {} samples)",
                if status.measurement_enabled { "enabled" } else { "disabled" },
                status.measurement_display(),
                status.sample_count
            );
        }
        ["samples"] => {
            let samples = controller.samples();
            let Some(first) = samples.first() else {
                println!("No samples");
                return Ok(());
            };
            for sample in &samples {
                let offset = sample.timestamp.checked_duration_since(first.timestamp).unwrap_or_default();
                println!("  +{:>6} ms  {:.1} V", offset.as_millis(), sample.voltage);
            }
        }
        _ => anyhow::bail!("Unknown command {:?}, type 'help'", words.join(" ")),
    }
    Ok(())
}
