//! `quill-autosave` - exercise the autosave scheduler from the command line
//!
//! Subcommands:
//! - `simulate`: seeded keystroke replay with injected sink latency and
//!   failures, verified against the newest-wins rule
//! - `check-config`: load and validate a TOML configuration file

mod logging;
mod simulator;

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use quill_autosave::AutosaveConfig;
use simulator::{run_simulator, SimulatorConfig};
use std::path::PathBuf;
use std::time::Duration;

fn cli() -> Command {
    Command::new("quill-autosave")
        .version(quill_autosave::VERSION)
        .about("Debounced, newest-wins autosave scheduler")
        .subcommand_required(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("warn")
                .help("Default log filter when QUILL_LOG and RUST_LOG are unset"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Replay random typing against a faulty store and verify the result")
                .arg(
                    Arg::new("keys")
                        .long("keys")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of documents typed into"),
                )
                .arg(
                    Arg::new("keystrokes")
                        .long("keystrokes")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Total submissions across all documents"),
                )
                .arg(
                    Arg::new("typing-interval-ms")
                        .long("typing-interval-ms")
                        .default_value("5")
                        .value_parser(value_parser!(u64))
                        .help("Pause between submissions"),
                )
                .arg(
                    Arg::new("delay-ms")
                        .long("delay-ms")
                        .value_parser(value_parser!(u64))
                        .help("Debounce delay; overrides the config file"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("20")
                        .value_parser(value_parser!(u64))
                        .help("Base store latency"),
                )
                .arg(
                    Arg::new("jitter-ms")
                        .long("jitter-ms")
                        .default_value("10")
                        .value_parser(value_parser!(u64))
                        .help("Extra random store latency"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64))
                        .help("Probability in [0, 1] that a store write fails"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML scheduler configuration"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a TOML scheduler configuration")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file"),
                ),
        )
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> anyhow::Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

fn simulator_config(args: &ArgMatches) -> anyhow::Result<SimulatorConfig> {
    let failure_rate: f64 = arg(args, "failure-rate")?;
    if !(0.0..=1.0).contains(&failure_rate) {
        bail!("--failure-rate must be within [0, 1], got {failure_rate}");
    }

    let mut autosave = match args.get_one::<PathBuf>("config") {
        Some(path) => AutosaveConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SimulatorConfig::default().autosave,
    };
    if let Some(delay) = args.get_one::<u64>("delay-ms") {
        autosave = autosave.with_default_delay(Duration::from_millis(*delay));
    }

    Ok(SimulatorConfig {
        seed: arg(args, "seed")?,
        keys: arg(args, "keys")?,
        keystrokes: arg(args, "keystrokes")?,
        typing_interval: Duration::from_millis(arg(args, "typing-interval-ms")?),
        latency: Duration::from_millis(arg(args, "latency-ms")?),
        jitter: Duration::from_millis(arg(args, "jitter-ms")?),
        failure_rate,
        autosave,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let level: String = arg(&matches, "log-level")?;
    logging::init(&level, matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = simulator_config(args)?;
            let json = args.get_flag("json");

            let report = run_simulator(config).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("check-config", args)) => {
            let path: PathBuf = arg(args, "path")?;
            let config = AutosaveConfig::load(&path)
                .with_context(|| format!("invalid config {}", path.display()))?;

            println!("Config OK: {}", path.display());
            println!("  default_delay_ms: {}", config.default_delay_ms);
            println!("  drain_gap_ms: {}", config.drain_gap_ms);
            match config.persist_timeout_ms {
                Some(ms) => println!("  persist_timeout_ms: {ms}"),
                None => println!("  persist_timeout_ms: off"),
            }
            println!("  event_capacity: {}", config.event_capacity);
            for (key, overrides) in &config.keys {
                if let Some(ms) = overrides.delay_ms {
                    println!("  keys.{key}.delay_ms: {ms}");
                }
            }
            Ok(())
        }
        Some((other, _)) => bail!("unknown subcommand {other}"),
        None => bail!("no subcommand given"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn simulate_flags_map_onto_config() {
        let matches = cli()
            .try_get_matches_from([
                "quill-autosave",
                "simulate",
                "--keys",
                "5",
                "--delay-ms",
                "30",
                "--failure-rate",
                "0.25",
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let config = simulator_config(args).unwrap();

        assert_eq!(config.keys, 5);
        assert_eq!(config.seed, 42);
        assert_eq!(config.autosave.default_delay(), Duration::from_millis(30));
        assert!((config.failure_rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_failure_rate_is_rejected() {
        let matches = cli()
            .try_get_matches_from(["quill-autosave", "simulate", "--failure-rate", "1.5"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert!(simulator_config(args).is_err());
    }
}
