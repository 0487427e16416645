use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mesh_core::{ComputationPath, MeshConfig};
use mesh_kernel::{init_tracing, run_simulator, LogFormat, SimulatorConfig};
use mesh_replay::DeterministicReplayEngine;
use std::process::ExitCode;
use std::time::Duration;

fn cli() -> Command {
    Command::new("mesh-kernel")
        .version(mesh_kernel::VERSION)
        .about("Agent mesh recovery core: loop detection, recovery policy, deterministic replay")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("PATH")
                .help("Configuration file (.toml, .yaml or .yml)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Log filter when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Drive the recovery core with seeded failing workers")
                .arg(
                    Arg::new("rounds")
                        .long("rounds")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Number of events to dispatch"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.3")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a worker fails an event"),
                )
                .arg(path_arg())
                .arg(
                    Arg::new("tick-ms")
                        .long("tick-ms")
                        .default_value("1000")
                        .value_parser(value_parser!(u64))
                        .help("Simulated milliseconds per event"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("replay")
                .about("Replay an input on a computation path")
                .arg(
                    Arg::new("input")
                        .required(true)
                        .help("Input to replay"),
                )
                .arg(path_arg())
                .arg(
                    Arg::new("step")
                        .long("step")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Logical step for critical seeds"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(
                    Arg::new("yaml")
                        .long("yaml")
                        .action(ArgAction::SetTrue)
                        .help("Print YAML instead of TOML"),
                ),
        )
}

fn path_arg() -> Arg {
    Arg::new("path")
        .long("path")
        .default_value("critical")
        .value_parser(["critical", "non-critical"])
        .help("Computation path")
}

fn computation_path(args: &ArgMatches) -> ComputationPath {
    match args.get_one::<String>("path").map(String::as_str) {
        Some("non-critical") => ComputationPath::NonCritical,
        _ => ComputationPath::Critical,
    }
}

fn load_config(matches: &ArgMatches) -> Result<MeshConfig> {
    match matches.get_one::<String>("config") {
        Some(path) => MeshConfig::from_file(path).with_context(|| format!("failed to load config from {path}")),
        None => Ok(MeshConfig::default()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    match run(&matches).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(matches: &ArgMatches) -> Result<()> {
    let level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    let format = if matches.get_flag("log-json") {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_tracing(level, format)?;
    let config = load_config(matches)?;

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let failure_rate = args.get_one::<f64>("failure-rate").copied().unwrap_or(0.3);
            if !(0.0..=1.0).contains(&failure_rate) {
                bail!("--failure-rate must be within [0, 1], got {failure_rate}");
            }
            let sim = SimulatorConfig {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                rounds: args.get_one::<u64>("rounds").copied().unwrap_or(200),
                failure_rate,
                path: computation_path(args),
                tick: Duration::from_millis(args.get_one::<u64>("tick-ms").copied().unwrap_or(1_000)),
                ..SimulatorConfig::default()
            };

            let report = run_simulator(sim, &config).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }
        }
        Some(("replay", args)) => {
            let input = args
                .get_one::<String>("input")
                .context("missing input")?;
            let engine = DeterministicReplayEngine::new(config.replay.clone());
            for _ in 0..args.get_one::<u64>("step").copied().unwrap_or(0) {
                engine.advance_step();
            }
            let response = engine.replay_with_consistency(input, computation_path(args));
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Some(("config", args)) => {
            let rendered = if args.get_flag("yaml") {
                serde_yaml::to_string(&config)?
            } else {
                toml::to_string_pretty(&config)?
            };
            print!("{rendered}");
        }
        _ => {
            cli().print_help()?;
            println!();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn parses_simulate_flags() {
        let matches = cli()
            .try_get_matches_from(["mesh-kernel", "simulate", "--rounds", "10", "--path", "non-critical"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "simulate");
        assert_eq!(args.get_one::<u64>("rounds"), Some(&10));
        assert_eq!(computation_path(args), ComputationPath::NonCritical);
    }
}
