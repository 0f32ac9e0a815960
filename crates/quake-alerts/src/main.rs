//! `quake-alerts` command line

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use quake_alerts::{run_simulator, EngineConfig, SimulatorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("quake-alerts")
        .version(quake_alerts::VERSION)
        .about("Seismic alert fan-out engine")
        .subcommand_required(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the scripted alert scenario")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Engine configuration (TOML)"),
                )
                .arg(
                    Arg::new("subscribers")
                        .long("subscribers")
                        .default_value("25")
                        .value_parser(value_parser!(usize))
                        .help("Number of simulated subscribers"),
                )
                .arg(
                    Arg::new("spread-km")
                        .long("spread-km")
                        .default_value("1200")
                        .value_parser(value_parser!(f64))
                        .help("Distance of the farthest subscriber from the epicentre"),
                )
                .arg(
                    Arg::new("blocked-every")
                        .long("blocked-every")
                        .default_value("10")
                        .value_parser(value_parser!(usize))
                        .help("Every n-th subscriber has blocked the bot (0 disables)"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a configuration file and print the effective values")
                .arg(
                    Arg::new("config")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> anyhow::Result<EngineConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let engine_config = load_config(args)?;
            let config = SimulatorConfig {
                subscribers: args.get_one::<usize>("subscribers").copied().unwrap_or(25),
                spread_km: args.get_one::<f64>("spread-km").copied().unwrap_or(1_200.0),
                blocked_every: args.get_one::<usize>("blocked-every").copied().unwrap_or(10),
            };

            let report = run_simulator(engine_config, config)
                .await
                .context("simulation failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.passed() {
                anyhow::bail!("{} invariant violation(s)", report.violations.len());
            }
        }
        Some(("check-config", args)) => {
            let config = load_config(args)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        _ => unreachable!("subcommand is required"),
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
    fn simulate_defaults() {
        let matches = cli().get_matches_from(["quake-alerts", "simulate"]);
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "simulate");
        assert_eq!(args.get_one::<usize>("subscribers"), Some(&25));
        assert!(args.get_one::<PathBuf>("config").is_none());
    }
}
