use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process;

use clap::{clap_app, ArgMatches};
use tracing::error;
use tracing_subscriber::EnvFilter;

use irl_mdp::{Action, Demonstration, LinearReward, MdpError, PipelineConfig, Result};

fn main() {
    let matches = clap_app!(irlmdp =>
        (version: "0.1")
        (author: "Thomas Robinson")
        (about: "Builds an empirical driving MDP from captured simulator data")
        (@arg VERBOSE: -v ... "Log verbosity, repeat for more detail")
        (@subcommand build =>
            (about: "Loads a session directory and reports the resulting model")
            (@arg DIR: --dir <DIR> "Directory holding the state table, transition table and trajectories")
            (@arg CONFIG: --config +takes_value "Pipeline config, json")
            (@arg DOT: --dot +takes_value "Write the transition support graph in dot format")
        )
        (@subcommand value =>
            (about: "Action values of a raw observation under a linear feature reward")
            (@arg DIR: --dir <DIR> "Session directory")
            (@arg CONFIG: --config +takes_value "Pipeline config, json")
            (@arg WEIGHTS: --weights <W> "Comma separated reward weights, one per feature")
            (@arg FEATURES: --features <F> "Comma separated raw feature values")
        )
    ).get_matches();

    init_logging(matches.occurrences_of("VERBOSE"));

    let outcome = match matches.subcommand() {
        ("build", Some(m)) => build(m),
        ("value", Some(m)) => value(m),
        (_, _) => {
            println!("{}", matches.usage());
            Ok(())
        }
    };

    if let Err(e) = outcome {
        error!(error = %e, "irlmdp failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging(verbosity: u64) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_config(m: &ArgMatches) -> Result<PipelineConfig> {
    match m.value_of("CONFIG") {
        Some(path) => PipelineConfig::from_json_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

fn load_demonstration(m: &ArgMatches) -> Result<Demonstration> {
    let config = load_config(m)?;
    let dir = m.value_of("DIR").unwrap_or(".");
    Demonstration::load(Path::new(dir), &config)
}

fn parse_list(value: &str) -> Result<Vec<f64>> {
    value
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| MdpError::InvalidConfig(format!("'{}' is not a number", v.trim())))
        })
        .collect()
}

fn build(m: &ArgMatches) -> Result<()> {
    let demonstration = load_demonstration(m)?;
    println!("{}", demonstration.summary());
    for skipped in demonstration.skipped().iter() {
        println!("skipped {}: {}", skipped.source, skipped.error);
    }
    let unreachable = demonstration.unreachable_terminals();
    if !unreachable.is_empty() {
        println!("terminal states not reached from any start: {:?}", unreachable);
    }
    if let Some(path) = m.value_of("DOT") {
        let dot = demonstration.relation().to_dot(demonstration.registry().len());
        let mut file = File::create(path)?;
        file.write_all(dot.as_bytes())?;
        println!("support graph written to {}", path);
    }
    Ok(())
}

fn value(m: &ArgMatches) -> Result<()> {
    let demonstration = load_demonstration(m)?;
    let reward = LinearReward::new(&parse_list(m.value_of("WEIGHTS").unwrap_or(""))?);
    let features = parse_list(m.value_of("FEATURES").unwrap_or(""))?;

    let state = demonstration.registry().lookup(&features)?;
    let rewards = reward.state_rewards(demonstration.registry())?.to_vec();
    for (action, v) in demonstration.action_values(state, &Action::ALL, &rewards)?.iter() {
        println!("state {} action {:?}: {:.6}", state, action, v);
    }
    match demonstration.best_action_for_features(&features, &Action::ALL, &reward) {
        Ok(best) => println!("best action: {:?}", best),
        Err(e @ MdpError::NoTransitionData { .. }) => println!("best action: undefined, {}", e),
        Err(e) => return Err(e),
    }
    Ok(())
}
