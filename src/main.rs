mod cli;

use anyhow::{Context, Result};
use cli::{args, expect_arg, graph_options};
use env_logger::Env;
use log::info;
use std::{fs::File, io::BufReader};
use tokenflow::{graph::GraphSession, hooks::replay};

fn main() -> Result<()> {
    let matches = args().get_matches();

    // process global flags
    let log_level = expect_arg(&matches, "verbose");

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    match matches.subcommand() {
        Some(("replay", args)) => {
            let input = expect_arg(args, "input-file");

            let file = File::open(input).with_context(|| format!("can not open trace {}", input))?;

            let mut session = GraphSession::new(graph_options(args));

            let stats = replay(&mut session, BufReader::new(file))
                .with_context(|| format!("can not replay trace {}", input))?;

            info!(
                "replayed {} records of {} into {} nodes",
                stats.records, input, stats.nodes
            );

            let functions: Vec<String> = session.functions().map(String::from).collect();

            for function in functions.iter() {
                for (terminal, path) in session.get_all_paths(function)? {
                    println!("{} path to {}: {:?}", function, terminal, path);
                }
            }

            for report in session.detect_loops()?.iter().filter(|r| r.is_loop()) {
                println!(
                    "{} loops before {} within {:?}",
                    report.function, report.terminal, report.span
                );
            }

            for anomaly in session.anomalies() {
                println!("anomaly at {}: {}", anomaly.uid, anomaly.error);
            }

            if args.get_flag("fingerprint") {
                for fingerprint in session.fingerprints() {
                    println!(
                        "{} {} ({} nodes, {} edges)",
                        fingerprint.hash, fingerprint.function, fingerprint.nodes, fingerprint.edges
                    );
                }
            }

            if let Some(function) = args.get_one::<String>("dot") {
                println!("{}", session.to_dot(function));
            }

            println!("{}", session.profiler());

            Ok(())
        }
        _ => unreachable!(),
    }
}
