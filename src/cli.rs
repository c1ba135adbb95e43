use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use tokenflow::graph::{defaults, GraphOptions};

pub const LOGGING_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn expect_arg<'a>(m: &'a ArgMatches, arg: &str) -> &'a str {
    m.get_one::<String>(arg)
        .map(String::as_str)
        .unwrap_or_else(|| panic!("argument \"{}\" has to be set in CLI at all times", arg))
}

pub fn args() -> Command {
    command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("configure logging level to use")
                .value_name("LEVEL")
                .value_parser(LOGGING_LEVELS)
                .default_value(LOGGING_LEVELS[2])
                .global(true),
        )
        .subcommand(
            Command::new("replay")
                .about("Build the dataflow graph of a JSON-lines instruction trace")
                .arg(
                    Arg::new("input-file")
                        .help("Trace with one pre or post hook record per line")
                        .value_name("FILE")
                        .required(true),
                )
                .arg(
                    Arg::new("start-node-limit")
                        .help("Number of steps after which a start-node search is aborted [default: 2000]")
                        .long("start-node-limit")
                        .value_name("NUMBER")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("loop-threshold")
                        .help("Re-entries of a jump destination along one path that still count as no loop [default: 2]")
                        .long("loop-threshold")
                        .value_name("NUMBER")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("eager")
                        .help("Normalize operands when their node is created")
                        .long("eager")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("fingerprint")
                        .help("Print the business-logic fingerprint of every function")
                        .short('f')
                        .long("fingerprint")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("dot")
                        .help("Print the graph of a function in dot format")
                        .long("dot")
                        .value_name("FUNCTION"),
                ),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
}

pub fn graph_options(args: &ArgMatches) -> GraphOptions {
    GraphOptions {
        start_node_limit: args
            .get_one::<usize>("start-node-limit")
            .copied()
            .unwrap_or(defaults::START_NODE_LIMIT),
        loop_threshold: args
            .get_one::<usize>("loop-threshold")
            .copied()
            .unwrap_or(defaults::LOOP_THRESHOLD),
        eager_normalization: args.get_flag("eager"),
        ..Default::default()
    }
}
