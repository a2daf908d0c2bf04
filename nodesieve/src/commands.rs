use crate::CLAP_STYLING;
use clap::{arg, command};
use std::path::PathBuf;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("nodesieve")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("nodesieve")
        .about("Fetch proxy subscriptions, probe every node and keep the fastest")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress progress and status output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(--"verbose" "Log pipeline stages (RUST_LOG overrides)")
                .required(false)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            command!("check")
                .about(
                    "Fetch every subscription in the list, probe the nodes they advertise and \
                write the fastest in base64 batches.",
                )
                .arg(
                    arg!(-s --"subs" <PATH>)
                        .required(false)
                        .help("Newline-delimited list of subscription URLs")
                        .default_value("source/subs.txt"),
                )
                .arg(
                    arg!(-o --"output" <DIR>)
                        .required(false)
                        .help("Directory that receives one run-<timestamp> directory per run")
                        .default_value("output"),
                )
                .arg(
                    arg!(-t --"threads" <NUM_WORKERS>)
                        .required(false)
                        .help("Maximum number of probes in flight")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("32"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Connect timeout per node in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("3"),
                )
                .arg(
                    arg!(--"max-delay" <MS>)
                        .required(false)
                        .help("Nodes slower than this many milliseconds are discarded")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("5000"),
                )
                .arg(
                    arg!(--"max-save" <COUNT>)
                        .required(false)
                        .help("Maximum number of nodes kept after ranking")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("6666"),
                )
                .arg(
                    arg!(--"batch-size" <COUNT>)
                        .required(false)
                        .help("Nodes per output file")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("666"),
                )
                .arg(
                    arg!(--"min-batch" <COUNT>)
                        .required(false)
                        .help("Smaller groups are not written")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("99"),
                )
                .arg(
                    arg!(--"keep-runs" <COUNT>)
                        .required(false)
                        .help("Number of run directories kept in the output directory")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                )
                .arg(
                    arg!(--"fetch-timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout per subscription in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("5"),
                )
                .arg(
                    arg!(--"fetch-threads" <NUM_WORKERS>)
                        .required(false)
                        .help("Maximum number of subscription requests in flight")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("8"),
                )
                .arg(
                    arg!(--"dedup-by-address")
                        .required(false)
                        .help("Treat nodes on the same host:port as duplicates whatever their protocol")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"no-mark-failed")
                        .required(false)
                        .help("Leave subscriptions that failed to fetch active in the list")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Run report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("decode")
                .about("Print the nodes stored in an output file")
                .arg(
                    arg!(<FILE>)
                        .required(true)
                        .help("A sub<N>.txt file written by check")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"json")
                        .required(false)
                        .help("Print the nodes as a JSON array")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
}
