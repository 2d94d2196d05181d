//! Command-line definition.

use clap::{Arg, ArgAction, Command};

/// Build the `tessera` command tree.
pub fn build_cli() -> Command {
    Command::new("tessera")
        .about("Tiled multi-dimensional array storage engine")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("create")
                .about("Create an array from a JSON schema description")
                .arg(Arg::new("uri").required(true))
                .arg(Arg::new("schema-file").required(true)),
        )
        .subcommand(
            Command::new("write")
                .about("Write cells from a CSV file")
                .long_about(
                    "Write cells from a CSV file. Sparse arrays expect one \
                     coordinate per dimension before the attribute values; \
                     dense arrays expect attribute values only, in the \
                     layout's cell order.",
                )
                .arg(Arg::new("uri").required(true))
                .arg(Arg::new("csv").required(true))
                .arg(
                    Arg::new("layout")
                        .long("layout")
                        .value_name("LAYOUT")
                        .default_value("unordered")
                        .help("global, row-major, col-major, or unordered"),
                )
                .arg(
                    Arg::new("subarray")
                        .long("subarray")
                        .value_name("RANGES")
                        .help("lo:hi per dimension, comma separated (ordered dense writes)"),
                ),
        )
        .subcommand(
            Command::new("read")
                .about("Read a subarray")
                .arg(Arg::new("uri").required(true))
                .arg(
                    Arg::new("subarray")
                        .required(true)
                        .help("lo:hi per dimension, comma separated"),
                )
                .arg(
                    Arg::new("attributes")
                        .long("attributes")
                        .value_name("NAMES")
                        .help("Comma-separated attribute subset (default: all)"),
                )
                .arg(
                    Arg::new("layout")
                        .long("layout")
                        .value_name("LAYOUT")
                        .default_value("row-major")
                        .help("global, row-major, col-major, or unordered"),
                )
                .arg(
                    Arg::new("buffer-size")
                        .long("buffer-size")
                        .value_name("BYTES")
                        .value_parser(clap::value_parser!(usize))
                        .help(
                            "Single-submission mode: stop after one submit with \
                             this buffer capacity; exits 4 when incomplete",
                        ),
                ),
        )
        .subcommand(
            Command::new("consolidate")
                .about("Merge all fragments of an array into one")
                .arg(Arg::new("uri").required(true)),
        )
        .subcommand(
            Command::new("group-create")
                .about("Create a group")
                .arg(Arg::new("uri").required(true)),
        )
        .subcommand(
            Command::new("ls")
                .about("List the typed objects under a URI")
                .arg(Arg::new("uri").required(true))
                .arg(
                    Arg::new("walk")
                        .long("walk")
                        .value_name("ORDER")
                        .help("Recurse in 'pre' or 'post' order"),
                ),
        )
        .subcommand(
            Command::new("mv")
                .about("Move an object")
                .arg(Arg::new("src").required(true))
                .arg(Arg::new("dst").required(true))
                .arg(
                    Arg::new("overwrite")
                        .long("overwrite")
                        .action(ArgAction::SetTrue)
                        .help("Replace an existing destination of the same type"),
                ),
        )
        .subcommand(
            Command::new("rm")
                .about("Remove an object")
                .arg(Arg::new("uri").required(true)),
        )
        .subcommand(Command::new("version").about("Print the engine version"))
}
