use crate::CLAP_STYLING;
use clap::{arg, command};

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("salecrawl")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("salecrawl")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" "Show debug logging (per-round frontiers and fetches)")
                .required(false)
                .conflicts_with("quiet"),
        )
        .subcommand_required(true)
        .subcommand(
            command!("init")
                .about("Initializes the salecrawl database on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location to store the salecrawl database")
                        .default_value("~/.config/salecrawl/"),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite any existing database at the specified location.")
                        .required(false),
                ),
        )
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl every http:// page reachable from URL within its registered domain, \
                recording which pages contain the marker string.",
                )
                .arg(arg!(<URL>).help("The seed URL to start crawling from"))
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Directory holding the salecrawl database")
                        .default_value("~/.config/salecrawl/"),
                )
                .arg(
                    arg!(-m --"marker" <TEXT>)
                        .required(false)
                        .help("Case-sensitive text that flags a page as matched")
                        .default_value("on-sale"),
                )
                .arg(
                    arg!(--"filter-dir" <PATH>)
                        .required(false)
                        .help("Directory for the seen-URL filter files (default: system temp dir)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"reuse-filter")
                        .required(false)
                        .help("Keep URLs seen by earlier runs against this domain excluded")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"capacity" <N>)
                        .required(false)
                        .help("Expected number of distinct URLs the filter is sized for")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("100000"),
                )
                .arg(
                    arg!(--"error-rate" <P>)
                        .required(false)
                        .help("Target false-positive rate of the seen-URL filter")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("0.001"),
                )
                .arg(
                    arg!(-t --"max-concurrency" <NUM_WORKERS>)
                        .required(false)
                        .help("Cap on concurrent fetches per round (default: the whole frontier)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds (default: none)")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, csv")
                        .value_parser(["text", "json", "csv"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("pages")
                .about("List the page records stored by the last crawl")
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Directory holding the salecrawl database")
                        .default_value("~/.config/salecrawl/"),
                )
                .arg(
                    arg!(--"matched")
                        .required(false)
                        .help("Only list pages that contained the marker")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Output format: text, json, csv")
                        .value_parser(["text", "json", "csv"])
                        .default_value("text"),
                ),
        )
}
