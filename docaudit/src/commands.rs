use crate::CLAP_STYLING;
use clap::{ArgAction, arg, command, value_parser};
use docaudit_scanner::TagRule;
use std::path::PathBuf;
use url::Url;

/// Parse `NAME=PHRASE[;PHRASE...]` into a tag rule that needs every phrase.
pub fn parse_tag_rule(s: &str) -> Result<TagRule, String> {
    let (name, phrases) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PHRASE[;PHRASE...], got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("tag name is empty".to_string());
    }
    let phrases: Vec<&str> = phrases
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if phrases.is_empty() {
        return Err(format!("tag '{}' has no phrases", name));
    }
    Ok(TagRule::new(name, &phrases))
}

/// Scope overrides shared by `job add`, `run` and `crawl`.
fn scope_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-s --"subpath" <PATH>)
            .required(false)
            .help("Only follow links whose path starts with this prefix, e.g. /sql/docs"),
    )
    .arg(
        arg!(--"any-domain")
            .required(false)
            .help("Follow links to any domain (default: stay on the seed's domain)")
            .conflicts_with("subpath")
            .action(ArgAction::SetTrue),
    )
    .arg(
        arg!(-l --"limit" <PAGES>)
            .required(false)
            .help("Maximum number of pages to visit")
            .value_parser(value_parser!(usize)),
    )
    .arg(
        arg!(-k --"keyword" <KEYWORD>)
            .required(false)
            .help("Keyword to count on every page; repeat for several (default: the readiness set)")
            .action(ArgAction::Append),
    )
}

/// Fetch options shared by `run`, `crawl` and `work`.
fn exec_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-w --"workers" <NUM_WORKERS>)
            .required(false)
            .help("Number of concurrent fetches")
            .value_parser(value_parser!(usize))
            .default_value("4"),
    )
    .arg(
        arg!(--"timeout" <SECONDS>)
            .required(false)
            .help("Request timeout in seconds")
            .value_parser(value_parser!(u64))
            .default_value("10"),
    )
    .arg(
        arg!(--"tag" <RULE>)
            .required(false)
            .help("Extra tag as NAME=PHRASE[;PHRASE...], set when a page contains every phrase")
            .value_parser(parse_tag_rule)
            .action(ArgAction::Append),
    )
    .arg(
        arg!(--"not-found-title" <TITLE>)
            .required(false)
            .help("Page title that marks a missing page (default: \"Page Not Found\")"),
    )
}

/// Fetch and output options shared by `run` and `crawl`.
fn run_args(cmd: clap::Command) -> clap::Command {
    exec_args(cmd)
        .arg(
            arg!(--"pages-csv" <PATH>)
                .required(false)
                .help("Write the page classification table to this CSV file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(--"missing-csv" <PATH>)
                .required(false)
                .help("Write the broken-link report to this CSV file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(-f --"format" <FORMAT>)
                .required(false)
                .help("Report format: text, json")
                .value_parser(["text", "json"])
                .default_value("text"),
        )
        .arg(
            arg!(-o --"output" <PATH>)
                .required(false)
                .help("Save report to file (default: display to screen)")
                .value_parser(value_parser!(PathBuf)),
        )
}

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("docaudit")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("docaudit")
        .about("Crawl documentation sites, classify their pages and report broken links")
        .styles(CLAP_STYLING)
        .arg(
            arg!(--"db" <PATH>)
                .required(false)
                .global(true)
                .help("Database file (default: ~/.config/docaudit/docaudit.db)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true)
                .conflicts_with("verbose"),
        )
        .arg(
            arg!(-v --"verbose" "Log crawl details")
                .required(false)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            command!("init")
                .about("Creates the docaudit database")
                .arg(
                    arg!(--"force")
                        .help("Replace any existing database at the location")
                        .required(false),
                ),
        )
        .subcommand(
            command!("job")
                .about("Manage the job catalog")
                .subcommand_required(true)
                .subcommand(scope_args(
                    command!("add")
                        .about("Adds a job, replacing any job with the same type")
                        .arg(arg!(<JOB_TYPE>).help("Job type key, e.g. cloud-sql-docs"))
                        .arg(
                            arg!(-u --"url" <URL>)
                                .required(true)
                                .help("Seed URL")
                                .value_parser(value_parser!(Url)),
                        )
                        .arg(
                            arg!(--"daily")
                                .required(false)
                                .help("Include this job in `docaudit daily`")
                                .action(ArgAction::SetTrue),
                        ),
                ))
                .subcommand(command!("list").about("Lists all jobs"))
                .subcommand(
                    command!("show")
                        .about("Shows one job")
                        .arg(arg!(<JOB_TYPE>)),
                )
                .subcommand(
                    command!("remove")
                        .about("Removes a job")
                        .arg(arg!(<JOB_TYPE>)),
                ),
        )
        .subcommand(run_args(scope_args(
            command!("run")
                .about("Runs one job from the catalog")
                .arg(arg!(<JOB_TYPE>)),
        )))
        .subcommand(run_args(scope_args(
            command!("crawl")
                .about("Crawls a site without a catalog entry (recorded as job type 'adhoc')")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("Seed URL")
                        .value_parser(value_parser!(Url)),
                ),
        )))
        .subcommand(
            command!("request")
                .about("Queues a request to run a job")
                .arg(arg!(<JOB_TYPE>)),
        )
        .subcommand(command!("daily").about("Queues every job marked daily"))
        .subcommand(exec_args(
            command!("work").about("Runs queued requests until the queue is empty"),
        ))
        .subcommand(
            command!("runs")
                .about("Lists recent runs")
                .arg(
                    arg!(-j --"job" <JOB_TYPE>)
                        .required(false)
                        .help("Only runs of this job"),
                )
                .arg(
                    arg!(-n --"limit" <COUNT>)
                        .required(false)
                        .value_parser(value_parser!(usize))
                        .default_value("20"),
                ),
        )
        .subcommand(
            command!("report")
                .about("Reports on a stored run")
                .arg(arg!(<RUN_ID>))
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, csv")
                        .value_parser(["text", "json", "csv"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"missing-csv" <PATH>)
                        .required(false)
                        .help("Also write the broken-link report to this CSV file")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
}
