use colored::Colorize;
use docaudit::commands::command_argument_builder;
use docaudit::handlers::{
    handle_crawl, handle_daily, handle_init, handle_job_add, handle_job_list, handle_job_remove,
    handle_job_show, handle_report, handle_request, handle_run, handle_runs, handle_work,
    resolve_db_path,
};
use docaudit_core::print_banner;
use std::path::PathBuf;
use tracing::Level;

fn init_tracing(quiet: bool, verbose: bool) {
    let level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let matches = command_argument_builder().get_matches();
    let quiet = matches.get_flag("quiet");
    let verbose = matches.get_flag("verbose");

    init_tracing(quiet, verbose);

    if !quiet {
        print_banner();
    }

    let db_path = resolve_db_path(matches.get_one::<PathBuf>("db"));

    let result = match matches.subcommand() {
        Some(("init", args)) => handle_init(&db_path, args.get_flag("force")),
        Some(("job", args)) => match args.subcommand() {
            Some(("add", sub)) => handle_job_add(&db_path, sub),
            Some(("list", _)) => handle_job_list(&db_path),
            Some(("show", sub)) => handle_job_show(&db_path, sub),
            Some(("remove", sub)) => handle_job_remove(&db_path, sub),
            _ => unreachable!("clap should ensure we don't get here"),
        },
        Some(("run", args)) => handle_run(&db_path, args, quiet).await,
        Some(("crawl", args)) => handle_crawl(&db_path, args, quiet).await,
        Some(("request", args)) => handle_request(&db_path, args),
        Some(("daily", _)) => handle_daily(&db_path),
        Some(("work", args)) => handle_work(&db_path, args, quiet).await,
        Some(("runs", args)) => handle_runs(&db_path, args),
        Some(("report", args)) => handle_report(&db_path, args),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    }
}
