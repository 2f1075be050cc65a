pub mod crawl;
pub mod data;
pub mod report;

use colored::Colorize;

pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "{} {}",
        "docaudit".bright_cyan().bold(),
        format!("v{}", version).dimmed()
    );
    println!("{}", "documentation crawl and broken-link audit".dimmed());
    println!();
}
