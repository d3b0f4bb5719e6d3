use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use salecrawl_core::data::Database;
use salecrawl_core::report::{
    ReportData, ReportFormat, gather_report_data, generate_report, save_report,
};
use salecrawl_scanner::CrawlEvent;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing::level_filters::LevelFilter;
use url::Url;

// Re-export crawl types and functions from salecrawl-core
pub use salecrawl_core::crawl::{CrawlEventCallback, CrawlOptions, execute_crawl, extract_url_path};

pub const DATABASE_FILE_NAME: &str = "salecrawl.db";

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if Url::parse(line).is_ok() {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if Url::parse(&with_scheme).is_ok() {
        return Some(with_scheme);
    }

    None
}

/// Expand `~` in a config directory and point at the database file inside it
pub fn resolve_db_path(config_dir: &str) -> PathBuf {
    let expanded = shellexpand::tilde(config_dir);
    Path::new(expanded.as_ref()).join(DATABASE_FILE_NAME)
}

/// Open the database, creating its directory and schema on first use
pub fn open_database(db_path: &Path) -> Result<Database> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Database::new(db_path).with_context(|| format!("Failed to open {}", db_path.display()))
}

/// Build crawl options from the `crawl` subcommand's arguments
pub fn options_from_matches(url: String, args: &ArgMatches) -> CrawlOptions {
    let mut options = CrawlOptions::new(url);
    if let Some(marker) = args.get_one::<String>("marker") {
        options.marker = marker.clone();
    }
    if let Some(capacity) = args.get_one::<usize>("capacity") {
        options.capacity = *capacity;
    }
    if let Some(rate) = args.get_one::<f64>("error-rate") {
        options.false_positive_rate = *rate;
    }
    options.filter_dir = args.get_one::<PathBuf>("filter-dir").cloned();
    options.reuse_filter = args.get_flag("reuse-filter");
    options.max_concurrency = args.get_one::<usize>("max-concurrency").copied();
    options.timeout_secs = args.get_one::<u64>("timeout").copied();
    options
}

pub fn report_format(args: &ArgMatches) -> ReportFormat {
    args.get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text)
}

/// Install the global tracing subscriber. Logs go to stderr so reports on
/// stdout stay clean.
pub fn init_tracing(quiet: bool, verbose: bool) {
    let level = if quiet {
        LevelFilter::ERROR
    } else if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Banner and other chatter go to stderr; stdout carries only reports.
pub fn print_banner() {
    eprintln!(
        "{} {}",
        "salecrawl".bright_magenta().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    eprintln!("{}", "same-domain crawler for marked pages".bright_black());
    eprintln!();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  SALECRAWL INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let config_dir = args
        .get_one::<String>("PATH")
        .context("No database path given")?;
    let force = args.get_flag("force");
    let db_loc = resolve_db_path(config_dir);
    let db_path = db_loc.as_path();

    println!(
        "{} Target: {}",
        "→".blue(),
        db_path.display().to_string().bright_white()
    );
    println!();

    if Database::exists(db_path) {
        if !force {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Database already exists at:");
            println!(
                "  {} {}",
                "•".yellow(),
                db_path.display().to_string().bright_white()
            );
            println!();

            let response = print_prompt("Would you like to overwrite it? [y/N]:")?;
            println!();

            if response != "y" && response != "yes" {
                println!("{} Keeping existing database", "→".blue());
                return Ok(());
            }
        }
        Database::drop(db_path)
            .with_context(|| format!("Failed to remove {}", db_path.display()))?;
        println!("{} Existing database removed", "✓".green().bold());
        println!();
    }

    println!("{} Creating database...", "→".blue());
    open_database(db_path)?;

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

fn crawl_spinner(quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

/// Turn crawl events into spinner updates and printed lines
pub fn progress_printer(spinner: ProgressBar) -> CrawlEventCallback {
    Arc::new(move |event: CrawlEvent| match event {
        CrawlEvent::CrawlStarted { scope, .. } => {
            spinner.set_message(format!("Crawling {}", scope));
        }
        CrawlEvent::RoundStarted { round, frontier } => {
            spinner.set_message(format!("Round {}: fetching {} page(s)", round, frontier));
        }
        CrawlEvent::PageFetched { url, matched, .. } => {
            if matched {
                spinner.println(format!("  {} {}", "✓".green().bold(), url));
            } else {
                debug!("Fetched {}", url);
            }
        }
        CrawlEvent::FetchFailed { url, reason } => {
            spinner.println(format!(
                "  {} {} {}",
                "⚠".yellow(),
                url,
                format!("({})", reason).bright_black()
            ));
        }
        CrawlEvent::RoundFinished(round) => {
            spinner.set_message(format!(
                "Round {} done: {} fetched, {} new link(s)",
                round.round, round.fetched, round.next_frontier
            ));
        }
        CrawlEvent::CrawlFinished { .. } => {}
    })
}

pub async fn handle_crawl(args: &ArgMatches, quiet: bool) -> Result<()> {
    handle_crawl_to(args, quiet, &mut io::stdout()).await
}

/// Run a crawl and write the report to `out` (or to `--output`).
pub async fn handle_crawl_to<W: Write>(args: &ArgMatches, quiet: bool, out: &mut W) -> Result<()> {
    let raw_url = args.get_one::<String>("URL").context("No URL given")?;
    let url = parse_url_line(raw_url).ok_or_else(|| anyhow!("Invalid URL '{}'", raw_url))?;

    let db_dir = args
        .get_one::<String>("db")
        .context("No database path given")?;
    let db = Arc::new(open_database(&resolve_db_path(db_dir))?);
    let options = options_from_matches(url, args);
    let format = report_format(args);
    let output = args.get_one::<PathBuf>("output");

    if !quiet {
        eprintln!("{} {}", "Crawling".bright_white().bold(), options.url.cyan());
        eprintln!("Marker: {}", options.marker.bright_white());
        match options.max_concurrency {
            Some(limit) => eprintln!("Workers: {}", limit),
            None => eprintln!("Workers: one per frontier URL"),
        }
        eprintln!();
    }

    let spinner = crawl_spinner(quiet)?;
    let result = execute_crawl(options, db.clone(), Some(progress_printer(spinner.clone()))).await;
    spinner.finish_and_clear();
    let summary = result.map_err(|e| anyhow!(e))?;

    info!(
        "Crawl finished after {} round(s) in {:.1}s",
        summary.rounds.len(),
        summary.elapsed.as_secs_f64()
    );
    if !quiet {
        eprintln!(
            "\n{} Crawl complete: {} page(s), {} matched, {} failed\n",
            "✓".green().bold(),
            summary.pages_fetched,
            summary.pages_matched.to_string().green(),
            summary.pages_failed
        );
    }

    let data = gather_report_data(&db, Some(&summary))?;
    emit_report(&data, &format, output, out)
}

pub fn handle_pages(args: &ArgMatches) -> Result<()> {
    handle_pages_to(args, &mut io::stdout())
}

/// List stored page records to `out` in the requested format.
pub fn handle_pages_to<W: Write>(args: &ArgMatches, out: &mut W) -> Result<()> {
    let db_dir = args
        .get_one::<String>("db")
        .context("No database path given")?;
    let db_path = resolve_db_path(db_dir);
    if !Database::exists(&db_path) {
        return Err(anyhow!(
            "No database at {}; run `salecrawl init` or `salecrawl crawl` first",
            db_path.display()
        ));
    }
    let db = open_database(&db_path)?;

    let mut data = gather_report_data(&db, None)?;
    if args.get_flag("matched") {
        data.pages.retain(|p| p.matched);
    }
    emit_report(&data, &report_format(args), None, out)
}

fn emit_report<W: Write>(
    data: &ReportData,
    format: &ReportFormat,
    output: Option<&PathBuf>,
    out: &mut W,
) -> Result<()> {
    let report = generate_report(data, format)?;
    match output {
        Some(path) => {
            save_report(&report, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            eprintln!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => {
            out.write_all(report.as_bytes())?;
            out.flush()?;
        }
    }
    Ok(())
}
