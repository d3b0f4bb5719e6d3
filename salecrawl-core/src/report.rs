// Report generation from the page record store

use crate::crawl::extract_url_path;
use crate::data::{CrawlRun, Database, PageRecord};
use rusqlite::Result;
use salecrawl_scanner::{CrawlSummary, RoundSummary};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<CrawlRun>,
    pub total_pages: usize,
    pub matched_pages: usize,
    pub pages: Vec<PageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rounds: Option<Vec<RoundSummary>>,
}

pub fn gather_report_data(db: &Database, summary: Option<&CrawlSummary>) -> Result<ReportData> {
    let run = db.get_latest_run()?;
    let pages = db.get_pages()?;
    let matched_pages = pages.iter().filter(|p| p.matched).count();

    Ok(ReportData {
        run,
        total_pages: pages.len(),
        matched_pages,
        pages,
        rounds: summary.map(|s| s.rounds.clone()),
    })
}

pub fn generate_report(data: &ReportData, format: &ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(data)),
        ReportFormat::Json => generate_json_report(data),
        ReportFormat::Csv => Ok(generate_csv_report(data)),
    }
}

pub fn generate_text_report(data: &ReportData) -> String {
    let rule = "━".repeat(60);
    let mut report = String::new();

    report.push_str(&format!("{}\n", rule));
    report.push_str("                 SALECRAWL REPORT\n");
    report.push_str(&format!("{}\n\n", rule));

    if let Some(ref run) = data.run {
        report.push_str(&format!("Start URL:    {}\n", run.start_url));
        report.push_str(&format!("Scope:        {}\n", run.scope));
        report.push_str(&format!("Status:       {}\n", run.status.as_str()));
        report.push_str(&format!("Started:      {}\n", format_timestamp(run.started_at)));
        if let Some(finished) = run.finished_at {
            report.push_str(&format!("Duration:     {} seconds\n", finished - run.started_at));
        }
        report.push_str(&format!("Rounds:       {}\n", run.rounds));
        report.push_str(&format!("Failed:       {}\n", run.pages_failed));
    }
    report.push_str(&format!("Pages:        {}\n", data.total_pages));
    report.push_str(&format!("Matched:      {}\n\n", data.matched_pages));

    if let Some(ref rounds) = data.rounds
        && !rounds.is_empty()
    {
        report.push_str(&format!("{}\n", rule));
        report.push_str("ROUNDS\n");
        report.push_str(&format!("{}\n\n", rule));
        for round in rounds {
            report.push_str(&format!(
                "  #{:<3} fetched {:<5} matched {:<5} failed {:<5} next {}\n",
                round.round, round.fetched, round.matched, round.failed, round.next_frontier
            ));
        }
        report.push('\n');
    }

    report.push_str(&format!("{}\n", rule));
    report.push_str("PAGES\n");
    report.push_str(&format!("{}\n\n", rule));

    if data.pages.is_empty() {
        report.push_str("  (none)\n");
    }
    for page in &data.pages {
        let indicator = if page.matched { "✓" } else { "·" };
        report.push_str(&format!("  {} {}\n", indicator, page.url));
    }
    report.push('\n');

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "salecrawl",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json"
            },
            "run": data.run.as_ref().map(|run| serde_json::json!({
                "id": run.id,
                "start_url": run.start_url,
                "scope": run.scope,
                "status": run.status.as_str(),
                "started_at": format_iso8601_timestamp(run.started_at),
                "finished_at": run.finished_at.map(format_iso8601_timestamp),
                "rounds": run.rounds,
                "pages_failed": run.pages_failed
            })),
            "summary": {
                "total_pages": data.total_pages,
                "matched_pages": data.matched_pages
            },
            "rounds": data.rounds,
            "pages": data.pages.iter().map(|page| serde_json::json!({
                "url": page.url,
                "path": extract_url_path(&page.url),
                "matched": page.matched,
                "fetched_at": format_iso8601_timestamp(page.fetched_at)
            })).collect::<Vec<_>>()
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn generate_csv_report(data: &ReportData) -> String {
    let mut csv = String::from("url,matched,fetched_at\n");
    for page in &data.pages {
        csv.push_str(&format!(
            "{},{},{}\n",
            escape_csv(&page.url),
            page.matched,
            format_iso8601_timestamp(page.fetched_at)
        ));
    }
    csv
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn escape_csv(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn format_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_iso8601_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.to_rfc3339()
}
