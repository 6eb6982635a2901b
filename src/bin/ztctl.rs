//! ztctl - Command-line interface for the zerotouch deployment daemon
//!
//! Usage:
//!   ztctl scan               Run a scan cycle now
//!   ztctl scan --dry-run     Classify and assemble without touching nginx
//!   ztctl status             Show daemon phase and config version
//!   ztctl report             Show the last scan report
//!   ztctl campaigns          List deployed campaign blocks
//!   ztctl clear-fatal        Clear the fatal failure latch
//!   ztctl version            Show daemon version

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::io::{Read, Write};
use std::net::TcpStream;

/// Default API URL
const DEFAULT_API_URL: &str = "http://127.0.0.1:9920";

/// Campaign entry in a scan report
#[derive(Debug, Deserialize)]
struct CampaignReportView {
    name: String,
    change: String,
    status: String,
    verdict: Option<String>,
    location: Option<String>,
    reason: Option<String>,
}

/// Cycle outcome in a scan report
#[derive(Debug, Deserialize)]
struct CycleView {
    result: String,
    version: Option<u64>,
    current_version: Option<u64>,
    restored_version: Option<u64>,
    diagnostic: Option<String>,
    error: Option<String>,
}

/// Scan report from the daemon
#[derive(Debug, Deserialize)]
struct ScanReportView {
    started_at: String,
    finished_at: String,
    dry_run: bool,
    campaigns: Vec<CampaignReportView>,
    cycle: CycleView,
}

/// Daemon status
#[derive(Debug, Deserialize)]
struct StatusView {
    phase: String,
    fatal: bool,
    current_version: Option<u64>,
    block_count: usize,
}

/// Deployed block summary
#[derive(Debug, Deserialize)]
struct BlockView {
    campaign: String,
    verdict: String,
    location: String,
    content_hash: String,
}

#[derive(Debug, Deserialize)]
struct CampaignsView {
    campaigns: Vec<BlockView>,
    count: usize,
}

#[derive(Debug, Deserialize)]
struct VersionView {
    name: String,
    version: String,
}

/// CLI command structure
#[derive(Debug)]
enum Command {
    Scan { dry_run: bool },
    Status,
    Report,
    Campaigns,
    ClearFatal,
    Version,
    Help,
}

/// Simple HTTP client for API calls
struct ApiClient {
    base_url: String,
    token: String,
}

impl ApiClient {
    fn new() -> Self {
        let base_url = env::var("ZEROTOUCH_API_URL")
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let token = env::var("ZEROTOUCH_API_TOKEN").unwrap_or_default();

        Self { base_url, token }
    }

    fn request(&self, method: &str, path: &str) -> Result<(u16, String)> {
        // Parse URL
        let url = format!("{}{}", self.base_url, path);
        let url = url.strip_prefix("http://").unwrap_or(&url);
        let (host_port, path) = if let Some(idx) = url.find('/') {
            (&url[..idx], &url[idx..])
        } else {
            (url, "/")
        };

        // Connect
        let mut stream = TcpStream::connect(host_port)
            .context(format!("Failed to connect to daemon at {}", self.base_url))?;

        stream.set_read_timeout(Some(std::time::Duration::from_secs(60)))?;
        stream.set_write_timeout(Some(std::time::Duration::from_secs(60)))?;

        // Build request
        let request = format!(
            "{} {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Authorization: Bearer {}\r\n\
             Content-Length: 0\r\n\
             Connection: close\r\n\
             \r\n",
            method, path, host_port, self.token
        );

        // Send request
        stream.write_all(request.as_bytes())?;
        stream.flush()?;

        // Read response
        let mut response = String::new();
        stream.read_to_string(&mut response)?;

        // Status code from the status line
        let status = response
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(0);

        // Body after headers
        let body = match response.find("\r\n\r\n") {
            Some(idx) => response[idx + 4..].to_string(),
            None => response,
        };

        Ok((status, body))
    }

    fn get(&self, path: &str) -> Result<(u16, String)> {
        self.request("GET", path)
    }

    fn post(&self, path: &str) -> Result<(u16, String)> {
        self.request("POST", path)
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let command = parse_command(&args[1..]);

    match command {
        Command::Help => print_help(),
        Command::Version => handle_version()?,
        Command::Scan { dry_run } => handle_scan(dry_run)?,
        Command::Status => handle_status()?,
        Command::Report => handle_report()?,
        Command::Campaigns => handle_campaigns()?,
        Command::ClearFatal => handle_clear_fatal()?,
    }

    Ok(())
}

fn parse_command(args: &[String]) -> Command {
    if args.is_empty() {
        return Command::Help;
    }

    match args[0].as_str() {
        "help" | "--help" | "-h" => Command::Help,
        "version" | "--version" | "-v" => Command::Version,
        "scan" => {
            let dry_run = args.iter().any(|a| a == "--dry-run" || a == "-n");
            Command::Scan { dry_run }
        }
        "status" => Command::Status,
        "report" => Command::Report,
        "campaigns" | "list" | "ls" => Command::Campaigns,
        "clear-fatal" | "clear_fatal" => Command::ClearFatal,
        _ => Command::Help,
    }
}

fn handle_scan(dry_run: bool) -> Result<()> {
    let client = ApiClient::new();

    if dry_run {
        let (status, body) = client.post("/scan/dry-run")?;
        check_status(status, &body)?;

        let report: ScanReportView = serde_json::from_str(&body)
            .context("Failed to parse scan report")?;
        print_report(&report);
    } else {
        let (status, body) = client.post("/scan")?;
        check_status(status, &body)?;

        println!("Scan queued.");
        println!();
        println!("Fetch the outcome once the cycle completes:");
        println!("  ztctl report");
    }

    Ok(())
}

fn handle_status() -> Result<()> {
    let client = ApiClient::new();
    let (status, body) = client.get("/status")?;
    check_status(status, &body)?;

    let daemon: StatusView = serde_json::from_str(&body)
        .context("Failed to parse status response")?;

    println!("Phase:           {}", daemon.phase);
    println!(
        "Config version:  {}",
        daemon
            .current_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "none committed yet".to_string())
    );
    println!("Deployed blocks: {}", daemon.block_count);

    if daemon.fatal {
        println!();
        println!("FATAL: automatic deployment is halted.");
        println!("Inspect nginx manually, then run: ztctl clear-fatal");
    }

    Ok(())
}

fn handle_report() -> Result<()> {
    let client = ApiClient::new();
    let (status, body) = client.get("/report")?;

    if status == 404 {
        println!("No scan has completed yet.");
        return Ok(());
    }
    check_status(status, &body)?;

    let report: ScanReportView = serde_json::from_str(&body)
        .context("Failed to parse scan report")?;
    print_report(&report);

    Ok(())
}

fn handle_campaigns() -> Result<()> {
    let client = ApiClient::new();
    let (status, body) = client.get("/campaigns")?;
    check_status(status, &body)?;

    let view: CampaignsView = serde_json::from_str(&body)
        .context("Failed to parse campaigns response")?;

    if view.campaigns.is_empty() {
        println!("No campaigns deployed.");
        return Ok(());
    }

    println!("  {:<24} {:<16} {:<28} HASH", "CAMPAIGN", "VERDICT", "LOCATION");
    for block in &view.campaigns {
        println!(
            "  {:<24} {:<16} {:<28} {}",
            block.campaign,
            block.verdict,
            block.location,
            &block.content_hash[..12.min(block.content_hash.len())],
        );
    }
    println!();
    println!("  Total: {} deployed", view.count);

    Ok(())
}

fn handle_clear_fatal() -> Result<()> {
    let client = ApiClient::new();
    let (status, body) = client.post("/fatal/clear")?;
    check_status(status, &body)?;

    #[derive(Deserialize)]
    struct ClearView {
        cleared: bool,
    }

    let view: ClearView = serde_json::from_str(&body)
        .context("Failed to parse response")?;

    if view.cleared {
        println!("Fatal latch cleared. The next scan cycle will deploy again.");
    } else {
        println!("Daemon was not in a fatal state; nothing to clear.");
    }

    Ok(())
}

fn handle_version() -> Result<()> {
    println!("ztctl {}", env!("CARGO_PKG_VERSION"));

    let client = ApiClient::new();
    match client.get("/version") {
        Ok((200, body)) => {
            if let Ok(view) = serde_json::from_str::<VersionView>(&body) {
                println!("daemon {} {}", view.name, view.version);
            }
        }
        _ => println!("daemon not reachable at {}", client.base_url),
    }

    Ok(())
}

fn check_status(status: u16, body: &str) -> Result<()> {
    match status {
        200 | 202 => Ok(()),
        401 => anyhow::bail!("unauthorized - set ZEROTOUCH_API_TOKEN"),
        _ => anyhow::bail!("daemon returned HTTP {}: {}", status, body.trim()),
    }
}

fn print_report(report: &ScanReportView) {
    if report.dry_run {
        println!("Scan report (dry run):");
    } else {
        println!("Scan report:");
    }
    println!("  Started:  {}", report.started_at);
    println!("  Finished: {}", report.finished_at);
    println!();

    if report.campaigns.is_empty() {
        println!("  No campaign directories found.");
    } else {
        println!("  {:<24} {:<10} {:<12} DETAIL", "CAMPAIGN", "CHANGE", "STATUS");
        for c in &report.campaigns {
            let detail = match (&c.location, &c.reason, &c.verdict) {
                (Some(loc), _, _) => loc.clone(),
                (None, Some(reason), _) => reason.clone(),
                (None, None, Some(verdict)) => verdict.clone(),
                _ => String::new(),
            };
            println!("  {:<24} {:<10} {:<12} {}", c.name, c.change, c.status, detail);
        }
    }
    println!();

    match report.cycle.result.as_str() {
        "committed" => {
            println!(
                "Cycle: committed config version {}",
                report.cycle.version.unwrap_or_default()
            );
        }
        "no-changes" => match report.cycle.current_version {
            Some(v) => println!("Cycle: no changes (config version {} still current)", v),
            None => println!("Cycle: no changes (nothing deployed yet)"),
        },
        "dry-run" => {
            println!(
                "Cycle: dry run assembled version {} (not applied)",
                report.cycle.version.unwrap_or_default()
            );
        }
        "validation-failed" => {
            println!("Cycle: validation failed, live config untouched");
            if let Some(diag) = &report.cycle.diagnostic {
                println!("  {}", diag.trim());
            }
        }
        "rolled-back" => {
            println!(
                "Cycle: reload failed, rolled back to version {}",
                report.cycle.restored_version.unwrap_or_default()
            );
            if let Some(err) = &report.cycle.error {
                println!("  {}", err.trim());
            }
        }
        "fatal" => {
            println!("Cycle: FATAL - rollback also failed, deployment halted");
            if let Some(err) = &report.cycle.error {
                println!("  {}", err.trim());
            }
            println!("  Inspect nginx manually, then run: ztctl clear-fatal");
        }
        "fatally-latched" => {
            println!("Cycle: skipped, daemon is in fatal state");
            println!("  Run: ztctl clear-fatal");
        }
        other => println!("Cycle: {}", other),
    }
}

fn print_help() {
    println!(
        r#"
ztctl - control the zerotouch deployment daemon

USAGE:
    ztctl <command> [options]

COMMANDS:
    scan                     Queue a scan cycle
    scan --dry-run           Classify and assemble without touching nginx
    status                   Show daemon phase, config version, block count
    report                   Show the last scan report
    campaigns                List deployed campaign blocks
    clear-fatal              Clear the fatal failure latch

    help                     Show this help
    version                  Show CLI and daemon versions

ENVIRONMENT:
    ZEROTOUCH_API_URL        Daemon API endpoint (default: http://127.0.0.1:9920)
    ZEROTOUCH_API_TOKEN      API authentication token
"#
    );
}
