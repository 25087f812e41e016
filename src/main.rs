use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use colored::*;
use netaudit::{
    config::EngineConfig,
    report::{ScanReport, ScanStatus, Severity},
    scanner::{ScanEngine, ScanModule, ScanRequest},
    utils::{parse_ports, Logger},
};
use std::fs;
use std::process;
use std::time::Instant;

fn build_cli() -> Command {
    Command::new("netaudit")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Network assessment engine: port, SNMP and credentialed scanning")
        .arg(
            Arg::new("request")
                .short('r')
                .long("request")
                .value_name("FILE")
                .help("JSON scan request (targets, modules, credentials)")
                .required_unless_present("targets"),
        )
        .arg(
            Arg::new("targets")
                .short('t')
                .long("targets")
                .value_name("TARGETS")
                .help("Comma separated targets (IP, hostname, range or CIDR)")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("modules")
                .short('m')
                .long("modules")
                .value_name("MODULES")
                .help("Comma separated modules: network, snmp, web, ssh, database")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("ports")
                .short('p')
                .long("ports")
                .value_name("PORTS")
                .help("TCP ports for the network module (e.g., 22,80,8000-8010)"),
        )
        .arg(
            Arg::new("communities")
                .short('c')
                .long("communities")
                .value_name("LIST")
                .help("SNMP community strings to try")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file (default: ~/.netaudit.toml)"),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .value_name("COUNT")
                .help("Targets scanned at the same time")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("nvd")
                .long("nvd")
                .help("Correlate vulnerability findings against the NVD CVE API")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the JSON report to FILE instead of stdout"),
        )
        .arg(
            Arg::new("pretty")
                .long("pretty")
                .help("Pretty-print the JSON report")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Verbose logging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored summary")
                .action(ArgAction::SetTrue),
        )
}

fn load_config(matches: &clap::ArgMatches) -> anyhow::Result<EngineConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => EngineConfig::from_toml_file(path).with_context(|| format!("loading config {}", path))?,
        None => EngineConfig::load_default_config(),
    };

    if let Some(concurrency) = matches.get_one::<usize>("concurrency") {
        config = config.with_max_concurrent_targets(*concurrency);
    }
    if matches.get_flag("nvd") {
        config.lookup.enabled = true;
    }
    Ok(config)
}

fn build_request(matches: &clap::ArgMatches) -> anyhow::Result<ScanRequest> {
    let mut request = match matches.get_one::<String>("request") {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading request {}", path))?;
            serde_json::from_str::<ScanRequest>(&text).with_context(|| format!("parsing request {}", path))?
        }
        None => ScanRequest::default(),
    };

    if let Some(targets) = matches.get_many::<String>("targets") {
        request.targets = targets.cloned().collect();
    }
    if let Some(modules) = matches.get_many::<String>("modules") {
        request.modules = modules
            .map(|m| m.parse::<ScanModule>())
            .collect::<Result<Vec<_>, _>>()?;
    }
    if request.modules.is_empty() {
        request.modules = vec![ScanModule::Network, ScanModule::Snmp];
    }
    if let Some(spec) = matches.get_one::<String>("ports") {
        request.ports = Some(parse_ports(spec)?);
    }
    if let Some(communities) = matches.get_many::<String>("communities") {
        request.communities = Some(communities.cloned().collect());
    }
    Ok(request)
}

fn print_summary(report: &ScanReport) {
    let status = match report.status() {
        ScanStatus::Completed => "completed".bright_green().bold(),
        ScanStatus::Cancelled => "cancelled".bright_yellow().bold(),
        _ => "failed".bright_red().bold(),
    };

    eprintln!("\n{}", "=== Scan Summary ===".bright_magenta().bold());
    eprintln!("{} {}", "Scan:".bright_yellow(), report.scan_info.id.to_string().bright_white());
    eprintln!("{} {}", "Status:".bright_yellow(), status);
    eprintln!(
        "{} {}",
        "Targets:".bright_yellow(),
        report.scan_info.target_count.to_string().bright_white().bold()
    );
    if let Some(error) = &report.scan_info.error {
        eprintln!("{} {}", "Error:".bright_red(), error);
    }

    for severity in Severity::all() {
        let count = report.summary.count(severity).to_string();
        let label = format!("{:>9}:", severity.as_str());
        let line = match severity {
            Severity::Critical => format!("{} {}", label.bright_red().bold(), count.bright_red().bold()),
            Severity::High => format!("{} {}", label.red(), count.red()),
            Severity::Medium => format!("{} {}", label.bright_yellow(), count.bright_yellow()),
            Severity::Low => format!("{} {}", label.bright_blue(), count.bright_blue()),
            Severity::Info => format!("{} {}", label.white(), count.white()),
        };
        eprintln!("{}", line);
    }

    let mut notable: Vec<_> = report.findings.iter().filter(|f| f.severity >= Severity::Medium).collect();
    notable.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.id.cmp(&b.id)));
    if !notable.is_empty() {
        eprintln!("\n{}", "=== Notable Findings ===".bright_magenta().bold());
        for finding in notable {
            eprintln!(
                "{} {} {} {}",
                format!("[{}]", finding.severity.as_str()).bright_red(),
                finding.target.bright_cyan(),
                finding.title.bright_white().bold(),
                format!("({:.1})", finding.cvss_score).dimmed()
            );
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let matches = build_cli().get_matches();

    let level = if matches.get_flag("verbose") {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    Logger::init(level);

    if matches.get_flag("no-color") {
        colored::control::set_override(false);
    }

    let config = load_config(&matches)?;
    let request = build_request(&matches)?;
    let engine = ScanEngine::new(config)?;

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, cancelling scan");
            token.cancel();
        }
    });

    let started = Instant::now();
    let report = engine.run(request).await;
    Logger::log_scan_complete(started.elapsed(), report.scan_info.target_count, report.summary.total);

    let json = if matches.get_flag("pretty") {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    match matches.get_one::<String>("output") {
        Some(path) => fs::write(path, json).with_context(|| format!("writing report {}", path))?,
        None => println!("{}", json),
    }

    print_summary(&report);

    Ok(match report.status() {
        ScanStatus::Completed => 0,
        ScanStatus::Cancelled => 130,
        _ => 1,
    })
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
            process::exit(2);
        }
    }
}
