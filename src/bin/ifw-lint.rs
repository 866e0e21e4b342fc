use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use intent_firewall::parser::parse_rules_document;
use intent_firewall::rule::RuleKind;

/// Validate intent firewall rule files without loading them into a running
/// service. Exits nonzero when any file fails or any rule is dropped.
#[derive(Debug, Parser)]
#[command(name = "ifw-lint", version, about = "Validate intent firewall rule files")]
struct Cli {
    /// Files or directories to check (directories are scanned for *.xml).
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Emit a machine-readable JSON report instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default, Serialize)]
struct FileReport {
    file: PathBuf,
    activity: usize,
    broadcast: usize,
    service: usize,
    provider: usize,
    package: usize,
    dropped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl FileReport {
    fn clean(&self) -> bool {
        self.error.is_none() && self.dropped.is_empty()
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("ifw-lint: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let mut files = Vec::new();
    for path in &cli.paths {
        if path.is_dir() {
            collect_xml_files(path, &mut files)
                .with_context(|| format!("failed to scan {}", path.display()))?;
        } else {
            files.push(path.clone());
        }
    }
    files.sort();

    let reports: Vec<FileReport> = files.iter().map(|f| lint_file(f)).collect();
    let all_clean = reports.iter().all(FileReport::clean);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
        println!(
            "{} file(s) checked, {} problem(s)",
            reports.len(),
            reports.iter().filter(|r| !r.clean()).count()
        );
    }
    Ok(all_clean)
}

fn collect_xml_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_rule_file = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".xml"));
        if is_rule_file {
            out.push(path);
        }
    }
    Ok(())
}

fn lint_file(file: &Path) -> FileReport {
    let mut report = FileReport {
        file: file.to_path_buf(),
        ..FileReport::default()
    };

    let content = match std::fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) => {
            report.error = Some(format!("read failed: {e}"));
            return report;
        }
    };

    match parse_rules_document(&content) {
        Ok(outcome) => {
            for (kind, _) in &outcome.rules {
                match kind {
                    RuleKind::Activity => report.activity += 1,
                    RuleKind::Broadcast => report.broadcast += 1,
                    RuleKind::Service => report.service += 1,
                    RuleKind::Provider => report.provider += 1,
                    RuleKind::Package => report.package += 1,
                }
            }
            report.dropped = outcome.dropped.iter().map(|e| e.to_string()).collect();
        }
        Err(e) => report.error = Some(e.to_string()),
    }
    report
}

fn print_report(report: &FileReport) {
    if let Some(error) = &report.error {
        println!("{}: ERROR: {error}", report.file.display());
        return;
    }
    println!(
        "{}: A:{} B:{} S:{} C:{} P:{}",
        report.file.display(),
        report.activity,
        report.broadcast,
        report.service,
        report.provider,
        report.package,
    );
    for dropped in &report.dropped {
        println!("  dropped rule: {dropped}");
    }
}
