use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::Value;
use sluice_gateway::{
    metadata, ArtifactId, ArtifactPath, Backends, CheckReport, Gateway, GatewayConfig,
    LedgerEntry, StaticAuthDb, TracingAuditLog, UploadReceipt, UploadStatus,
};
use sluice_ledger::UploadLedger;
use sluice_server::SluiceServer;
use tracing::warn;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let format = cli.format;
    match cli.command {
        Command::Serve(args) => cmd_serve(config, args),
        Command::Check(args) => cmd_check(&config, format, args),
        Command::Upload(args) => cmd_upload(&config, format, args),
        Command::PackGet(args) => cmd_pack_get(&config, args),
        Command::PackLs(args) => cmd_pack_ls(&config, format, args),
        Command::Locks(args) => cmd_locks(&config, format, args),
        Command::History(args) => cmd_history(&config, format, args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    let Some(path) = path else {
        let config = GatewayConfig::default();
        config.validate()?;
        return Ok(config);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    GatewayConfig::from_toml_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn open_backends(config: &GatewayConfig) -> anyhow::Result<Backends> {
    Backends::open_local(config).context("opening local backends")
}

fn artifact_path(config: &GatewayConfig, path: &str) -> anyhow::Result<ArtifactPath> {
    ArtifactPath::with_prefix(&config.path_prefix, path).with_context(|| format!("invalid path `{path}`"))
}

fn artifact_id(config: &GatewayConfig, path: &str, key: Option<String>) -> anyhow::Result<ArtifactId> {
    let path = artifact_path(config, path)?;
    match key {
        Some(key) => ArtifactId::packed(path, key).context("invalid record key"),
        None => Ok(ArtifactId::plain(path)),
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_serve(mut config: GatewayConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if config.auth.keys.is_empty() {
        warn!("no API keys configured; every request will be refused");
    }
    let backends = open_backends(&config)?;
    let auth = StaticAuthDb::new(config.auth.keys.clone());
    let gateway = Gateway::new(config, backends, Arc::new(auth), Arc::new(TracingAuditLog));
    let server = SluiceServer::new(gateway);
    println!("Sluice gateway on {}", server.bind_addr().to_string().bold());

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(server.serve())?;
    Ok(())
}

fn cmd_check(config: &GatewayConfig, format: OutputFormat, args: CheckArgs) -> anyhow::Result<()> {
    let backends = open_backends(config)?;
    let reconciler = backends.reconciler(config);
    let id = artifact_id(config, &args.path, args.key)?;
    let report = reconciler.packed_check(&id)?;
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            print_report(&report);
            Ok(())
        }
    }
}

fn print_report(report: &CheckReport) {
    match &report.logical_key {
        Some(key) => println!("{} [{}]", report.path.to_string().bold(), key.cyan()),
        None => println!("{}", report.path.to_string().bold()),
    }
    match &report.ledger_entry {
        Some(entry) => println!(
            "  ledger:  {} (attempt {}, by {})",
            status_label(entry.status),
            entry.attempt,
            entry.uploader
        ),
        None => println!("  ledger:  {}", "absent".dimmed()),
    }
    let file = if report.file_present { "present".green() } else { "absent".dimmed() };
    println!("  file:    {file}");
    if let Some(in_container) = report.file_in_container {
        let record = if in_container { "present".green() } else { "absent".dimmed() };
        println!("  record:  {record}");
    }
    if report.locked {
        println!("  lock:    {}", "held".yellow());
    }
    if let Some(digest) = &report.observed_digest {
        let verdict = match report.digest_matches() {
            Some(true) => "✓ matches ledger".green(),
            Some(false) => "✗ differs from ledger".red().bold(),
            None => "".normal(),
        };
        println!("  digest:  {} {verdict}", digest.to_string().yellow());
    }
    for fault in &report.secondary_faults {
        println!("  {} {}", "warning:".yellow(), fault);
    }
}

fn status_label(status: UploadStatus) -> colored::ColoredString {
    match status {
        UploadStatus::Pending => "pending".yellow(),
        UploadStatus::Complete => "complete".green(),
        UploadStatus::Failed => "failed".red(),
    }
}

fn cmd_upload(config: &GatewayConfig, format: OutputFormat, args: UploadArgs) -> anyhow::Result<()> {
    let meta: Value = metadata::parse(&args.meta).context("invalid --meta")?;
    let mut file = File::open(&args.file)
        .with_context(|| format!("opening {}", args.file.display()))?;
    let backends = open_backends(config)?;
    let coordinator = backends.coordinator(config);
    let receipt = match artifact_id(config, &args.path, args.key)? {
        id if id.is_packed() => coordinator.packed_upload(&id, meta, &args.uploader, &mut file)?,
        id => coordinator.upload(&id.path, meta, &args.uploader, &mut file)?,
    };
    match format {
        OutputFormat::Json => print_json(&receipt),
        OutputFormat::Text => {
            print_receipt(&receipt);
            Ok(())
        }
    }
}

fn print_receipt(receipt: &UploadReceipt) {
    println!("{} Uploaded {}", "✓".green().bold(), receipt.id.to_string().bold());
    println!("  Digest: {}", receipt.digest.to_string().yellow());
    println!("  Bytes:  {}", receipt.bytes);
    if let Some(attempt) = receipt.attempt {
        println!("  Attempt: {attempt}");
    }
    for fault in &receipt.secondary_faults {
        println!("  {} {}", "warning:".yellow(), fault);
    }
}

fn cmd_pack_get(config: &GatewayConfig, args: PackGetArgs) -> anyhow::Result<()> {
    let backends = open_backends(config)?;
    let path = artifact_path(config, &args.path)?;
    let Some(payload) = backends.packed().lookup(&path, &args.key)? else {
        bail!("no record `{}` in {}", args.key, path);
    };
    match args.output {
        Some(out) => std::fs::write(&out, &payload)
            .with_context(|| format!("writing {}", out.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&payload)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn cmd_pack_ls(config: &GatewayConfig, format: OutputFormat, args: PackLsArgs) -> anyhow::Result<()> {
    let backends = open_backends(config)?;
    let path = artifact_path(config, &args.path)?;
    let keys = backends
        .packed()
        .list_keys(&path)?
        .collect::<Result<Vec<_>, _>>()?;
    match format {
        OutputFormat::Json => print_json(&keys),
        OutputFormat::Text => {
            if keys.is_empty() {
                println!("No records.");
            }
            for key in &keys {
                println!("{key}");
            }
            Ok(())
        }
    }
}

fn cmd_locks(config: &GatewayConfig, format: OutputFormat, args: LocksArgs) -> anyhow::Result<()> {
    let backends = open_backends(config)?;
    match args.action {
        LocksAction::List => {
            let held = backends.locks.held()?;
            match format {
                OutputFormat::Json => print_json(&held)?,
                OutputFormat::Text if held.is_empty() => println!("No locks held."),
                OutputFormat::Text => {
                    for lock in &held {
                        let expiry = match lock.expires_at {
                            Some(at) => format!("expires {}", at.to_rfc3339()),
                            None => "no lease".into(),
                        };
                        println!(
                            "{}  {}  since {}  {}",
                            lock.path.to_string().bold(),
                            lock.owner.to_string().dimmed(),
                            lock.acquired_at.to_rfc3339(),
                            expiry.cyan()
                        );
                    }
                }
            }
        }
        LocksAction::Release { path } => {
            let path = artifact_path(config, &path)?;
            if backends.locks.force_release(&path)? {
                println!("{} Released lock on {}", "✓".green().bold(), path.to_string().bold());
            } else {
                println!("No lock held on {}", path.to_string().bold());
            }
        }
    }
    Ok(())
}

fn cmd_history(config: &GatewayConfig, format: OutputFormat, args: HistoryArgs) -> anyhow::Result<()> {
    let backends = open_backends(config)?;
    let id = artifact_id(config, &args.path, args.key)?;
    let entries = backends.ledger.history(&id)?;
    match format {
        OutputFormat::Json => print_json(&entries),
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No ledger entries for {}.", id.to_string().bold());
            }
            for entry in &entries {
                print_entry(entry);
            }
            Ok(())
        }
    }
}

fn print_entry(entry: &LedgerEntry) {
    println!(
        "{}  {}  {}  by {}",
        format!("#{}", entry.attempt).yellow().bold(),
        status_label(entry.status),
        entry.created_at.to_rfc3339().dimmed(),
        entry.uploader
    );
    if let Some(digest) = &entry.digest {
        println!("  Digest: {digest}");
    }
    for error in &entry.error_history {
        println!("  {} {}  {}", "error:".red(), error.at.to_rfc3339().dimmed(), error.message);
    }
}
