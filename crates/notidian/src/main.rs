use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use notidian_core::filesystem::{display_path, scan_vault};
use notidian_core::runtime::{
    ResolutionContext, ResolvedSettings, SettingOverrides, resolve_settings,
};
use notidian_core::sync::{SyncOptions, SyncReport, sync_vault};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "notidian",
    version,
    about = "Mirror a Notion page tree into an Obsidian vault"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Vault directory to write into")]
    vault: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    vault: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            vault: cli.vault.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Mirror the page tree into the vault")]
    Sync(SyncArgs),
    #[command(about = "List mirrored files found in the vault")]
    Status(StatusArgs),
    #[command(about = "Print resolved settings and where they came from")]
    Config,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, value_name = "ID", help = "Root page id or URL (overrides NOTION_ROOT_PAGE_ID)")]
    root_page: Option<String>,
    #[arg(long, help = "Discover pages and report destinations without writing")]
    dry_run: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long, help = "Print the scan as JSON")]
    json: bool,
}

#[derive(Debug, Serialize)]
struct StatusOutput<'a> {
    vault_root: String,
    vault_exists: bool,
    scan: &'a notidian_core::filesystem::VaultScan,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(&log_directive(|key| std::env::var(key).ok()));
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Sync(args)) => run_sync(&runtime, args),
        Some(Commands::Status(args)) => run_status(&runtime, args),
        Some(Commands::Config) => run_config(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

/// `RUST_LOG` from the process or `.env`, else `info`.
fn log_directive<F>(lookup_env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup_env("RUST_LOG")
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

fn init_tracing(directive: &str) {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_sync(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let settings = resolve_runtime_settings(runtime, args.root_page.clone())?;
    let config = settings.sync_config()?;
    if runtime.diagnostics {
        eprintln!("[diagnostics]\n{}\n", settings.diagnostics());
    }

    let report = sync_vault(
        &config,
        &SyncOptions {
            dry_run: args.dry_run,
        },
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_sync_report(&config.vault_root, &report);
    }
    Ok(())
}

fn print_sync_report(vault_root: &std::path::Path, report: &SyncReport) {
    println!("notion sync");
    println!("vault_root: {}", display_path(vault_root));
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("discovered: {}", report.discovered);
    println!("written: {}", report.written);
    println!("created: {}", report.created);
    println!("updated: {}", report.updated);
    println!("unchanged: {}", report.unchanged);
    println!("skipped: {}", report.skipped);
    println!("collisions: {}", report.collisions.len());
    println!("stale: {}", report.stale.len());
    println!("request_count: {}", report.request_count);
    println!("success: {}", format_flag(report.success));

    if !report.pages.is_empty() {
        println!("pages:");
        for page in &report.pages {
            match &page.detail {
                Some(detail) => println!(
                    "  - {} {} ({detail})",
                    page.action.as_str(),
                    page.relative_path
                ),
                None => println!("  - {} {}", page.action.as_str(), page.relative_path),
            }
        }
    }
    if !report.collisions.is_empty() {
        println!("collisions:");
        for collision in &report.collisions {
            println!(
                "  - {} -> {} ({})",
                collision.wanted, collision.placed, collision.page_id
            );
        }
    }
    if !report.stale.is_empty() {
        println!("stale:");
        for file in &report.stale {
            match &file.current_path {
                Some(current) => println!(
                    "  - {} (moved to {current})",
                    file.relative_path
                ),
                None => println!("  - {} ({})", file.relative_path, file.notion_id),
            }
        }
    }
    if !report.errors.is_empty() {
        println!("errors:");
        for error in &report.errors {
            println!("  - {error}");
        }
    }
}

fn run_status(runtime: &RuntimeOptions, args: StatusArgs) -> Result<()> {
    let settings = resolve_runtime_settings(runtime, None)?;
    let vault_root = settings.require_vault_root()?;
    let scan = scan_vault(vault_root)?;

    if args.json {
        let output = StatusOutput {
            vault_root: display_path(vault_root),
            vault_exists: vault_root.exists(),
            scan: &scan,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("vault status");
    println!("vault_root: {}", display_path(vault_root));
    println!("vault_exists: {}", format_flag(vault_root.exists()));
    println!("mirrored_files: {}", scan.files.len());
    println!("without_header: {}", scan.without_header);
    println!("duplicate_ids: {}", scan.duplicate_ids.len());
    if !scan.files.is_empty() {
        println!("files:");
        for file in &scan.files {
            println!(
                "  - {} notion_id={} last_sync={}",
                file.relative_path,
                file.notion_id.as_deref().unwrap_or("<none>"),
                file.last_sync.as_deref().unwrap_or("<none>")
            );
        }
    }
    if !scan.duplicate_ids.is_empty() {
        println!("duplicates:");
        for (id, paths) in &scan.duplicate_ids {
            println!("  - {id}: {}", paths.join(", "));
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", settings.diagnostics());
    }
    Ok(())
}

fn run_config(runtime: &RuntimeOptions) -> Result<()> {
    let settings = resolve_runtime_settings(runtime, None)?;
    println!("resolved configuration");
    println!("{}", settings.diagnostics());
    Ok(())
}

fn resolve_runtime_settings(
    runtime: &RuntimeOptions,
    root_page_id: Option<String>,
) -> Result<ResolvedSettings> {
    let context = ResolutionContext::from_process()?;
    let overrides = SettingOverrides {
        config: runtime.config.clone(),
        vault_path: runtime.vault.clone(),
        root_page_id,
    };
    resolve_settings(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::log_directive;

    #[test]
    fn log_directive_reads_values_from_env_file() {
        let temp = tempdir().expect("tempdir");
        let env_file = temp.path().join(".env");
        fs::write(&env_file, "NOTION_TOKEN=secret\nRUST_LOG=notidian_core=debug\n")
            .expect("write .env");

        let loaded = dotenvy::from_path_iter(&env_file)
            .expect("open .env")
            .collect::<Result<HashMap<_, _>, _>>()
            .expect("parse .env");
        assert_eq!(
            log_directive(|key| loaded.get(key).cloned()),
            "notidian_core=debug"
        );
    }

    #[test]
    fn log_directive_defaults_to_info() {
        assert_eq!(log_directive(|_| None), "info");
        assert_eq!(log_directive(|_| Some("  ".to_string())), "info");
    }
}
