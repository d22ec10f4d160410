use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use tracing::debug;
use vpack_manager::{ItemInfo, ManagerConfig, PackageManager};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig::default(),
    };
    config.auto_flush |= cli.auto_flush;
    debug!(auto_flush = config.auto_flush, "loaded configuration");

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(run(config, cli.command, cli.format))
}

/// Run one command, then release every package handle it opened.
async fn run(config: ManagerConfig, command: Command, format: OutputFormat) -> anyhow::Result<()> {
    let manager = PackageManager::new(config);
    let result = dispatch(&manager, command, format).await;
    let disposed = manager.dispose().await;
    result?;
    disposed?;
    Ok(())
}

async fn dispatch(
    manager: &PackageManager,
    command: Command,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match command {
        Command::Add(args) => cmd_add(manager, args, format).await,
        Command::Get(args) => cmd_get(manager, args).await,
        Command::Rm(args) => cmd_rm(manager, args, format).await,
        Command::Scrub(args) => cmd_scrub(manager, args, format).await,
        Command::Ls(args) => cmd_ls(manager, args, format).await,
    }
}

async fn cmd_add(manager: &PackageManager, args: AddArgs, format: OutputFormat) -> anyhow::Result<()> {
    let data = read_input(&args.file)?;
    manager.add_item(&args.package, &data, &args.virtual_path).await?;
    match format {
        OutputFormat::Text => println!(
            "{} Stored {} ({} bytes) in {}",
            "✓".green().bold(),
            args.virtual_path.yellow(),
            data.len(),
            args.package.display().to_string().bold()
        ),
        OutputFormat::Json => println!(
            "{}",
            json!({ "package": args.package, "path": args.virtual_path, "size": data.len() })
        ),
    }
    Ok(())
}

async fn cmd_get(manager: &PackageManager, args: GetArgs) -> anyhow::Result<()> {
    let data = manager.retrieve(&args.package, &args.virtual_path).await?;
    match &args.output {
        Some(path) => std::fs::write(path, &data)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn cmd_rm(manager: &PackageManager, args: RmArgs, format: OutputFormat) -> anyhow::Result<()> {
    manager.remove(&args.package, &args.virtual_path).await?;
    match format {
        OutputFormat::Text => println!("Removed {}", args.virtual_path.yellow()),
        OutputFormat::Json => println!(
            "{}",
            json!({ "package": args.package, "removed": args.virtual_path })
        ),
    }
    Ok(())
}

async fn cmd_scrub(
    manager: &PackageManager,
    args: ScrubArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let removed = manager.scrub_with_feedback(&args.package, args.keep.as_slice()).await?;
    match format {
        OutputFormat::Text => {
            for item in &removed {
                println!("  {} {} ({} bytes)", "removed:".red(), item.path, item.size);
            }
            println!("{} Scrub removed {} entries.", "✓".green(), removed.len());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&removed)?),
    }
    Ok(())
}

async fn cmd_ls(manager: &PackageManager, args: LsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut items = if args.dirs.is_empty() {
        manager.inventory_all(&args.package).await?
    } else {
        manager.inventory(&args.package, args.dirs.as_slice()).await?
    };
    items.sort_by(|a, b| a.path.to_string().cmp(&b.path.to_string()));

    match format {
        OutputFormat::Text => print_listing(&items),
        OutputFormat::Json => println!("{}", serde_json::to_string(&items)?),
    }
    Ok(())
}

fn print_listing(items: &[ItemInfo]) {
    if items.is_empty() {
        println!("No entries.");
        return;
    }
    let total: u64 = items.iter().map(|item| item.size).sum();
    for item in items {
        println!("{:>10}  {}", item.size.to_string().dimmed(), item.path);
    }
    println!("{} entries, {} bytes", items.len().to_string().bold(), total);
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut data = Vec::new();
        std::io::stdin().read_to_end(&mut data)?;
        return Ok(data);
    }
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}
