use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vpack",
    about = "Store and retrieve files inside single-file vpack packages",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Close the package after every operation
    #[arg(long, global = true)]
    pub auto_flush: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a file at a virtual path
    Add(AddArgs),
    /// Read the entry at a virtual path
    Get(GetArgs),
    /// Remove the entry at a virtual path
    Rm(RmArgs),
    /// Delete entries not in the keep list from the listed directories
    Scrub(ScrubArgs),
    /// List entries with their sizes
    Ls(LsArgs),
}

#[derive(Args)]
pub struct AddArgs {
    pub package: PathBuf,
    pub virtual_path: String,
    /// File to store; `-` reads standard input
    pub file: PathBuf,
}

#[derive(Args)]
pub struct GetArgs {
    pub package: PathBuf,
    pub virtual_path: String,
    /// Write to this file instead of standard output
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct RmArgs {
    pub package: PathBuf,
    pub virtual_path: String,
}

#[derive(Args)]
pub struct ScrubArgs {
    pub package: PathBuf,
    /// Virtual paths to keep
    #[arg(required = true)]
    pub keep: Vec<String>,
}

#[derive(Args)]
pub struct LsArgs {
    pub package: PathBuf,
    /// Directories to list; everything when omitted
    pub dirs: Vec<String>,
}
