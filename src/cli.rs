use clap::{Args, Parser, Subcommand};

use crate::config::Settings;
use crate::render::BookFormat;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download a book into the local cache and render it.
    Download(DownloadArgs),
    /// Buy every locked chapter of a book, then refresh it.
    Purchase(PurchaseArgs),
    /// List the chapters of a book that can be read now.
    Available(AvailableArgs),
    /// Export every local book as EPUB files of `--export-window` chapters.
    GenerateEbooks,
    /// Refresh every local book without rendering.
    RefreshLocal,
    /// Refresh the library books of every logged token.
    RegenerateLibraries,
    /// Delete logged tokens that no longer authenticate.
    ClearTokens,
    /// Show the profile behind the token.
    Whoami,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    pub book_id: String,

    #[arg(long, value_enum, default_value_t = BookFormat::Epub)]
    pub format: BookFormat,

    /// Refresh cache and project only.
    #[arg(long, default_value_t = false)]
    pub no_render: bool,
}

#[derive(Debug, Args)]
pub struct PurchaseArgs {
    pub book_id: String,

    /// Only buy chapters missing from the local project.
    #[arg(long, default_value_t = false)]
    pub to_library: bool,
}

#[derive(Debug, Args)]
pub struct AvailableArgs {
    pub book_id: String,

    /// List the chapters that still need a purchase instead.
    #[arg(long, default_value_t = false)]
    pub locked: bool,
}
