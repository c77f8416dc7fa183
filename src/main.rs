use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use serde::Serialize;

use fictiondl::batch;
use fictiondl::cli::{Cli, Command};
use fictiondl::client::GraphqlClient;
use fictiondl::pipeline::{Assembler, DownloadRequest};
use fictiondl::purchase;
use fictiondl::tokens::TokenLog;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    fictiondl::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(command = ?cli.command, "parsed cli");
    cli.settings.validate()?;

    let settings = Arc::new(cli.settings);
    let client = Arc::new(GraphqlClient::new(&settings).context("build client")?);
    let assembler = Assembler::new(client, Arc::clone(&settings));
    let token = || {
        settings
            .resolve_token(None)
            .context("token is required (pass --token or set FICTIONDL_TOKEN)")
    };

    match cli.command {
        Command::Download(args) => {
            let request = DownloadRequest {
                book_id: args.book_id,
                token: token()?,
                format: args.format,
                render: !args.no_render,
            };
            let outcome = assembler.download_book(&request).await.context("download")?;
            print_json(&outcome)?;
            if !outcome.success {
                anyhow::bail!("{}", outcome.detail);
            }
        }
        Command::Purchase(args) => {
            let token = token()?;
            let report = if args.to_library {
                purchase::purchase_all_chapters_to_library(&assembler, &args.book_id, &token).await
            } else {
                purchase::purchase_all_chapters(&assembler, &args.book_id, &token).await
            }
            .context("purchase")?;
            print_json(&report)?;
        }
        Command::Available(args) => {
            let token = token()?;
            let chapters = if args.locked {
                assembler.purchasable_chapters(&args.book_id, &token).await
            } else {
                assembler.available_chapters(&args.book_id, &token).await
            }
            .context("list chapters")?;
            print_json(&chapters)?;
        }
        Command::GenerateEbooks => {
            let report = batch::generate_ebooks(&assembler, &token()?)
                .await
                .context("generate ebooks")?;
            print_json(&report)?;
        }
        Command::RefreshLocal => {
            let report = batch::refresh_local_books(&assembler, &token()?)
                .await
                .context("refresh local books")?;
            print_json(&report)?;
        }
        Command::RegenerateLibraries => {
            let report = batch::regenerate_libraries(&assembler)
                .await
                .context("regenerate libraries")?;
            print_json(&report)?;
        }
        Command::ClearTokens => {
            let report = TokenLog::new(&settings.token_dir)
                .clear_invalid(assembler.client())
                .await
                .context("clear tokens")?;
            print_json(&report)?;
        }
        Command::Whoami => {
            let profile = assembler.authorize(&token()?).await.context("whoami")?;
            print_json(&profile)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{text}");
    Ok(())
}
