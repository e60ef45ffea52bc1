//! chatgist CLI entry point.
//!
//! Binary name: `chatgist`
//!
//! Parses CLI arguments, loads configuration, wires the gist service and
//! dispatches to the command handler. Ctrl+C cancels the running operation;
//! batches already summarized are kept and reported.

mod cli;
mod state;

use clap::Parser;

use chatgist_core::context::OperationContext;
use chatgist_infra::config::{default_config_path, load_config};
use chatgist_observe::TracingOptions;

use cli::chats::ChatView;
use cli::digest::DigestOptions;
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,chatgist_core=debug,chatgist_infra=debug",
        _ => "trace",
    };
    let options = TracingOptions {
        filter: filter.to_string(),
        json: cli.json,
        otel: cli.otel,
    };
    if let Err(e) = chatgist_observe::init_tracing(&options) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = run(cli).await;
    chatgist_observe::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_config(&config_path).await;
    let state = AppState::init(config, &cli.export).await?;

    let ctx = OperationContext::new();
    let token = ctx.token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });

    match cli.command {
        Commands::Chats { unread, favorites } => {
            let view = ChatView::from_flags(unread, favorites);
            cli::chats::list_chats(&state, view, cli.json, &ctx).await?;
        }

        Commands::Digest {
            chat_id,
            audio,
            mark_read,
        } => {
            let opts = DigestOptions {
                chat_id,
                audio,
                mark_read,
                json: cli.json,
                quiet: cli.quiet,
            };
            cli::digest::digest(&state, opts, &ctx).await?;
        }
    }

    Ok(())
}
