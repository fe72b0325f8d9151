mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            database_url,
            task_timeout,
            watchdog_interval,
            flush_interval,
        } => {
            commands::serve(
                bind,
                database_url,
                cli.token,
                task_timeout,
                watchdog_interval,
                flush_interval,
            )
            .await
        }
        Command::List { kind, limit, selector } => {
            commands::list(kind, limit, selector, cli.remote, cli.token, cli.org).await
        }
        Command::Get { kind, name, with_exports } => {
            commands::get(kind, name, with_exports, cli.remote, cli.token, cli.org).await
        }
        Command::Create { kind, file } => {
            commands::create(kind, file, cli.remote, cli.token, cli.org).await
        }
        Command::Delete { kind, name } => {
            commands::delete(kind, name, cli.remote, cli.token, cli.org).await
        }
        Command::Logs { kind, name, follow } => {
            commands::logs(kind, name, follow, cli.remote, cli.token, cli.org).await
        }
        Command::Status => commands::status(cli.remote, cli.token, cli.org).await,
    }
}
