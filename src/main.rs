//! Checkup command line.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkup::config::{parse_interval, CheckupConfig, ServerConfig, DEFAULT_CONFIG_FILE};
use checkup::scheduler::{Checkup, CheckupError};
use checkup::types::CheckResult;
use checkup::web::Server;

#[derive(Parser, Debug)]
#[command(name = "checkup", version, about = "Perform health checks on endpoints")]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true, env = "CHECKUP_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Store results instead of printing them
    #[arg(long)]
    store: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run checks and store results at a regular interval
    Every {
        /// Duration like "10m" or one of second, minute, hour, day, week
        interval: String,
    },
    /// Run checks and attach a message to one endpoint's result
    Message {
        /// Title of the endpoint the message is about
        #[arg(short = 'a', long)]
        about: Option<String>,
        message: String,
    },
    /// Serve the latest stored results over HTTP
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "checkup=debug" } else { "checkup=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let cfg = CheckupConfig::load(&cli.config)?;
    let checkup = cfg.into_checkup()?;

    match cli.command {
        None => run_once(&checkup, cli.store).await,
        Some(Command::Every { interval }) => run_every(checkup, &interval).await,
        Some(Command::Message { about, message }) => {
            post_message(&checkup, about.as_deref(), &message).await
        }
        Some(Command::Serve) => serve(&checkup).await,
    }
}

async fn run_once(checkup: &Checkup, store: bool) -> anyhow::Result<()> {
    if store {
        checkup.check_and_store().await?;
        return Ok(());
    }

    let results = checkup.check().await.map_err(report_partial)?;
    for result in &results {
        println!("{}", result);
    }
    if results.iter().any(|r| !r.healthy) {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_every(checkup: Checkup, interval: &str) -> anyhow::Result<()> {
    let interval = parse_interval(interval)?;
    if checkup.storage.is_none() {
        return Err(CheckupError::NoStorage.into());
    }

    let run = Arc::new(checkup).check_and_store_every(interval)?;
    tracing::info!("Checking every {:?}", interval);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    tracing::info!("Shutting down");
    run.stop().await;
    Ok(())
}

async fn post_message(checkup: &Checkup, about: Option<&str>, message: &str) -> anyhow::Result<()> {
    let storage = checkup.storage.as_ref().ok_or(CheckupError::NoStorage)?;

    let mut results = checkup.check().await.map_err(report_partial)?;
    attach_message(&mut results, about, message)?;

    storage.store(&results).await?;
    tracing::info!("Message stored");
    Ok(())
}

/// Attach `message` to the result titled `about`, ignoring case. With a
/// single result the title may be omitted.
fn attach_message(
    results: &mut [CheckResult],
    about: Option<&str>,
    message: &str,
) -> anyhow::Result<()> {
    let target = match about {
        Some(title) => results
            .iter_mut()
            .find(|r| r.title.eq_ignore_ascii_case(title)),
        None if results.len() == 1 => results.first_mut(),
        None => bail!("--about is required when more than one endpoint is checked"),
    };
    match target {
        Some(result) => {
            result.message = message.to_string();
            Ok(())
        }
        None => bail!("no endpoint titled {:?}", about.unwrap_or_default()),
    }
}

async fn serve(checkup: &Checkup) -> anyhow::Result<()> {
    let storage = checkup.storage.clone().ok_or(CheckupError::NoStorage)?;
    let cfg = ServerConfig::load();
    tracing::info!("Starting Checkup status server on port {}...", cfg.http_port);

    Server::new(cfg, storage).start().await?;
    Ok(())
}

/// Print whatever results a failed run produced before reporting the error.
fn report_partial(err: CheckupError) -> anyhow::Error {
    if let CheckupError::Checks { results, .. } = &err {
        for result in results.iter().filter(|r| !r.title.is_empty()) {
            println!("{}", result);
        }
    }
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["checkup", "-c", "prod.json", "every", "minute"]);
        assert_eq!(cli.config, PathBuf::from("prod.json"));
        assert!(matches!(cli.command, Some(Command::Every { ref interval }) if interval == "minute"));

        let cli = Cli::parse_from(["checkup", "message", "-a", "API", "deploying"]);
        match cli.command {
            Some(Command::Message { about, message }) => {
                assert_eq!(about.as_deref(), Some("API"));
                assert_eq!(message, "deploying");
            }
            other => panic!("expected message command, got {:?}", other),
        }

        let cli = Cli::parse_from(["checkup", "--store"]);
        assert!(cli.store);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_attach_message() {
        let mut results = vec![CheckResult::new("Site", "a"), CheckResult::new("API", "b")];
        attach_message(&mut results, Some("api"), "deploying").unwrap();
        assert_eq!(results[1].message, "deploying");
        assert!(results[0].message.is_empty());

        assert!(attach_message(&mut results, None, "x").is_err());
        assert!(attach_message(&mut results, Some("db"), "x").is_err());

        let mut single = vec![CheckResult::new("Site", "a")];
        attach_message(&mut single, None, "ok").unwrap();
        assert_eq!(single[0].message, "ok");
    }
}
