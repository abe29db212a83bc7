use anyhow::Context;
use chatlog::cli::{init_tracing, Cli, Command};
use chatlog_core::{Config, LogStore};
use chatlog_fetch::{Answer, Commands, Downloader, FilePaste, TlsHandshake};
use clap::Parser;
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let cache_dir = config.cache.dir();
    let store = LogStore::open(&cache_dir, config.cache.capacity)
        .with_context(|| format!("opening log store in {}", cache_dir.display()))?
        .with_format(config.cache.format.mode());
    let downloader = Downloader::new(TlsHandshake::native().context("loading root certificates")?);
    let commands = Commands::new(downloader, Arc::new(FilePaste::new(config.paste.dir())))
        .with_config(&config)
        .store(Arc::new(Mutex::new(store)));

    let now = chrono::Utc::now();
    let answer = match &cli.command {
        Command::Count(args) => commands.count_answer(args.to_query(now)?).await,
        Command::Find(args) => commands.find_answer(args.to_query(now)?).await,
    };
    println!("{answer}");

    if let Answer::Failed(reason) = answer {
        tracing::warn!(%reason, "command failed");
        std::process::exit(1);
    }
    Ok(())
}
