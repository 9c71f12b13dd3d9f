use anyhow::{Result, anyhow};
use clap::Parser;
use console::style;

use ragbase::cli::commands::{ask, documents, init, maintenance};
use ragbase::cli::{Cli, Commands};
use ragbase::{KnowledgeService, Settings, logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {e:#}", style("Error:").red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow!("Configuration error: {e}"))?;

    logging::init_with_config(&settings.logging, cli.verbose);

    match cli.command {
        Commands::Init { force } => init::run_init(force),
        Commands::Config => init::run_config(&settings),
        command => {
            if let Commands::Add { clean: true, .. } = command {
                settings.ingest.clean_markdown = true;
            }
            let service = KnowledgeService::from_settings(settings).await?;
            dispatch(command, &service).await
        }
    }
}

async fn dispatch(command: Commands, service: &KnowledgeService) -> Result<()> {
    match command {
        Commands::Add {
            files,
            dir,
            id,
            overwrite,
            ..
        } => documents::run_add(service, files, dir, id, overwrite).await,
        Commands::Ask { question, k, json } => ask::run_ask(service, &question, k, json).await,
        Commands::Status { json } => ask::run_status(service, json),
        Commands::List { json } => documents::run_list(service, json),
        Commands::Show { id } => documents::run_show(service, &id),
        Commands::Remove { id } => documents::run_remove(service, &id).await,
        Commands::Retry { id } => documents::run_retry(service, &id).await,
        Commands::Rebuild => maintenance::run_rebuild(service).await,
        Commands::Clear { yes } => maintenance::run_clear(service, yes).await,
        Commands::Init { .. } | Commands::Config => Ok(()),
    }
}
