use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::info;
use tracing_subscriber::filter::Directive;

mod cli;
mod commands;
mod env;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load .env before the subscriber so RUST_LOG may come from it
    let dotenv = env::load_dotenv_from_ancestors(cli.env.as_deref());

    init_tracing();

    let result = match dotenv {
        Ok(loaded) => {
            if let Some(path) = loaded {
                info!(path = %path.display(), "Loaded environment file");
            }
            dispatch(cli).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

fn init_tracing() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "rawrecv=info".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { once } => commands::cmd_run(&cli.config, once).await,
        Commands::Init { path } => commands::cmd_init(path.as_deref().unwrap_or(&cli.config)),
        Commands::Check => commands::cmd_check(&cli.config),
    }
}
