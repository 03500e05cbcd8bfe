mod cli;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    // A missing .env is fine; anything else is worth a warning.
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    observability::init_tracing_with_level("info");

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    observability::apply_logging_level(config::log_level(&cfg));

    match &cli.command {
        Commands::Serve(args) => {
            commands::serve::serve(cfg, args.listen).await?;
        }
        Commands::Token(args) => {
            commands::token::token(&cfg, args.scope.as_deref()).await?;
        }
        Commands::Get(args) => {
            let ctx = commands::ResourceContext::connect(&cfg).await?;
            commands::crud::get(&ctx, &args.reference).await?;
        }
        Commands::Create(args) => {
            let ctx = commands::ResourceContext::connect(&cfg).await?;
            commands::crud::create(&ctx, &args.resource_type, args.file.as_deref()).await?;
        }
        Commands::Update(args) => {
            let ctx = commands::ResourceContext::connect(&cfg).await?;
            commands::crud::update(&ctx, &args.reference, args.file.as_deref()).await?;
        }
        Commands::Delete(args) => {
            let ctx = commands::ResourceContext::connect(&cfg).await?;
            commands::crud::delete(&ctx, &args.reference).await?;
        }
        Commands::Search(args) => {
            let ctx = commands::ResourceContext::connect(&cfg).await?;
            commands::search::search(&ctx, &args.resource_type, &args.params, args.count).await?;
        }
    }

    Ok(())
}
