use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "octofhir-smart")]
#[command(about = "SMART on FHIR launch server and backend-services client")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to octofhir-smart.toml when present)
    #[arg(short, long, global = true, env = "SMART_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the launch, authorize and callback routes
    Serve(ServeArgs),
    /// Obtain a backend-services token and show the session it yields
    Token(TokenArgs),
    /// Read a resource by reference (e.g. Patient/123)
    Get(GetArgs),
    /// Create a new resource
    Create(CreateArgs),
    /// Update a resource
    Update(UpdateArgs),
    /// Delete a resource
    Delete(DeleteArgs),
    /// Search for resources
    Search(SearchArgs),
}

#[derive(clap::Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,
}

#[derive(clap::Args)]
pub struct TokenArgs {
    /// Scope to request (defaults to the configured scope)
    #[arg(long)]
    pub scope: Option<String>,
}

#[derive(clap::Args)]
pub struct GetArgs {
    /// Resource reference (e.g. Patient/123)
    pub reference: String,
}

#[derive(clap::Args)]
pub struct CreateArgs {
    /// Resource type (e.g. Patient)
    pub resource_type: String,
    /// Path to JSON file (reads from stdin if omitted)
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct UpdateArgs {
    /// Resource reference (e.g. Patient/123)
    pub reference: String,
    /// Path to JSON file (reads from stdin if omitted)
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct DeleteArgs {
    /// Resource reference (e.g. Patient/123)
    pub reference: String,
}

#[derive(clap::Args)]
pub struct SearchArgs {
    /// Resource type (e.g. Patient)
    pub resource_type: String,
    /// Search parameters as key=value pairs (e.g. name=Smith birthdate=gt1990-01-01)
    pub params: Vec<String>,
    /// Number of results per page
    #[arg(long)]
    pub count: Option<u32>,
}
