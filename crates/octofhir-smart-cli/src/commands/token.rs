use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_smart::SmartConfig;

use super::backend_session;
use crate::output::{print_success, print_value};

pub async fn token(cfg: &SmartConfig, scope: Option<&str>) -> Result<()> {
    let session = backend_session(cfg, scope).await?;
    print_success(&format!(
        "Token issued, expires in {}s",
        session.remaining().whole_seconds().to_string().cyan()
    ));
    // The access token is skipped by Session's serializer.
    print_value(&serde_json::to_value(&session).context("Failed to render session")?);
    Ok(())
}
