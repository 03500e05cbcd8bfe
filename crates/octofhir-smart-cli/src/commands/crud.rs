use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use super::ResourceContext;
use crate::output::{print_success, print_value};

fn parse_reference(reference: &str) -> Result<(&str, &str)> {
    match reference.split_once('/') {
        Some((rt, id)) if !rt.is_empty() && !id.is_empty() => Ok((rt, id)),
        _ => anyhow::bail!("Invalid reference \"{reference}\". Expected format: ResourceType/id"),
    }
}

fn read_body(file: Option<&Path>) -> Result<serde_json::Value> {
    let content = match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            buf
        }
    };
    serde_json::from_str(&content).context("Invalid JSON")
}

pub async fn get(ctx: &ResourceContext, reference: &str) -> Result<()> {
    let (rt, id) = parse_reference(reference)?;
    let resource = ctx.client.read(&ctx.session, rt, id).await?;
    print_value(&resource);
    Ok(())
}

pub async fn create(ctx: &ResourceContext, resource_type: &str, file: Option<&Path>) -> Result<()> {
    let body = read_body(file)?;
    let created = ctx.client.create(&ctx.session, resource_type, body).await?;
    let id = created.get("id").and_then(|v| v.as_str()).unwrap_or("?");
    print_success(&format!("Created {}/{}", resource_type.cyan(), id.cyan()));
    print_value(&created);
    Ok(())
}

pub async fn update(ctx: &ResourceContext, reference: &str, file: Option<&Path>) -> Result<()> {
    let (rt, id) = parse_reference(reference)?;
    let body = read_body(file)?;
    let updated = ctx.client.update(&ctx.session, rt, id, body).await?;
    print_success(&format!("Updated {}/{}", rt.cyan(), id.cyan()));
    print_value(&updated);
    Ok(())
}

pub async fn delete(ctx: &ResourceContext, reference: &str) -> Result<()> {
    let (rt, id) = parse_reference(reference)?;
    ctx.client.delete(&ctx.session, rt, id).await?;
    print_success(&format!("Deleted {}/{}", rt.cyan(), id.cyan()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference() {
        assert_eq!(parse_reference("Patient/123").unwrap(), ("Patient", "123"));
        assert!(parse_reference("Patient").is_err());
        assert!(parse_reference("/123").is_err());
        assert!(parse_reference("Patient/").is_err());
    }

    #[test]
    fn test_read_body_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patient.json");
        fs::write(&path, r#"{"resourceType":"Patient"}"#).unwrap();

        let body = read_body(Some(&path)).unwrap();
        assert_eq!(body["resourceType"], "Patient");

        fs::write(&path, "not json").unwrap();
        assert!(read_body(Some(&path)).is_err());
    }
}
