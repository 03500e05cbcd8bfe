use anyhow::Result;

use super::ResourceContext;
use crate::output::print_value;

fn parse_params(raw_params: &[String], count: Option<u32>) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = raw_params
        .iter()
        .map(|p| match p.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (p.clone(), String::new()),
        })
        .collect();

    if let Some(c) = count {
        params.push(("_count".to_string(), c.to_string()));
    }
    params
}

pub async fn search(
    ctx: &ResourceContext,
    resource_type: &str,
    raw_params: &[String],
    count: Option<u32>,
) -> Result<()> {
    let params = parse_params(raw_params, count);
    let bundle = ctx.client.search(&ctx.session, resource_type, &params).await?;
    print_value(&bundle);
    Ok(())
}
