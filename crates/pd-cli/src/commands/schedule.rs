use std::path::Path;

use anyhow::Context;

use super::{api_client, check, friendly_error};

/// Print every stored schedule.
pub async fn show(api_url: &str) -> anyhow::Result<()> {
    let resp = api_client()
        .get(format!("{api_url}/api/config/schedule"))
        .send()
        .await
        .map_err(friendly_error)?;
    let body = check(resp).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Post the JSON payload in `file` to the schedule endpoint.
pub async fn set(api_url: &str, file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let resp = api_client()
        .post(format!("{api_url}/api/config/schedule"))
        .json(&payload)
        .send()
        .await
        .map_err(friendly_error)?;
    let body = check(resp).await?;
    println!(
        "{}",
        body["message"].as_str().unwrap_or("schedule updated")
    );
    Ok(())
}
