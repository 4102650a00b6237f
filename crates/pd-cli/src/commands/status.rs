use super::{api_client, check, friendly_error};

/// Run the `status` subcommand: call the API and pretty-print daemon status.
pub async fn run(api_url: &str) -> anyhow::Result<()> {
    let resp = api_client()
        .get(format!("{api_url}/api/status"))
        .send()
        .await
        .map_err(friendly_error)?;
    let status = check(resp).await?;

    let version = status["version"].as_str().unwrap_or("unknown");
    let uptime = status["uptime_seconds"].as_u64().unwrap_or(0);
    let stored_days = status["stored_days"].as_u64().unwrap_or(0);
    let pending = status["pending_runs"].as_u64().unwrap_or(0);

    println!("pingdom status  (v{version})");
    println!("{}", "-".repeat(40));
    println!("Uptime:         {uptime}s");
    println!("Stored days:    {stored_days}");
    println!("Pending runs:   {pending}");
    Ok(())
}
