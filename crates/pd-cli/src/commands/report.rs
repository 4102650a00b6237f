use std::fmt::Write;

use pd_core::types::{RankedEntry, Report};

use super::{api_client, check, friendly_error};

/// Trigger a collection run for a trailing window and print its report.
pub async fn collect(api_url: &str, window: &str) -> anyhow::Result<()> {
    let resp = api_client()
        .get(format!("{api_url}/api/reports/{window}"))
        .send()
        .await
        .map_err(friendly_error)?;
    let body = check(resp).await?;

    if let Some(message) = body["message"].as_str() {
        println!("{message}");
    }
    let report: Report = serde_json::from_value(body["report"].clone())?;
    print!("{}", render(&report));
    Ok(())
}

/// Print a report over stored days. `end` is exclusive.
pub async fn stored(api_url: &str, start: &str, end: &str) -> anyhow::Result<()> {
    let resp = api_client()
        .get(format!("{api_url}/api/reports"))
        .query(&[("start", start), ("end", end)])
        .send()
        .await
        .map_err(friendly_error)?;
    let body = check(resp).await?;
    let report: Report = serde_json::from_value(body["report"].clone())?;
    print!("{}", render(&report));
    Ok(())
}

pub fn render(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Traffic report  {}", report.period);
    let _ = writeln!(out, "{}", "-".repeat(40));
    let _ = writeln!(out, "Days collected:  {}", report.days_collected);
    let _ = writeln!(out, "Total requests:  {}", report.total_requests);
    let _ = writeln!(out, "Bandwidth:       {}", human_bytes(report.total_bandwidth));
    ranked(&mut out, "Top countries", &report.top_countries);
    ranked(&mut out, "Top pages", &report.top_pages);
    out
}

fn ranked(out: &mut String, title: &str, entries: &[RankedEntry]) {
    let _ = writeln!(out, "{title}:");
    if entries.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (i, e) in entries.iter().enumerate() {
        let _ = writeln!(out, "  {:>2}. {:<30} {}", i + 1, e.key, e.count);
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
