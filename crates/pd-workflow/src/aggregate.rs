use std::sync::Arc;

use pd_core::store::{MetricsStore, StoreError};
use pd_core::types::{CountMap, DailyMetrics, DateRange, RankedEntry, Report};
use tracing::debug;

/// Entries kept per ranked list.
pub const TOP_N: usize = 10;

/// Folds every stored day of a range into a [`Report`]. Read-only.
#[derive(Clone)]
pub struct AggregationEngine {
    store: Arc<dyn MetricsStore>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub async fn aggregate(&self, range: &DateRange) -> Result<Report, StoreError> {
        let records = self.store.list_range(range).await?;
        debug!(%range, records = records.len(), "aggregating");
        Ok(fold(range, &records))
    }
}

/// Pure fold of `records` over `range`. Records outside the range are ignored.
pub fn fold(range: &DateRange, records: &[DailyMetrics]) -> Report {
    let mut total_requests = 0u64;
    let mut total_bandwidth = 0u64;
    let mut days_collected = 0u64;
    let mut countries = CountMap::new();
    let mut pages = CountMap::new();

    for record in records.iter().filter(|r| range.contains(r.date)) {
        total_requests = total_requests.saturating_add(record.total_requests);
        total_bandwidth = total_bandwidth.saturating_add(record.bandwidth_bytes);
        days_collected += 1;
        merge_into(&mut countries, &record.top_countries);
        merge_into(&mut pages, &record.top_pages);
    }

    Report {
        period: *range,
        total_requests,
        total_bandwidth,
        days_collected,
        top_countries: top_n(&countries, TOP_N),
        top_pages: top_n(&pages, TOP_N),
    }
}

fn merge_into(acc: &mut CountMap, day: &CountMap) {
    for (key, count) in day {
        let slot = acc.entry(key.clone()).or_insert(0);
        *slot = slot.saturating_add(*count);
    }
}

/// The `n` largest entries, count descending; equal counts by ascending key.
pub fn top_n(counts: &CountMap, n: usize) -> Vec<RankedEntry> {
    let mut entries: Vec<(&String, &u64)> = counts.iter().collect();
    // BTreeMap iteration is key-ascending and the sort is stable, so ties keep key order.
    entries.sort_by(|a, b| b.1.cmp(a.1));
    entries
        .into_iter()
        .take(n)
        .map(|(k, v)| RankedEntry::new(k.clone(), *v))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
