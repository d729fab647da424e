//! Runtime metrics for the coordinator.
//!
//! One shared `Metrics` value behind a mutex, updated by the dispatcher (per request) and by
//! every refresh task (per cycle). Histories are bounded to `MAX_POINTS` entries.
//! `export_summary_csv` writes a `metric,value,description` table at shutdown.

use std::{
    collections::{BTreeMap, VecDeque},
    fs::{create_dir_all, write},
    io,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use log::info;

use crate::dispatch::request::RequestKind;

pub const MAX_POINTS: usize = 1_000;

/// Per-controller refresh counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    pub cycles: u64,
    /// Wake-ups that happened after the scheduled deadline.
    pub misses: u64,
    /// Sample values the store refused (unknown name or wrong type).
    pub rejected_writes: u64,
    pub feed_errors: u64,
}

#[derive(Debug, Default, Clone)]
pub struct Metrics {
    pub requests_get: u64,
    pub requests_set: u64,
    pub requests_action: u64,

    /// Failure responses keyed by failure kind.
    pub failures: BTreeMap<&'static str, u64>,

    /// Receive → response latency (microseconds), last `MAX_POINTS` requests.
    pub dispatch_latency_us: VecDeque<u64>,

    pub refresh: BTreeMap<String, RefreshStats>,
}

pub type SharedMetrics = Arc<Mutex<Metrics>>;

impl Metrics {
    pub fn shared() -> SharedMetrics {
        Arc::new(Mutex::new(Metrics::default()))
    }

    pub fn record_request(&mut self, kind: RequestKind) {
        match kind {
            RequestKind::Get => self.requests_get += 1,
            RequestKind::Set => self.requests_set += 1,
            RequestKind::Action => self.requests_action += 1,
        }
    }

    pub fn record_failure(&mut self, kind: &'static str) {
        *self.failures.entry(kind).or_insert(0) += 1;
    }

    pub fn record_latency(&mut self, latency_us: u64) {
        push_capped_u64(&mut self.dispatch_latency_us, latency_us);
    }

    pub fn refresh_mut(&mut self, identity: &str) -> &mut RefreshStats {
        self.refresh.entry(identity.to_string()).or_default()
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_get + self.requests_set + self.requests_action
    }

    pub fn total_failures(&self) -> u64 {
        self.failures.values().sum()
    }
}

/// Locks the shared metrics, recovering from a poisoned lock.
pub fn lock_metrics(metrics: &SharedMetrics) -> MutexGuard<'_, Metrics> {
    match metrics.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Appends value to buffer; drops the oldest at capacity.
#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

/// Builds the summary table as CSV text.
pub fn summary_csv(m: &Metrics) -> String {
    let mut csv = String::from("metric,value,description\n");

    csv.push_str(&format!("requests_get,{},Get requests handled\n", m.requests_get));
    csv.push_str(&format!("requests_set,{},Set requests handled\n", m.requests_set));
    csv.push_str(&format!("requests_action,{},Action requests handled\n", m.requests_action));
    csv.push_str(&format!("failures_total,{},Failure responses sent\n", m.total_failures()));

    for (kind, count) in &m.failures {
        csv.push_str(&format!("failures_{},{},{} failures\n", kind, count, kind));
    }

    if let Some(lat) = calculate_stats_u64(&m.dispatch_latency_us) {
        csv.push_str(&format!("dispatch_latency_min_us,{:.2},Minimum dispatch latency\n", lat.min));
        csv.push_str(&format!("dispatch_latency_max_us,{:.2},Maximum dispatch latency\n", lat.max));
        csv.push_str(&format!("dispatch_latency_avg_us,{:.2},Average dispatch latency\n", lat.mean));
        csv.push_str(&format!("dispatch_latency_samples,{},Latency measurements\n", lat.count));
    }

    for (identity, r) in &m.refresh {
        csv.push_str(&format!("{}_refresh_cycles,{},Refresh cycles completed\n", identity, r.cycles));
        csv.push_str(&format!("{}_refresh_misses,{},Late refresh wake-ups\n", identity, r.misses));
        csv.push_str(&format!(
            "{}_rejected_writes,{},Sample values refused by the store\n",
            identity, r.rejected_writes
        ));
        csv.push_str(&format!("{}_feed_errors,{},Failed feed pulls\n", identity, r.feed_errors));
    }

    csv
}

pub fn export_summary_csv(metrics: &SharedMetrics, dir: &Path) -> io::Result<()> {
    create_dir_all(dir)?;
    let content = summary_csv(&lock_metrics(metrics));
    let path = dir.join("metrics_summary.csv");
    write(&path, content)?;
    info!("Summary metrics exported to: {:?}", path);
    Ok(())
}
