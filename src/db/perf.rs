//! In-memory performance ring buffer for the storage layer (spec §4.1),
//! supplemented with the original's SHA-256 slow-query grouping and
//! rolling-window health aggregates (SPEC_FULL §B).

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};

const RING_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct QuerySample {
    pub query_name: String,
    pub elapsed_ms: f64,
    pub success: bool,
    pub at_unix_s: u64,
}

/// Records `{query_name, elapsed_ms, success}` for every public storage
/// method call, bounded to the most recent [`RING_CAPACITY`] samples.
pub struct PerfMonitor {
    samples: VecDeque<QuerySample>,
    slow_query_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlowQueryGroup {
    pub hash: String,
    pub query_name: String,
    pub count: usize,
    pub max_elapsed_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowAggregate {
    pub sample_count: usize,
    pub success_rate_pct: f64,
    pub slow_pct: f64,
    pub p95_elapsed_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbHealth {
    pub db_size_bytes: i64,
    pub page_count: i64,
    pub fragmentation_pct: f64,
    pub cache_hit_ratio_estimate: f64,
    pub slow_query_count: usize,
    pub slow_query_threshold_ms: u64,
    pub last_hour: WindowAggregate,
    pub last_24h: WindowAggregate,
    pub slow_query_groups: Vec<SlowQueryGroup>,
}

impl PerfMonitor {
    pub fn new(slow_query_ms: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(RING_CAPACITY),
            slow_query_ms,
        }
    }

    pub fn record(&mut self, query_name: &str, elapsed: Duration, success: bool) {
        if self.samples.len() >= RING_CAPACITY {
            self.samples.pop_front();
        }
        let at_unix_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.samples.push_back(QuerySample {
            query_name: query_name.to_string(),
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            success,
            at_unix_s,
        });
    }

    fn window(&self, since_unix_s: u64) -> WindowAggregate {
        let mut elapsed: Vec<f64> = Vec::new();
        let mut successes = 0usize;
        let mut slow = 0usize;
        for s in self.samples.iter().filter(|s| s.at_unix_s >= since_unix_s) {
            elapsed.push(s.elapsed_ms);
            if s.success {
                successes += 1;
            }
            if s.elapsed_ms >= self.slow_query_ms as f64 {
                slow += 1;
            }
        }
        let sample_count = elapsed.len();
        elapsed.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p95 = percentile(&elapsed, 0.95);
        WindowAggregate {
            sample_count,
            success_rate_pct: if sample_count == 0 {
                100.0
            } else {
                successes as f64 / sample_count as f64 * 100.0
            },
            slow_pct: if sample_count == 0 {
                0.0
            } else {
                slow as f64 / sample_count as f64 * 100.0
            },
            p95_elapsed_ms: p95,
        }
    }

    pub fn slow_query_groups(&self) -> Vec<SlowQueryGroup> {
        let mut groups: Vec<(String, String, usize, f64)> = Vec::new();
        for s in self.samples.iter().filter(|s| s.elapsed_ms >= self.slow_query_ms as f64) {
            let hash = short_hash(&s.query_name);
            match groups.iter_mut().find(|(h, ..)| *h == hash) {
                Some((_, _, count, max)) => {
                    *count += 1;
                    if s.elapsed_ms > *max {
                        *max = s.elapsed_ms;
                    }
                }
                None => groups.push((hash, s.query_name.clone(), 1, s.elapsed_ms)),
            }
        }
        groups
            .into_iter()
            .map(|(hash, query_name, count, max_elapsed_ms)| SlowQueryGroup {
                hash,
                query_name,
                count,
                max_elapsed_ms,
            })
            .collect()
    }

    /// Assemble a [`DbHealth`] snapshot. File-level figures (`db_size_bytes`,
    /// `page_count`, `fragmentation_pct`) are supplied by the caller, which
    /// reads them from SQLite pragmas against the live connection.
    pub fn health(
        &self,
        db_size_bytes: i64,
        page_count: i64,
        fragmentation_pct: f64,
        cache_hit_ratio_estimate: f64,
    ) -> DbHealth {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let last_hour = self.window(now.saturating_sub(3600));
        let last_24h = self.window(now.saturating_sub(24 * 3600));
        let slow_query_count = self
            .samples
            .iter()
            .filter(|s| s.elapsed_ms >= self.slow_query_ms as f64)
            .count();
        DbHealth {
            db_size_bytes,
            page_count,
            fragmentation_pct,
            cache_hit_ratio_estimate,
            slow_query_count,
            slow_query_threshold_ms: self.slow_query_ms,
            last_hour,
            last_24h,
            slow_query_groups: self.slow_query_groups(),
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn short_hash(query_name: &str) -> String {
    let normalized = query_name.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

/// Pagination smart-switch thresholds (SPEC_FULL §B), named rather than
/// inlined as magic numbers.
pub const CURSOR_SWITCH_OFFSET_THRESHOLD: u64 = 1000;
pub const CURSOR_SWITCH_TOTAL_THRESHOLD: u64 = 10_000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn records_bounded_ring() {
        let mut m = PerfMonitor::new(100);
        for i in 0..(RING_CAPACITY + 10) {
            m.record(&format!("q{i}"), Duration::from_millis(1), true);
        }
        assert_eq!(m.samples.len(), RING_CAPACITY);
    }

    #[test]
    fn slow_queries_grouped_by_hash() {
        let mut m = PerfMonitor::new(50);
        m.record("SELECT * FROM posts", Duration::from_millis(60), true);
        m.record("SELECT   *   FROM posts", Duration::from_millis(80), true);
        m.record("SELECT * FROM media", Duration::from_millis(10), true);
        let groups = m.slow_query_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 2);
    }

    #[test]
    fn health_window_success_rate() {
        let mut m = PerfMonitor::new(50);
        m.record("a", Duration::from_millis(10), true);
        m.record("b", Duration::from_millis(10), false);
        let health = m.health(0, 0, 0.0, 1.0);
        assert_eq!(health.last_hour.sample_count, 2);
        assert_eq!(health.last_hour.success_rate_pct, 50.0);
    }
}
