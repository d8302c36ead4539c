use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::Config;

/// Global stats instance
static STATS: LazyLock<Stats> = LazyLock::new(Stats::new);

pub fn get_stats() -> &'static Stats {
    &STATS
}

fn stats_path() -> PathBuf {
    Config::dir().join("stats.json")
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Shape persisted to `stats.json` for the external supervisor; the file is
/// rewritten wholesale on each request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedStats {
    start_time: u64,
    request_count: u64,
    last_request_time: u64,
    port: u16,
}

/// Process-wide request counters.
pub struct Stats {
    start_instant: Instant,
    start_epoch: u64,
    request_count: AtomicU64,
    last_request_time: AtomicU64,
    port: AtomicU64,
    endpoint_requests: RwLock<HashMap<String, AtomicU64>>,
    write_lock: Mutex<()>,
}

impl Stats {
    fn new() -> Self {
        Self {
            start_instant: Instant::now(),
            start_epoch: epoch_secs(),
            request_count: AtomicU64::new(0),
            last_request_time: AtomicU64::new(0),
            port: AtomicU64::new(0),
            endpoint_requests: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn set_port(&self, port: u16) {
        self.port.store(port as u64, Ordering::Relaxed);
    }

    /// Record one request and rewrite the stats file.
    pub fn record_request(&self, endpoint: &str) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.last_request_time.store(epoch_secs(), Ordering::Relaxed);

        {
            let read = self.endpoint_requests.read();
            if let Some(counter) = read.get(endpoint) {
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                drop(read);
                self.endpoint_requests
                    .write()
                    .entry(endpoint.to_string())
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        self.save();
    }

    pub fn uptime(&self) -> Duration {
        self.start_instant.elapsed()
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Rewrite `stats.json` under a brief lock.
    pub fn save(&self) {
        let persisted = PersistedStats {
            start_time: self.start_epoch,
            request_count: self.request_count.load(Ordering::Relaxed),
            last_request_time: self.last_request_time.load(Ordering::Relaxed),
            port: self.port.load(Ordering::Relaxed) as u16,
        };

        let _guard = self.write_lock.lock();
        let path = stats_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(data) = serde_json::to_string_pretty(&persisted) {
            let _ = std::fs::write(&path, data);
        }
    }

    /// JSON summary served on `GET /stats`.
    pub fn summary(&self) -> serde_json::Value {
        let endpoints: Vec<serde_json::Value> = self
            .endpoint_requests
            .read()
            .iter()
            .map(|(endpoint, count)| {
                serde_json::json!({
                    "endpoint": endpoint,
                    "requests": count.load(Ordering::Relaxed),
                })
            })
            .collect();

        serde_json::json!({
            "startTime": self.start_epoch,
            "uptime_seconds": self.uptime().as_secs(),
            "requestCount": self.request_count.load(Ordering::Relaxed),
            "lastRequestTime": self.last_request_time.load(Ordering::Relaxed),
            "port": self.port.load(Ordering::Relaxed) as u16,
            "endpoints": endpoints,
        })
    }
}
