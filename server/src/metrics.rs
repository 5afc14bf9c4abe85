// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use commentary_core::{Outcome, PipelineReport};
use serde::Serialize;

/// Latency samples kept for percentile calculation
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Per-endpoint metrics
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub total_latency_ms: Arc<AtomicU64>,
    pub min_latency_ms: Arc<AtomicU64>,
    pub max_latency_ms: Arc<AtomicU64>,
    pub latency_samples: Arc<std::sync::Mutex<Vec<u64>>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            min_latency_ms: Arc::new(AtomicU64::new(u64::MAX)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn record_request(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            samples.push(latency_ms);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        if let Ok(samples) = self.latency_samples.lock() {
            if samples.is_empty() {
                return 0;
            }
            let mut sorted = samples.clone();
            sorted.sort_unstable();
            let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
            sorted[index]
        } else {
            0
        }
    }

    pub fn stats(&self) -> EndpointStats {
        let min = self.min_latency_ms.load(Ordering::Relaxed);
        EndpointStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: if min == u64::MAX { 0 } else { min },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline run counters
#[derive(Debug, Clone, Default)]
pub struct CommentaryMetrics {
    pub runs: Arc<AtomicU64>,
    pub completed: Arc<AtomicU64>,
    pub fallbacks: Arc<AtomicU64>,
    pub errors: Arc<AtomicU64>,
    pub disconnects: Arc<AtomicU64>,
    pub sentences: Arc<AtomicU64>,
    pub audio_ready: Arc<AtomicU64>,
    pub audio_absent: Arc<AtomicU64>,
}

impl CommentaryMetrics {
    pub fn record(&self, report: &PipelineReport) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        let outcome = match report.outcome {
            Outcome::Completed => &self.completed,
            Outcome::FellBack => &self.fallbacks,
            Outcome::Failed => &self.errors,
            Outcome::Disconnected => &self.disconnects,
        };
        outcome.fetch_add(1, Ordering::Relaxed);
        self.sentences.fetch_add(report.sentences as u64, Ordering::Relaxed);
        self.audio_ready.fetch_add(report.audio_ready as u64, Ordering::Relaxed);
        self.audio_absent.fetch_add(report.audio_absent as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CommentaryMetricsResponse {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CommentaryMetricsResponse {
            runs: load(&self.runs),
            completed: load(&self.completed),
            fallbacks: load(&self.fallbacks),
            errors: load(&self.errors),
            disconnects: load(&self.disconnects),
            sentences: load(&self.sentences),
            audio_ready: load(&self.audio_ready),
            audio_absent: load(&self.audio_absent),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppMetrics {
    pub started: Instant,
    pub move_endpoint: EndpointMetrics,
    pub stream_endpoint: EndpointMetrics,
    pub commentary: CommentaryMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            move_endpoint: EndpointMetrics::new(),
            stream_endpoint: EndpointMetrics::new(),
            commentary: CommentaryMetrics::default(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct DetailedMetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub endpoints: EndpointMetricsResponse,
    pub commentary: CommentaryMetricsResponse,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

impl SystemMetrics {
    pub fn collect(request_count: u64, uptime_seconds: u64) -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let memory_used = system.used_memory();
        let memory_total = system.total_memory();
        let memory_usage_percent = if memory_total > 0 {
            (memory_used as f64 / memory_total as f64 * 100.0) as f32
        } else {
            0.0
        };

        Self {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            request_count,
            uptime_seconds,
            system_load: system_load(),
        }
    }
}

/// One-minute load average (Unix-like systems only)
fn system_load() -> Option<f64> {
    #[cfg(unix)]
    {
        std::fs::read_to_string("/proc/loadavg")
            .ok()
            .and_then(|loadavg| loadavg.split_whitespace().next()?.parse::<f64>().ok())
    }
    #[cfg(not(unix))]
    None
}

#[derive(Serialize)]
pub struct EndpointMetricsResponse {
    #[serde(rename = "move")]
    pub move_endpoint: EndpointStats,
    pub move_stream: EndpointStats,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct CommentaryMetricsResponse {
    pub runs: u64,
    pub completed: u64,
    pub fallbacks: u64,
    pub errors: u64,
    pub disconnects: u64,
    pub sentences: u64,
    pub audio_ready: u64,
    pub audio_absent: u64,
}
