//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler simultaneously.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Lets many handlers share ownership of the same data safely
//! - Cleans up automatically when the last reference drops
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: multiple ownership across request handlers
//! - **RwLock**: many readers or one writer at a time
//! - Used here for the config and the metrics; the job store brings its own
//!   sharded locking, and the engine serializes itself internally, so both
//!   are shared as plain `Arc`s.

use crate::config::AppConfig;
use crate::jobs::{JobExecutor, JobStore};
use crate::media::MediaRetriever;
use crate::transcription::{SpeechRecognizer, TranscriptionEngine};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (read-mostly)
    pub config: Arc<RwLock<AppConfig>>,

    /// Transcription job records
    pub jobs: Arc<JobStore>,

    /// Background execution of transcription jobs
    pub executor: Arc<JobExecutor>,

    /// The shared recognition engine (also used by streaming sessions)
    pub engine: Arc<TranscriptionEngine>,

    /// Request metrics, updated by the telemetry middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (immutable, safe to share directly)
    pub start_time: Instant,
}

/// Request metrics collected across all endpoints.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP requests since startup
    pub request_count: u64,

    /// Total error responses since startup
    pub error_count: u64,

    /// Currently open streaming transcription connections
    pub active_streams: u32,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Statistics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Wire up the full component graph from a validated configuration.
    ///
    /// The executor only ever sees the engine through the `SpeechRecognizer`
    /// trait; that seam is what lets its tests substitute stubs.
    pub fn new(config: AppConfig) -> Result<Self> {
        let jobs = Arc::new(JobStore::new());
        let engine = Arc::new(TranscriptionEngine::new(&config)?);
        let retriever = Arc::new(MediaRetriever::new(&config.media)?);

        let recognizer: Arc<dyn SpeechRecognizer> = engine.clone();
        let executor = Arc::new(JobExecutor::new(
            jobs.clone(),
            recognizer,
            retriever,
            config.jobs.max_concurrent,
        ));

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            jobs,
            executor,
            engine,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        })
    }

    /// Copy of the current configuration; cloning releases the lock before
    /// the caller does anything slow with it.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record one finished request for an endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Called when a streaming connection opens.
    pub fn increment_active_streams(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_streams += 1;
    }

    /// Called when a streaming connection closes. Guards against underflow
    /// so a double decrement cannot panic.
    pub fn decrement_active_streams(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_streams > 0 {
            metrics.active_streams -= 1;
        }
    }

    /// Consistent copy of the metrics for the health endpoints. Cloning
    /// avoids holding the lock while serializing the response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_streams: metrics.active_streams,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wires_up_from_default_config() {
        let state = AppState::new(AppConfig::default()).unwrap();
        assert!(state.jobs.is_empty());
        assert_eq!(state.executor.running_jobs(), 0);
    }

    #[test]
    fn test_stream_gauge_does_not_underflow() {
        let state = AppState::new(AppConfig::default()).unwrap();

        state.increment_active_streams();
        state.decrement_active_streams();
        state.decrement_active_streams(); // extra decrement must be a no-op

        assert_eq!(state.get_metrics_snapshot().active_streams, 0);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = AppState::new(AppConfig::default()).unwrap();

        state.record_endpoint_request("GET /status", 10, false);
        state.record_endpoint_request("GET /status", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /status"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.error_count, 1);
        assert!((metric.average_duration_ms() - 20.0).abs() < f64::EPSILON);
        assert!((metric.error_rate() - 0.5).abs() < f64::EPSILON);
    }
}
