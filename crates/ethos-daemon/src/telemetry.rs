// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Daemon counters, the latency histogram, and the Prometheus text
//! endpoint. Alert fan-out to `WatchAlerts` subscribers rides a broadcast
//! channel; a lagging subscriber loses old events, never blocks the
//! pipeline.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;

use ethos_protocol::pb;

use crate::latency::LatencyHistogram;

const ALERT_CHANNEL_CAP: usize = 64;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("metrics server failed: {0}")]
    Server(std::io::Error),
}

#[must_use]
pub fn unix_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|v| v.as_micros() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct TelemetryState {
    admitted_total: HashMap<String, u64>,
    rejects_total: HashMap<String, u64>,
    evaluations_total: u64,
    profile_installs_total: u64,
    profile_quarantines_total: u64,
    latency: LatencyHistogram,
}

#[derive(Debug, Clone)]
pub struct Telemetry {
    state: Arc<Mutex<TelemetryState>>,
    alerts: broadcast::Sender<pb::AlertEvent>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    #[must_use]
    pub fn new() -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAP);
        Self {
            state: Arc::new(Mutex::new(TelemetryState {
                latency: LatencyHistogram::new(),
                ..TelemetryState::default()
            })),
            alerts,
        }
    }

    pub fn record_admitted(&self, class: &str) {
        let mut guard = self.state.lock();
        let entry = guard.admitted_total.entry(class.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_reject(&self, reason: &str) {
        let mut guard = self.state.lock();
        let entry = guard.rejects_total.entry(reason.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_evaluation(&self, latency_us: u64) {
        let mut guard = self.state.lock();
        guard.evaluations_total = guard.evaluations_total.saturating_add(1);
        guard.latency.record(latency_us);
    }

    /// Latency observation without a completed evaluation; used for entries
    /// that timed out in the queue, whose wait is still real.
    pub fn record_evaluation_latency(&self, latency_us: u64) {
        self.state.lock().latency.record(latency_us);
    }

    pub fn record_profile_install(&self) {
        let mut guard = self.state.lock();
        guard.profile_installs_total = guard.profile_installs_total.saturating_add(1);
    }

    pub fn record_profile_quarantine(&self) {
        let mut guard = self.state.lock();
        guard.profile_quarantines_total = guard.profile_quarantines_total.saturating_add(1);
    }

    #[must_use]
    pub fn evaluations_total(&self) -> u64 {
        self.state.lock().evaluations_total
    }

    #[must_use]
    pub fn reject_counts(&self) -> Vec<(String, u64)> {
        let guard = self.state.lock();
        let mut out: Vec<(String, u64)> = guard
            .rejects_total
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// (p50, p95, p99) in microseconds.
    #[must_use]
    pub fn latency_percentiles_us(&self) -> (u64, u64, u64) {
        let guard = self.state.lock();
        (
            guard.latency.percentile_us(0.50),
            guard.latency.percentile_us(0.95),
            guard.latency.percentile_us(0.99),
        )
    }

    pub fn emit_alert(&self, kind: pb::alert_event::Kind, subject: &str, detail: &str) {
        tracing::warn!(kind = ?kind, subject, detail, "ethos alert");
        let _ = self.alerts.send(pb::AlertEvent {
            kind: kind as i32,
            subject: subject.to_string(),
            detail: detail.to_string(),
            unix_us: unix_us(),
        });
    }

    #[must_use]
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<pb::AlertEvent> {
        self.alerts.subscribe()
    }

    #[must_use]
    pub fn render(&self) -> String {
        let guard = self.state.lock();
        let mut out = String::new();
        out.push_str("# TYPE ethos_admitted_total counter\n");
        for (class, value) in sorted(&guard.admitted_total) {
            let _ = writeln!(out, "ethos_admitted_total{{class=\"{class}\"}} {value}");
        }
        out.push_str("# TYPE ethos_rejects_total counter\n");
        for (reason, value) in sorted(&guard.rejects_total) {
            let _ = writeln!(out, "ethos_rejects_total{{reason=\"{reason}\"}} {value}");
        }
        out.push_str("# TYPE ethos_evaluations_total counter\n");
        let _ = writeln!(out, "ethos_evaluations_total {}", guard.evaluations_total);
        out.push_str("# TYPE ethos_profile_installs_total counter\n");
        let _ = writeln!(
            out,
            "ethos_profile_installs_total {}",
            guard.profile_installs_total
        );
        out.push_str("# TYPE ethos_profile_quarantines_total counter\n");
        let _ = writeln!(
            out,
            "ethos_profile_quarantines_total {}",
            guard.profile_quarantines_total
        );
        out.push_str("# TYPE ethos_evaluation_latency_us_bucket counter\n");
        let mut cumulative = 0_u64;
        for (bound, count) in guard.latency.buckets() {
            cumulative += count;
            let label = match bound {
                Some(bound) => bound.to_string(),
                None => "+Inf".to_string(),
            };
            let _ = writeln!(
                out,
                "ethos_evaluation_latency_us_bucket{{le=\"{label}\"}} {cumulative}"
            );
        }
        out
    }

    /// Serves `/metrics` over a raw one-request-per-connection listener; a
    /// full HTTP stack is not worth a dependency for a single text route.
    pub async fn spawn_metrics_server(
        self,
        addr: SocketAddr,
    ) -> Result<tokio::task::JoinHandle<()>, TelemetryError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(TelemetryError::Server)?;
        Ok(tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::error!(error=%err, "metrics server accept failed");
                        break;
                    }
                };
                let telemetry = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = telemetry.serve_metrics_request(socket).await {
                        tracing::warn!(error=%err, "metrics request failed");
                    }
                });
            }
        }))
    }

    async fn serve_metrics_request(
        &self,
        mut socket: tokio::net::TcpStream,
    ) -> std::io::Result<()> {
        let mut buf = [0_u8; 2048];
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let request_line = String::from_utf8_lossy(&buf[..n]);
        let (status, body) = if request_line.starts_with("GET /metrics ") {
            ("200 OK", self.render())
        } else {
            ("404 Not Found", "not found".to_string())
        };
        socket
            .write_all(plain_text_response(status, &body).as_bytes())
            .await
    }
}

fn plain_text_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\n\
         content-type: text/plain; version=0.0.4\r\n\
         content-length: {}\r\n\
         connection: close\r\n\r\n{body}",
        body.len()
    )
}

fn sorted(map: &HashMap<String, u64>) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_counters_and_buckets() {
        let t = Telemetry::new();
        t.record_admitted("critical");
        t.record_reject("rate_limited");
        t.record_reject("rate_limited");
        t.record_evaluation(30);
        let text = t.render();
        assert!(text.contains("ethos_admitted_total{class=\"critical\"} 1"));
        assert!(text.contains("ethos_rejects_total{reason=\"rate_limited\"} 2"));
        assert!(text.contains("ethos_evaluations_total 1"));
        assert!(text.contains("ethos_evaluation_latency_us_bucket{le=\"+Inf\"} 1"));
    }

    #[test]
    fn plain_text_response_frames_the_body() {
        let response = plain_text_response("200 OK", "x 1\n");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("content-length: 4\r\n"));
        assert!(response.ends_with("\r\n\r\nx 1\n"));
    }

    #[tokio::test]
    async fn alerts_fan_out_to_subscribers() {
        let t = Telemetry::new();
        let mut rx = t.subscribe_alerts();
        t.emit_alert(pb::alert_event::Kind::AgentSuspended, "agent-1", "rate");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, pb::alert_event::Kind::AgentSuspended as i32);
        assert_eq!(event.subject, "agent-1");
    }
}
