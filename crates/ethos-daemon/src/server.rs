// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! gRPC surface and the admission-to-verdict pipeline.
//!
//! `Evaluate` runs fully in-band: admission failures come back as status
//! codes in the response, not transport errors, so a caller's handling
//! path is uniform. Control-plane calls (`InstallProfile`) use tonic
//! statuses. A fixed dispatcher/worker pair bounds concurrent evaluation
//! at the configured pipeline depth.

use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};

use ethos_core::error::EthosError;
use ethos_core::eval::{evaluate, Verdict};
use ethos_core::frame::EthicsFrame;
use ethos_core::profile::{SignedProfileSlice, TrustedGovernanceKeys, PROFILE_SLOTS};
use ethos_core::store::ProfileStore;
use ethos_protocol::{pb, PROTOCOL_SEMVER};

use pb::ethos_gate_server::EthosGate;

use crate::admission::{AdmissionController, AdmissionVerdict};
use crate::config::DaemonConfig;
use crate::decision_log::{DecisionRecord, DecisionRing};
use crate::queue::{Priority, PriorityQueues, PushOutcome, QueueEntry};
use crate::telemetry::{unix_us, Telemetry};

const DECISION_LOG_DEFAULT_PAGE: usize = 64;
const DECISION_LOG_MAX_PAGE: usize = 512;

struct GateState {
    cfg: DaemonConfig,
    store: ProfileStore,
    trusted_keys: TrustedGovernanceKeys,
    admission: Mutex<AdmissionController>,
    queues: Mutex<PriorityQueues>,
    work_signal: Notify,
    telemetry: Telemetry,
    decision_log: Mutex<DecisionRing>,
    started_unix_us: u64,
}

#[derive(Clone)]
pub struct EthosGateService {
    state: Arc<GateState>,
}

fn reject_reason(status: pb::StatusCode) -> &'static str {
    match status {
        pb::StatusCode::InvalidFrameFormat => "invalid_frame_format",
        pb::StatusCode::UnknownProfile => "unknown_profile",
        pb::StatusCode::QueueFull => "queue_full",
        pb::StatusCode::RateLimited => "rate_limited",
        pb::StatusCode::Suspended => "suspended",
        pb::StatusCode::TimedOut => "timed_out",
        _ => "internal_error",
    }
}

fn reason_status(reason: &str) -> pb::StatusCode {
    match reason {
        "invalid_frame_format" => pb::StatusCode::InvalidFrameFormat,
        "unknown_profile" => pb::StatusCode::UnknownProfile,
        "queue_full" => pb::StatusCode::QueueFull,
        "rate_limited" => pb::StatusCode::RateLimited,
        "suspended" => pb::StatusCode::Suspended,
        "timed_out" => pb::StatusCode::TimedOut,
        _ => pb::StatusCode::InternalError,
    }
}

fn reject_response(frame_id: u64, status: pb::StatusCode, now_us: u64) -> pb::EvaluateResponse {
    pb::EvaluateResponse {
        frame_id,
        option_id: 0,
        status: status as i32,
        verdict: pb::Verdict::Unspecified as i32,
        normative_score: 0,
        hard_violation_flags: 0,
        risk_assessment: 0,
        dimension_scores: Vec::new(),
        profile_slice_id: 0,
        profile_version: 0,
        profile_fallback: false,
        latency_us: 0,
        response_unix_us: now_us,
    }
}

impl GateState {
    /// Terminal outcome bookkeeping shared by every path that produces a
    /// response: reject counter, decision record, nothing else.
    fn log_outcome(&self, agent_id: &str, response: &pb::EvaluateResponse) {
        let status =
            pb::StatusCode::try_from(response.status).unwrap_or(pb::StatusCode::InternalError);
        if status != pb::StatusCode::Success {
            self.telemetry.record_reject(reject_reason(status));
        }
        let verdict =
            pb::Verdict::try_from(response.verdict).unwrap_or(pb::Verdict::Unspecified);
        let mut log = self.decision_log.lock();
        let _ = log.push(DecisionRecord {
            seq: 0,
            frame_id: response.frame_id,
            agent_tag: DecisionRecord::agent_tag_of(agent_id),
            option_id: response.option_id.min(u32::from(u16::MAX)) as u16,
            status,
            verdict,
            normative_score: response.normative_score.min(u32::from(u16::MAX)) as u16,
            hard_violation_flags: response.hard_violation_flags.min(u32::from(u16::MAX)) as u16,
            profile_slice_id: response.profile_slice_id.min(255) as u8,
            profile_version: response.profile_version,
            latency_us: response.latency_us,
            unix_us: response.response_unix_us,
        });
    }

    fn respond(&self, entry: QueueEntry, response: pb::EvaluateResponse) {
        self.log_outcome(&entry.agent_id, &response);
        // The caller may have given up; a dead receiver is not an error.
        let _ = entry.responder.send(response);
    }

    /// Runs one popped entry through slice selection and the pipeline.
    fn process(&self, entry: QueueEntry) {
        let now = unix_us();
        if now > entry.deadline_us {
            let mut response = reject_response(entry.frame_id, pb::StatusCode::TimedOut, now);
            // The true queue wait still lands in the histogram and the log.
            response.latency_us = now.saturating_sub(entry.enqueued_us);
            self.telemetry.record_evaluation_latency(response.latency_us);
            self.respond(entry, response);
            return;
        }

        let selection = match self
            .store
            .select(entry.frame.profile_slice_id, entry.wanted_profile_version)
        {
            Ok(selection) => selection,
            Err(EthosError::UnknownProfile(_)) => {
                let response =
                    reject_response(entry.frame_id, pb::StatusCode::UnknownProfile, now);
                self.respond(entry, response);
                return;
            }
            Err(err) => {
                self.telemetry.emit_alert(
                    pb::alert_event::Kind::PipelineFault,
                    &format!("slice-{}", entry.frame.profile_slice_id),
                    &err.to_string(),
                );
                let response =
                    reject_response(entry.frame_id, pb::StatusCode::InternalError, now);
                self.respond(entry, response);
                return;
            }
        };

        let evaluation = evaluate(&entry.frame, &selection.slice);
        let done = unix_us();
        let latency_us = done.saturating_sub(entry.enqueued_us);
        self.telemetry.record_evaluation(latency_us);

        let verdict = match evaluation.verdict() {
            Verdict::Permitted => pb::Verdict::Permitted,
            Verdict::Forbidden => pb::Verdict::Forbidden,
        };
        let response = pb::EvaluateResponse {
            frame_id: entry.frame_id,
            option_id: u32::from(entry.frame.option_id),
            status: pb::StatusCode::Success as i32,
            verdict: verdict as i32,
            normative_score: u32::from(evaluation.normative_score),
            hard_violation_flags: u32::from(evaluation.hard_violation_flags.0),
            risk_assessment: u32::from(evaluation.risk_assessment),
            dimension_scores: evaluation
                .dimension_scores
                .iter()
                .map(|s| u32::from(*s))
                .collect(),
            profile_slice_id: u32::from(evaluation.profile_slice_id),
            profile_version: evaluation.profile_version,
            profile_fallback: selection.fallback,
            latency_us,
            response_unix_us: done,
        };
        self.respond(entry, response);
    }
}

impl EthosGateService {
    /// Builds the service and spawns the dispatcher and worker tasks.
    /// Must run inside a tokio runtime.
    pub fn build(cfg: DaemonConfig, trusted_keys: TrustedGovernanceKeys) -> Self {
        let state = Arc::new(GateState {
            queues: Mutex::new(PriorityQueues::new(
                cfg.critical_queue_cap,
                cfg.normal_queue_cap,
                cfg.background_queue_cap,
                cfg.aging_interval_ms,
            )),
            admission: Mutex::new(AdmissionController::new(cfg.clone())),
            decision_log: Mutex::new(DecisionRing::new(cfg.decision_log_cap)),
            store: ProfileStore::new(),
            trusted_keys,
            work_signal: Notify::new(),
            telemetry: Telemetry::new(),
            started_unix_us: unix_us(),
            cfg,
        });

        let mut worker_txs = Vec::with_capacity(state.cfg.workers.max(1));
        for _ in 0..state.cfg.workers.max(1) {
            let (tx, mut rx) = mpsc::channel::<QueueEntry>(1);
            worker_txs.push(tx);
            let worker_state = Arc::clone(&state);
            tokio::spawn(async move {
                while let Some(entry) = rx.recv().await {
                    worker_state.process(entry);
                }
            });
        }

        let dispatch_state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut next_worker = 0_usize;
            loop {
                let entry = loop {
                    let popped = dispatch_state.queues.lock().pop(unix_us());
                    match popped {
                        Some(entry) => break entry,
                        None => dispatch_state.work_signal.notified().await,
                    }
                };
                let target = next_worker % worker_txs.len();
                next_worker = next_worker.wrapping_add(1);
                if worker_txs[target].send(entry).await.is_err() {
                    return;
                }
            }
        });

        Self { state }
    }

    #[must_use]
    pub fn telemetry(&self) -> Telemetry {
        self.state.telemetry.clone()
    }

    /// Probes every loaded slice for determinism and quarantines the ones
    /// that fail. Intended to run at startup and on a timer.
    pub fn run_self_check_sweep(&self) -> Vec<u8> {
        let quarantined = self.state.store.sweep_self_check();
        for slice_id in &quarantined {
            self.record_fence(*slice_id, "pipeline self-check failed");
        }
        quarantined
    }

    /// Operator-initiated fence for a loaded slot. Same bookkeeping as a
    /// failed self-check: the slot refuses evaluations until a fresh slice
    /// is installed over it.
    pub fn quarantine_slice(&self, slice_id: u8) -> Result<(), EthosError> {
        self.state.store.quarantine(slice_id)?;
        self.record_fence(slice_id, "quarantined by operator");
        Ok(())
    }

    fn record_fence(&self, slice_id: u8, detail: &str) {
        self.state.telemetry.record_profile_quarantine();
        self.state.telemetry.emit_alert(
            pb::alert_event::Kind::SliceQuarantined,
            &format!("slice-{slice_id}"),
            detail,
        );
    }

    /// Signature-checked install, shared by the gRPC handler and startup
    /// preloading.
    pub fn install_signed(
        &self,
        signed: SignedProfileSlice,
    ) -> Result<(u8, u32, Option<u32>), EthosError> {
        signed.verify(&self.state.trusted_keys)?;
        let slice = signed.slice;
        let slice_id = slice.slice_id;
        let version = slice.version;
        let replaced = self.state.store.install(slice)?;
        self.state.telemetry.record_profile_install();
        tracing::info!(slice_id, version, replaced = ?replaced, "profile slice installed");
        Ok((slice_id, version, replaced))
    }

    fn admission_check(&self, agent_id: &str, now: u64) -> Option<pb::StatusCode> {
        let mut admission = self.state.admission.lock();
        let before = admission.suspensions_total();
        let verdict = admission.admit(agent_id, now);
        let newly_suspended = admission.suspensions_total() > before;
        drop(admission);
        if newly_suspended {
            self.state.telemetry.emit_alert(
                pb::alert_event::Kind::AgentSuspended,
                agent_id,
                "arrival rate over suspension threshold",
            );
        }
        match verdict {
            AdmissionVerdict::Admit => None,
            AdmissionVerdict::RateLimited { .. } => Some(pb::StatusCode::RateLimited),
            AdmissionVerdict::Suspended { .. } => Some(pb::StatusCode::Suspended),
        }
    }

    fn record_bad_frame(&self, agent_id: &str, now: u64) {
        let suspended = self.state.admission.lock().record_bad_frame(agent_id, now);
        if suspended.is_some() {
            self.state.telemetry.emit_alert(
                pb::alert_event::Kind::AgentSuspended,
                agent_id,
                "malformed-frame budget exceeded",
            );
        }
    }
}

type AlertStream = Pin<Box<dyn Stream<Item = Result<pb::AlertEvent, Status>> + Send>>;

#[tonic::async_trait]
impl EthosGate for EthosGateService {
    type WatchAlertsStream = AlertStream;

    async fn evaluate(
        &self,
        request: Request<pb::EvaluateRequest>,
    ) -> Result<Response<pb::EvaluateResponse>, Status> {
        let req = request.into_inner();
        let now = unix_us();

        if let Some(status) = self.admission_check(&req.agent_id, now) {
            let response = reject_response(req.frame_id, status, now);
            self.state.log_outcome(&req.agent_id, &response);
            return Ok(Response::new(response));
        }

        let frame = match EthicsFrame::decode(&req.frame) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(agent = %req.agent_id, error = %err, "malformed frame");
                self.record_bad_frame(&req.agent_id, now);
                let response =
                    reject_response(req.frame_id, pb::StatusCode::InvalidFrameFormat, now);
                self.state.log_outcome(&req.agent_id, &response);
                return Ok(Response::new(response));
            }
        };

        let priority = Priority::from_proto(req.priority);
        let timeout_us = if req.timeout_us == 0 {
            self.state.cfg.default_timeout_us
        } else {
            u64::from(req.timeout_us)
        };
        let (tx, rx) = oneshot::channel();
        let entry = QueueEntry {
            agent_id: req.agent_id.clone(),
            frame_id: req.frame_id,
            frame,
            wanted_profile_version: req.wanted_profile_version,
            priority,
            enqueued_us: now,
            deadline_us: now.saturating_add(timeout_us),
            responder: tx,
        };

        let outcome = self.state.queues.lock().push(entry);
        match outcome {
            PushOutcome::Enqueued => {}
            PushOutcome::EnqueuedDroppedOldest(old) => {
                let response = reject_response(old.frame_id, pb::StatusCode::QueueFull, now);
                self.state.respond(old, response);
            }
            PushOutcome::Rejected(rejected) => {
                let response =
                    reject_response(rejected.frame_id, pb::StatusCode::QueueFull, now);
                self.state.respond(rejected, response);
                // The oneshot pair tears down with the entry; answer the
                // live request directly.
                return match rx.await {
                    Ok(response) => Ok(Response::new(response)),
                    Err(_) => Err(Status::internal("response channel closed")),
                };
            }
        }
        self.state
            .telemetry
            .record_admitted(match priority {
                Priority::Critical => "critical",
                Priority::Normal => "normal",
                Priority::Background => "background",
            });
        self.state.work_signal.notify_one();

        // Transport-level backstop well past the admission deadline; the
        // dispatcher answers TimedOut in-band first.
        let wait = std::time::Duration::from_micros(timeout_us.saturating_mul(4).max(1_000_000));
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(response)) => Ok(Response::new(response)),
            Ok(Err(_)) => Err(Status::internal("response channel closed")),
            Err(_) => {
                let response =
                    reject_response(req.frame_id, pb::StatusCode::TimedOut, unix_us());
                self.state.log_outcome(&req.agent_id, &response);
                Ok(Response::new(response))
            }
        }
    }

    async fn install_profile(
        &self,
        request: Request<pb::InstallProfileRequest>,
    ) -> Result<Response<pb::InstallProfileResponse>, Status> {
        let req = request.into_inner();
        let signed: SignedProfileSlice = serde_json::from_slice(&req.signed_slice_json)
            .map_err(|e| Status::invalid_argument(format!("malformed slice envelope: {e}")))?;

        let (slice_id, version, replaced) = self.install_signed(signed).map_err(|e| match e {
            EthosError::SignatureRejected(msg) => Status::permission_denied(msg),
            EthosError::InvalidArgument(msg) => Status::failed_precondition(msg),
            other => Status::internal(other.to_string()),
        })?;

        Ok(Response::new(pb::InstallProfileResponse {
            slice_id: u32::from(slice_id),
            version,
            replaced_version: replaced.unwrap_or(0),
        }))
    }

    async fn get_health(
        &self,
        _request: Request<pb::GetHealthRequest>,
    ) -> Result<Response<pb::GetHealthResponse>, Status> {
        let queues = {
            let guard = self.state.queues.lock();
            guard
                .depths()
                .into_iter()
                .map(|(priority, depth, capacity)| pb::QueueDepth {
                    priority: priority.to_proto() as i32,
                    depth: depth as u32,
                    capacity: capacity as u32,
                })
                .collect()
        };
        let rejections = self
            .state
            .telemetry
            .reject_counts()
            .into_iter()
            .map(|(reason, count)| pb::RejectionCount {
                status: reason_status(&reason) as i32,
                count,
            })
            .collect();
        let slices: Vec<pb::LoadedSlice> = self
            .state
            .store
            .loaded()
            .into_iter()
            .map(|(slice_id, version, quarantined)| pb::LoadedSlice {
                slice_id: u32::from(slice_id),
                version,
                quarantined,
            })
            .collect();
        let degraded = slices.iter().any(|s| s.quarantined);
        let (p50, p95, p99) = self.state.telemetry.latency_percentiles_us();
        let suspensions_total = self.state.admission.lock().suspensions_total();

        Ok(Response::new(pb::GetHealthResponse {
            status: if degraded { "degraded" } else { "ok" }.to_string(),
            queues,
            rejections,
            evaluations_total: self.state.telemetry.evaluations_total(),
            latency_p50_us: p50,
            latency_p95_us: p95,
            latency_p99_us: p99,
            slices,
            suspensions_total,
        }))
    }

    async fn read_decision_log(
        &self,
        request: Request<pb::ReadDecisionLogRequest>,
    ) -> Result<Response<pb::ReadDecisionLogResponse>, Status> {
        let req = request.into_inner();
        let limit = if req.limit == 0 {
            DECISION_LOG_DEFAULT_PAGE
        } else {
            (req.limit as usize).min(DECISION_LOG_MAX_PAGE)
        };
        let log = self.state.decision_log.lock();
        let records = log.newest(limit).iter().map(DecisionRecord::to_proto).collect();
        let dropped_oldest = log.dropped_oldest();
        drop(log);
        Ok(Response::new(pb::ReadDecisionLogResponse {
            records,
            dropped_oldest,
        }))
    }

    async fn watch_alerts(
        &self,
        _request: Request<pb::WatchAlertsRequest>,
    ) -> Result<Response<Self::WatchAlertsStream>, Status> {
        let mut alerts = self.state.telemetry.subscribe_alerts();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            loop {
                match alerts.recv().await {
                    Ok(event) => {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    // Lagged subscribers skip ahead rather than drop out.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get_server_info(
        &self,
        _request: Request<pb::GetServerInfoRequest>,
    ) -> Result<Response<pb::GetServerInfoResponse>, Status> {
        Ok(Response::new(pb::GetServerInfoResponse {
            protocol_semver: PROTOCOL_SEMVER.to_string(),
            daemon_version: env!("CARGO_PKG_VERSION").to_string(),
            pipeline_depth: self.state.cfg.workers as u32,
            profile_slots: PROFILE_SLOTS as u32,
            uptime_us: unix_us().saturating_sub(self.state.started_unix_us),
        }))
    }
}
