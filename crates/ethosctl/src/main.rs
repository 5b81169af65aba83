// Copyright [2026] [EthosOS Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;

use ethos_core::frame::{EthicsFrame, Ext128, FrameExt, VulnerableFlags, ZoneFlags, SPEED_Q};
use ethos_protocol::pb;
use ethos_protocol::pb::ethos_gate_client::EthosGateClient;
use tonic::transport::Channel;

#[derive(Parser)]
struct Cli {
    /// Daemon endpoint.
    #[arg(long, default_value = "http://127.0.0.1:50071")]
    addr: String,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit one frame for evaluation.
    Evaluate(EvaluateArgs),
    /// Install a signed profile slice envelope.
    InstallProfile {
        #[arg(long)]
        envelope: PathBuf,
    },
    /// Daemon health: queues, rejections, loaded slices, latency.
    Health,
    /// Newest decision-log records.
    Decisions {
        #[arg(long, default_value_t = 0)]
        limit: u32,
    },
    /// Protocol and daemon build identity.
    ServerInfo,
    /// Stream operational alerts until the server closes the stream.
    WatchAlerts,
}

#[derive(clap::Args)]
struct EvaluateArgs {
    #[arg(long, default_value = "ethosctl")]
    agent_id: String,
    #[arg(long, default_value_t = 1)]
    frame_id: u64,
    /// critical, normal or background.
    #[arg(long, default_value = "normal")]
    priority: String,
    #[arg(long)]
    option_id: u16,
    #[arg(long)]
    distance_band: u8,
    /// Signed closing speed in m/s; quantized to Q3.4 on the wire.
    #[arg(long, default_value_t = 0.0)]
    speed: f64,
    /// Zone flag bitmask (protected=1, consent=2, legal=4, sensitive=8).
    #[arg(long, default_value_t = 0)]
    zone_flags: u8,
    /// Vulnerable-presence bitmask (child=1, elderly=2, disabled=4, animal=8).
    #[arg(long, default_value_t = 0)]
    vulnerable: u8,
    #[arg(long, default_value_t = 0)]
    risk_band: u8,
    #[arg(long, default_value_t = 0)]
    slice_id: u8,
    #[arg(long)]
    action_type: u8,
    /// Adding any of the following switches the frame to the 128-bit layout.
    #[arg(long)]
    bystander_band: Option<u8>,
    #[arg(long)]
    contact_time_band: Option<u8>,
    #[arg(long)]
    mission_phase: Option<u8>,
    #[arg(long)]
    consent_state: Option<u8>,
    #[arg(long)]
    environment_class: Option<u8>,
    #[arg(long, default_value_t = 0)]
    wanted_version: u32,
    #[arg(long, default_value_t = 0)]
    timeout_us: u32,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let out = run(cli).await;
    match out {
        Ok(v) => println!("{}", serde_json::to_string_pretty(&v).unwrap_or_default()),
        Err(msg) => {
            println!("{}", json!({"error": msg}));
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<serde_json::Value, String> {
    let client = EthosGateClient::connect(cli.addr.clone())
        .await
        .map_err(|e| format!("connect {}: {e}", cli.addr))?;
    match cli.cmd {
        Command::Evaluate(args) => run_evaluate(client, args).await,
        Command::InstallProfile { envelope } => run_install(client, &envelope).await,
        Command::Health => run_health(client).await,
        Command::Decisions { limit } => run_decisions(client, limit).await,
        Command::ServerInfo => run_server_info(client).await,
        Command::WatchAlerts => run_watch_alerts(client).await,
    }
}

fn build_frame(args: &EvaluateArgs) -> Result<EthicsFrame, String> {
    let quantized = (args.speed * f64::from(SPEED_Q)).round();
    if !(f64::from(i8::MIN)..=f64::from(i8::MAX)).contains(&quantized) {
        return Err(format!("speed {} m/s out of Q3.4 range", args.speed));
    }
    let ext_given = args.bystander_band.is_some()
        || args.contact_time_band.is_some()
        || args.mission_phase.is_some()
        || args.consent_state.is_some()
        || args.environment_class.is_some();
    let ext = if ext_given {
        FrameExt::Ext128(Ext128 {
            bystander_band: args.bystander_band.unwrap_or(0),
            contact_time_band: args.contact_time_band.unwrap_or(0),
            mission_phase: args.mission_phase.unwrap_or(0),
            consent_state: args.consent_state.unwrap_or(0),
            environment_class: args.environment_class.unwrap_or(0),
        })
    } else {
        FrameExt::None
    };
    let frame = EthicsFrame {
        option_id: args.option_id,
        distance_band: args.distance_band,
        relative_speed: quantized as i8,
        zone_flags: ZoneFlags(args.zone_flags),
        vulnerable_presence: VulnerableFlags(args.vulnerable),
        risk_band: args.risk_band,
        profile_slice_id: args.slice_id,
        action_type: args.action_type,
        ext,
    };
    frame.validate().map_err(|e| e.to_string())?;
    Ok(frame)
}

fn parse_priority(s: &str) -> Result<pb::PriorityClass, String> {
    match s {
        "critical" => Ok(pb::PriorityClass::Critical),
        "normal" => Ok(pb::PriorityClass::Normal),
        "background" => Ok(pb::PriorityClass::Background),
        other => Err(format!("unknown priority {other}")),
    }
}

async fn run_evaluate(
    mut client: EthosGateClient<Channel>,
    args: EvaluateArgs,
) -> Result<serde_json::Value, String> {
    let frame = build_frame(&args)?;
    let priority = parse_priority(&args.priority)?;
    let response = client
        .evaluate(pb::EvaluateRequest {
            agent_id: args.agent_id.clone(),
            frame_id: args.frame_id,
            priority: priority as i32,
            frame: frame.encode().map_err(|e| e.to_string())?,
            wanted_profile_version: args.wanted_version,
            timeout_us: args.timeout_us,
            request_unix_us: 0,
        })
        .await
        .map_err(|e| e.to_string())?
        .into_inner();
    let status = pb::StatusCode::try_from(response.status).unwrap_or(pb::StatusCode::Unspecified);
    let verdict = pb::Verdict::try_from(response.verdict).unwrap_or(pb::Verdict::Unspecified);
    Ok(json!({
        "frame_id": response.frame_id,
        "option_id": response.option_id,
        "status": format!("{status:?}"),
        "verdict": format!("{verdict:?}"),
        "normative_score": response.normative_score,
        "hard_violation_flags": format!("{:#06x}", response.hard_violation_flags),
        "risk_assessment": response.risk_assessment,
        "dimension_scores": response.dimension_scores,
        "profile_slice_id": response.profile_slice_id,
        "profile_version": response.profile_version,
        "profile_fallback": response.profile_fallback,
        "latency_us": response.latency_us,
    }))
}

async fn run_install(
    mut client: EthosGateClient<Channel>,
    envelope: &PathBuf,
) -> Result<serde_json::Value, String> {
    let payload = fs::read(envelope).map_err(|e| format!("read {}: {e}", envelope.display()))?;
    let response = client
        .install_profile(pb::InstallProfileRequest {
            signed_slice_json: payload,
        })
        .await
        .map_err(|e| e.to_string())?
        .into_inner();
    Ok(json!({
        "slice_id": response.slice_id,
        "version": response.version,
        "replaced_version": response.replaced_version,
    }))
}

async fn run_health(mut client: EthosGateClient<Channel>) -> Result<serde_json::Value, String> {
    let health = client
        .get_health(pb::GetHealthRequest {})
        .await
        .map_err(|e| e.to_string())?
        .into_inner();
    let queues: Vec<serde_json::Value> = health
        .queues
        .iter()
        .map(|q| {
            let priority =
                pb::PriorityClass::try_from(q.priority).unwrap_or(pb::PriorityClass::Unspecified);
            json!({
                "priority": format!("{priority:?}"),
                "depth": q.depth,
                "capacity": q.capacity,
            })
        })
        .collect();
    let rejections: Vec<serde_json::Value> = health
        .rejections
        .iter()
        .map(|r| {
            let status =
                pb::StatusCode::try_from(r.status).unwrap_or(pb::StatusCode::Unspecified);
            json!({"status": format!("{status:?}"), "count": r.count})
        })
        .collect();
    let slices: Vec<serde_json::Value> = health
        .slices
        .iter()
        .map(|s| {
            json!({
                "slice_id": s.slice_id,
                "version": s.version,
                "quarantined": s.quarantined,
            })
        })
        .collect();
    Ok(json!({
        "status": health.status,
        "queues": queues,
        "rejections": rejections,
        "evaluations_total": health.evaluations_total,
        "latency_p50_us": health.latency_p50_us,
        "latency_p95_us": health.latency_p95_us,
        "latency_p99_us": health.latency_p99_us,
        "slices": slices,
        "suspensions_total": health.suspensions_total,
    }))
}

async fn run_decisions(
    mut client: EthosGateClient<Channel>,
    limit: u32,
) -> Result<serde_json::Value, String> {
    let log = client
        .read_decision_log(pb::ReadDecisionLogRequest { limit })
        .await
        .map_err(|e| e.to_string())?
        .into_inner();
    let records: Vec<serde_json::Value> = log
        .records
        .iter()
        .map(|r| {
            let status =
                pb::StatusCode::try_from(r.status).unwrap_or(pb::StatusCode::Unspecified);
            let verdict = pb::Verdict::try_from(r.verdict).unwrap_or(pb::Verdict::Unspecified);
            json!({
                "seq": r.seq,
                "frame_id": r.frame_id,
                "agent_id": r.agent_id,
                "option_id": r.option_id,
                "status": format!("{status:?}"),
                "verdict": format!("{verdict:?}"),
                "normative_score": r.normative_score,
                "hard_violation_flags": format!("{:#06x}", r.hard_violation_flags),
                "profile_slice_id": r.profile_slice_id,
                "profile_version": r.profile_version,
                "latency_us": r.latency_us,
                "unix_us": r.unix_us,
            })
        })
        .collect();
    Ok(json!({"records": records, "dropped_oldest": log.dropped_oldest}))
}

async fn run_server_info(
    mut client: EthosGateClient<Channel>,
) -> Result<serde_json::Value, String> {
    let info = client
        .get_server_info(pb::GetServerInfoRequest {})
        .await
        .map_err(|e| e.to_string())?
        .into_inner();
    Ok(json!({
        "protocol_semver": info.protocol_semver,
        "daemon_version": info.daemon_version,
        "pipeline_depth": info.pipeline_depth,
        "profile_slots": info.profile_slots,
        "uptime_us": info.uptime_us,
    }))
}

async fn run_watch_alerts(
    mut client: EthosGateClient<Channel>,
) -> Result<serde_json::Value, String> {
    let mut stream = client
        .watch_alerts(pb::WatchAlertsRequest {})
        .await
        .map_err(|e| e.to_string())?
        .into_inner();
    loop {
        match stream.message().await {
            Ok(Some(event)) => {
                let kind = pb::alert_event::Kind::try_from(event.kind)
                    .unwrap_or(pb::alert_event::Kind::Unspecified);
                println!(
                    "{}",
                    json!({
                        "kind": format!("{kind:?}"),
                        "subject": event.subject,
                        "detail": event.detail,
                        "unix_us": event.unix_us,
                    })
                );
            }
            Ok(None) => return Ok(json!({"status": "stream closed"})),
            Err(status) => return Err(status.to_string()),
        }
    }
}
