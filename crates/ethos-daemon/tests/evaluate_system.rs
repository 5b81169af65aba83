// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

use ed25519_dalek::SigningKey;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};

use ethos_compile::source::reference_profile;
use ethos_compile::{compile_and_sign, CompilerConfig};
use ethos_core::frame::{EthicsFrame, Ext128, FrameExt, VulnerableFlags, ZoneFlags};
use ethos_core::profile::{TrustedGovernanceKeys, Violation, ViolationFlags, SCORE_ONE};
use ethos_daemon::config::DaemonConfig;
use ethos_daemon::server::EthosGateService;
use ethos_protocol::pb;
use ethos_protocol::pb::ethos_gate_client::EthosGateClient;
use ethos_protocol::pb::ethos_gate_server::EthosGateServer;

const GOV_KEY_ID: &str = "gov-test";

fn governance_key() -> SigningKey {
    SigningKey::from_bytes(&[11_u8; 32])
}

fn trusted_keys() -> TrustedGovernanceKeys {
    let mut keys = TrustedGovernanceKeys::default();
    keys.insert_hex(
        GOV_KEY_ID,
        &hex::encode(governance_key().verifying_key().to_bytes()),
    )
    .expect("trusted key");
    keys
}

async fn start_server(cfg: DaemonConfig) -> EthosGateClient<Channel> {
    let svc = EthosGateService::build(cfg, trusted_keys());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let incoming = TcpListenerStream::new(listener);
    tokio::spawn(async move {
        Server::builder()
            .add_service(EthosGateServer::new(svc))
            .serve_with_incoming(incoming)
            .await
            .expect("server run");
    });
    EthosGateClient::connect(format!("http://{addr}"))
        .await
        .expect("connect")
}

async fn install_reference_profile(client: &mut EthosGateClient<Channel>) {
    let config = CompilerConfig {
        validation_samples: 2_000,
        ..CompilerConfig::default()
    };
    let (signed, _) = compile_and_sign(
        &reference_profile(),
        &config,
        GOV_KEY_ID,
        &governance_key(),
    )
    .expect("compile");
    let payload = serde_json::to_vec(&signed).expect("envelope json");
    let response = client
        .install_profile(pb::InstallProfileRequest {
            signed_slice_json: payload,
        })
        .await
        .expect("install")
        .into_inner();
    assert_eq!(response.slice_id, 0);
    assert_eq!(response.version, 1);
}

fn benign_frame() -> EthicsFrame {
    EthicsFrame {
        option_id: 7,
        distance_band: 6,
        relative_speed: 0,
        zone_flags: ZoneFlags(0),
        vulnerable_presence: VulnerableFlags(0),
        risk_band: 0,
        profile_slice_id: 0,
        action_type: 3,
        ext: FrameExt::None,
    }
}

fn vulnerable_high_risk_frame() -> EthicsFrame {
    EthicsFrame {
        option_id: 9,
        distance_band: 1,
        relative_speed: 24,
        zone_flags: ZoneFlags(0),
        vulnerable_presence: VulnerableFlags(VulnerableFlags::CHILD),
        risk_band: 3,
        profile_slice_id: 0,
        action_type: 3,
        ext: FrameExt::Ext128(Ext128 {
            bystander_band: 8,
            contact_time_band: 0,
            mission_phase: 0,
            consent_state: 0,
            environment_class: 0,
        }),
    }
}

fn evaluate_request(frame: &EthicsFrame, frame_id: u64, agent_id: &str) -> pb::EvaluateRequest {
    pb::EvaluateRequest {
        agent_id: agent_id.to_string(),
        frame_id,
        priority: pb::PriorityClass::Normal as i32,
        frame: frame.encode().expect("encode"),
        wanted_profile_version: 0,
        timeout_us: 0,
        request_unix_us: 0,
    }
}

#[tokio::test]
async fn benign_distant_action_is_permitted() {
    let mut client = start_server(DaemonConfig::default()).await;
    install_reference_profile(&mut client).await;

    let response = client
        .evaluate(evaluate_request(&benign_frame(), 1, "nav-agent"))
        .await
        .expect("rpc")
        .into_inner();
    assert_eq!(response.status, pb::StatusCode::Success as i32);
    assert_eq!(response.verdict, pb::Verdict::Permitted as i32);
    assert_eq!(response.hard_violation_flags, 0);
    assert!(response.normative_score > u32::from(SCORE_ONE) / 2);
    assert_eq!(response.dimension_scores.len(), 5);
    assert_eq!(response.option_id, 7);
    assert!(!response.profile_fallback);
}

#[tokio::test]
async fn vulnerable_high_risk_action_is_forbidden() {
    let mut client = start_server(DaemonConfig::default()).await;
    install_reference_profile(&mut client).await;

    let response = client
        .evaluate(evaluate_request(&vulnerable_high_risk_frame(), 2, "nav-agent"))
        .await
        .expect("rpc")
        .into_inner();
    assert_eq!(response.status, pb::StatusCode::Success as i32);
    assert_eq!(response.verdict, pb::Verdict::Forbidden as i32);
    let flags = ViolationFlags(response.hard_violation_flags as u16);
    assert!(flags.contains(Violation::VulnerableRisk));
    assert_eq!(response.risk_assessment, 3);
}

#[tokio::test]
async fn identical_frames_evaluate_identically() {
    let mut client = start_server(DaemonConfig::default()).await;
    install_reference_profile(&mut client).await;

    let first = client
        .evaluate(evaluate_request(&benign_frame(), 10, "nav-agent"))
        .await
        .expect("rpc")
        .into_inner();
    let second = client
        .evaluate(evaluate_request(&benign_frame(), 11, "nav-agent"))
        .await
        .expect("rpc")
        .into_inner();
    assert_eq!(first.normative_score, second.normative_score);
    assert_eq!(first.dimension_scores, second.dimension_scores);
    assert_eq!(first.hard_violation_flags, second.hard_violation_flags);
    assert_eq!(first.verdict, second.verdict);
}

#[tokio::test]
async fn unknown_profile_before_any_install() {
    let mut client = start_server(DaemonConfig::default()).await;
    let response = client
        .evaluate(evaluate_request(&benign_frame(), 3, "early-agent"))
        .await
        .expect("rpc")
        .into_inner();
    assert_eq!(response.status, pb::StatusCode::UnknownProfile as i32);
}

#[tokio::test]
async fn empty_slot_falls_back_to_nearest_loaded_slice() {
    let mut client = start_server(DaemonConfig::default()).await;
    install_reference_profile(&mut client).await;

    let mut frame = benign_frame();
    frame.profile_slice_id = 5;
    let response = client
        .evaluate(evaluate_request(&frame, 4, "nav-agent"))
        .await
        .expect("rpc")
        .into_inner();
    assert_eq!(response.status, pb::StatusCode::Success as i32);
    assert!(response.profile_fallback);
    assert_eq!(response.profile_slice_id, 0);
}

#[tokio::test]
async fn malformed_frame_bytes_are_rejected_in_band() {
    let mut client = start_server(DaemonConfig::default()).await;
    install_reference_profile(&mut client).await;

    let mut request = evaluate_request(&benign_frame(), 5, "nav-agent");
    request.frame = vec![0xff; 7]; // invalid length
    let response = client.evaluate(request).await.expect("rpc").into_inner();
    assert_eq!(response.status, pb::StatusCode::InvalidFrameFormat as i32);

    // Reserved bits set: right length, still malformed.
    let mut request = evaluate_request(&benign_frame(), 6, "nav-agent");
    request.frame = vec![0xff; 8];
    let response = client.evaluate(request).await.expect("rpc").into_inner();
    assert_eq!(response.status, pb::StatusCode::InvalidFrameFormat as i32);
}

#[tokio::test]
async fn decision_log_and_health_reflect_traffic() {
    let mut client = start_server(DaemonConfig::default()).await;
    install_reference_profile(&mut client).await;

    for i in 0..5_u64 {
        let _ = client
            .evaluate(evaluate_request(&benign_frame(), 100 + i, "log-agent"))
            .await
            .expect("rpc");
    }
    let mut bad = evaluate_request(&benign_frame(), 200, "log-agent");
    bad.frame = vec![1, 2, 3];
    let _ = client.evaluate(bad).await.expect("rpc");

    let log = client
        .read_decision_log(pb::ReadDecisionLogRequest { limit: 10 })
        .await
        .expect("log")
        .into_inner();
    assert!(log.records.len() >= 6);
    // Newest first.
    assert_eq!(log.records[0].frame_id, 200);
    assert_eq!(
        log.records[0].status,
        pb::StatusCode::InvalidFrameFormat as i32
    );
    assert_eq!(log.records[0].agent_id, "log-agent");
    let seqs: Vec<u64> = log.records.iter().map(|r| r.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] > w[1]));

    let health = client
        .get_health(pb::GetHealthRequest {})
        .await
        .expect("health")
        .into_inner();
    assert_eq!(health.status, "ok");
    assert_eq!(health.evaluations_total, 5);
    assert_eq!(health.queues.len(), 3);
    assert!(health
        .rejections
        .iter()
        .any(|r| r.status == pb::StatusCode::InvalidFrameFormat as i32 && r.count == 1));
    assert_eq!(health.slices.len(), 1);
    assert!(!health.slices[0].quarantined);
}

#[tokio::test]
async fn server_info_reports_contract_constants() {
    let mut client = start_server(DaemonConfig::default()).await;
    let info = client
        .get_server_info(pb::GetServerInfoRequest {})
        .await
        .expect("info")
        .into_inner();
    assert_eq!(info.protocol_semver, "1.0.0");
    assert_eq!(info.profile_slots, 16);
    assert_eq!(info.pipeline_depth, 2);
}
