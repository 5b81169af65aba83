// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

use ed25519_dalek::SigningKey;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic::Code;

use ethos_compile::source::{reference_profile, SourceProfile};
use ethos_compile::{compile_and_sign, CompilerConfig};
use ethos_core::profile::{SignedProfileSlice, TrustedGovernanceKeys};
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

async fn start_server() -> EthosGateClient<Channel> {
    let svc = EthosGateService::build(DaemonConfig::default(), trusted_keys());
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

fn compile_signed(source: &SourceProfile, key: &SigningKey) -> SignedProfileSlice {
    let config = CompilerConfig {
        validation_samples: 2_000,
        ..CompilerConfig::default()
    };
    let (signed, _) = compile_and_sign(source, &config, GOV_KEY_ID, key).expect("compile");
    signed
}

fn install_request(signed: &SignedProfileSlice) -> pb::InstallProfileRequest {
    pb::InstallProfileRequest {
        signed_slice_json: serde_json::to_vec(signed).expect("json"),
    }
}

#[tokio::test]
async fn newer_version_replaces_older_atomically() {
    let mut client = start_server().await;
    let source = reference_profile();
    let signed_v1 = compile_signed(&source, &governance_key());
    let response = client
        .install_profile(install_request(&signed_v1))
        .await
        .expect("v1")
        .into_inner();
    assert_eq!(response.version, 1);
    assert_eq!(response.replaced_version, 0);

    let mut v2 = source.clone();
    v2.version = 2;
    let signed_v2 = compile_signed(&v2, &governance_key());
    let response = client
        .install_profile(install_request(&signed_v2))
        .await
        .expect("v2")
        .into_inner();
    assert_eq!(response.version, 2);
    assert_eq!(response.replaced_version, 1);
}

#[tokio::test]
async fn version_regression_is_refused() {
    let mut client = start_server().await;
    let mut source = reference_profile();
    source.version = 3;
    let _ = client
        .install_profile(install_request(&compile_signed(&source, &governance_key())))
        .await
        .expect("v3");

    source.version = 2;
    let err = client
        .install_profile(install_request(&compile_signed(&source, &governance_key())))
        .await
        .expect_err("regression must fail");
    assert_eq!(err.code(), Code::FailedPrecondition);
}

#[tokio::test]
async fn unknown_signer_is_refused() {
    let mut client = start_server().await;
    let rogue = SigningKey::from_bytes(&[99_u8; 32]);
    let signed = compile_signed(&reference_profile(), &rogue);
    let err = client
        .install_profile(install_request(&signed))
        .await
        .expect_err("unknown signer must fail");
    assert_eq!(err.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn tampered_slice_fails_verification() {
    let mut client = start_server().await;
    let mut signed = compile_signed(&reference_profile(), &governance_key());
    signed.slice.weights[0] = signed.slice.weights[0].wrapping_add(1);
    let err = client
        .install_profile(install_request(&signed))
        .await
        .expect_err("tampered slice must fail");
    assert_eq!(err.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn garbage_envelope_is_invalid_argument() {
    let mut client = start_server().await;
    let err = client
        .install_profile(pb::InstallProfileRequest {
            signed_slice_json: b"{not json".to_vec(),
        })
        .await
        .expect_err("garbage must fail");
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn health_lists_installed_slices() {
    let mut client = start_server().await;
    let source = reference_profile();
    let _ = client
        .install_profile(install_request(&compile_signed(&source, &governance_key())))
        .await
        .expect("install 0");

    let mut second = source.clone();
    second.slice_id = 4;
    second.name = "reference-guardian-4".to_string();
    let _ = client
        .install_profile(install_request(&compile_signed(&second, &governance_key())))
        .await
        .expect("install 4");

    let health = client
        .get_health(pb::GetHealthRequest {})
        .await
        .expect("health")
        .into_inner();
    let mut ids: Vec<u32> = health.slices.iter().map(|s| s.slice_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 4]);
    assert_eq!(health.status, "ok");
}
