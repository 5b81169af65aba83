// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ed25519_dalek::SigningKey;
use ethos_compile::source::reference_profile;
use ethos_compile::{compile, CompilerConfig};
use ethos_core::frame::{EthicsFrame, Ext128, FrameExt, VulnerableFlags, ZoneFlags};
use ethos_core::profile::ProfileSlice;
use ethos_core::{evaluate, ProfileStore};
use ethos_daemon::config::DaemonConfig;
use ethos_daemon::server::EthosGateService;
use ethos_protocol::pb;
use ethos_protocol::pb::ethos_gate_client::EthosGateClient;
use ethos_protocol::pb::ethos_gate_server::EthosGateServer;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tonic::transport::{Channel, Server};

fn compiled_reference_slice() -> ProfileSlice {
    let config = CompilerConfig {
        validation_samples: 1_000,
        ..CompilerConfig::default()
    };
    let (slice, _) = compile(&reference_profile(), &config).expect("compile");
    slice
}

fn frame_for(ext: FrameExt) -> EthicsFrame {
    EthicsFrame {
        option_id: 42,
        distance_band: 3,
        relative_speed: 16,
        zone_flags: ZoneFlags(ZoneFlags::PROTECTED_ZONE),
        vulnerable_presence: VulnerableFlags(VulnerableFlags::CHILD),
        risk_band: 2,
        profile_slice_id: 0,
        action_type: 5,
        ext,
    }
}

fn bench_evaluate(c: &mut Criterion) {
    let slice = compiled_reference_slice();
    let mut group = c.benchmark_group("evaluate");
    for (label, ext) in [
        ("base_8b", FrameExt::None),
        (
            "ext_16b",
            FrameExt::Ext128(Ext128 {
                bystander_band: 12,
                contact_time_band: 4,
                mission_phase: 1,
                consent_state: 2,
                environment_class: 3,
            }),
        ),
    ] {
        let frame = frame_for(ext);
        group.bench_with_input(BenchmarkId::from_parameter(label), &frame, |b, frame| {
            b.iter(|| {
                let evaluation = evaluate(frame, &slice);
                criterion::black_box(evaluation.normative_score);
            });
        });
    }
    group.finish();
}

fn bench_decode_and_evaluate(c: &mut Criterion) {
    let slice = compiled_reference_slice();
    let bytes = frame_for(FrameExt::None).encode().expect("encode");
    c.bench_function("decode_and_evaluate", |b| {
        b.iter(|| {
            let frame = EthicsFrame::decode(&bytes).expect("decode");
            let evaluation = evaluate(&frame, &slice);
            criterion::black_box(evaluation.verdict());
        });
    });
}

fn bench_store_select(c: &mut Criterion) {
    let store = ProfileStore::new();
    store.install(compiled_reference_slice()).expect("install");
    let frame = frame_for(FrameExt::None);

    c.bench_function("select_and_evaluate", |b| {
        b.iter(|| {
            let selection = store.select(0, 0).expect("select");
            let evaluation = evaluate(&frame, &selection.slice);
            criterion::black_box(evaluation.normative_score);
        });
    });
}

async fn spawn_gate_client() -> Result<(EthosGateClient<Channel>, oneshot::Sender<()>), String> {
    let key = SigningKey::from_bytes(&[5_u8; 32]);
    let mut keys = ethos_core::profile::TrustedGovernanceKeys::default();
    keys.insert_hex("bench", &hex::encode(key.verifying_key().to_bytes()))
        .map_err(|e| format!("key: {e}"))?;
    // Admission limits sized so the bench measures the pipeline, not the
    // token bucket.
    let cfg = DaemonConfig {
        bucket_rate_per_s: 10_000_000,
        bucket_burst: 1_000_000,
        suspension_rate_per_s: 100_000_000,
        ..DaemonConfig::default()
    };
    let service = EthosGateService::build(cfg, keys);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("bind: {e}"))?;
    let addr = listener.local_addr().map_err(|e| format!("addr: {e}"))?;

    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async {
            let _ = rx.await;
        };
        let _ = Server::builder()
            .add_service(EthosGateServer::new(service))
            .serve_with_incoming_shutdown(incoming, shutdown)
            .await;
    });

    let mut client = EthosGateClient::connect(format!("http://{addr}"))
        .await
        .map_err(|e| format!("connect: {e}"))?;

    let config = CompilerConfig {
        validation_samples: 1_000,
        ..CompilerConfig::default()
    };
    let (signed, _) = ethos_compile::compile_and_sign(&reference_profile(), &config, "bench", &key)
        .map_err(|e| format!("compile: {e}"))?;
    client
        .install_profile(pb::InstallProfileRequest {
            signed_slice_json: serde_json::to_vec(&signed).map_err(|e| format!("json: {e}"))?,
        })
        .await
        .map_err(|e| format!("install: {e}"))?;
    Ok((client, tx))
}

fn bench_grpc_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("grpc_roundtrip");

    let setup = rt.block_on(spawn_gate_client());
    let (client, shutdown) = match setup {
        Ok(ok) => ok,
        Err(e) => {
            group.finish();
            panic!("failed to stand up benchmark grpc server: {e}");
        }
    };

    let bytes = frame_for(FrameExt::None).encode().expect("encode");
    group.bench_function("evaluate_roundtrip", |b| {
        let client = Arc::new(tokio::sync::Mutex::new(client.clone()));
        let bytes = bytes.clone();
        b.to_async(&rt).iter(move || {
            let client = Arc::clone(&client);
            let bytes = bytes.clone();
            async move {
                let mut client = client.lock().await;
                let response = client
                    .evaluate(pb::EvaluateRequest {
                        agent_id: "bench-agent".to_string(),
                        frame_id: 1,
                        priority: pb::PriorityClass::Critical as i32,
                        frame: bytes,
                        wanted_profile_version: 0,
                        timeout_us: 0,
                        request_unix_us: 0,
                    })
                    .await
                    .expect("grpc evaluate")
                    .into_inner();
                criterion::black_box(response.status);
            }
        });
    });

    let _ = rt.block_on(async { shutdown.send(()) });
    group.finish();
}

criterion_group!(
    evaluation_latency,
    bench_evaluate,
    bench_decode_and_evaluate,
    bench_store_select,
    bench_grpc_roundtrip
);
criterion_main!(evaluation_latency);
