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
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use ethos_core::profile::TrustedGovernanceKeys;
use ethos_daemon::config::DaemonConfig;
use ethos_daemon::server::EthosGateService;
use ethos_protocol::pb::ethos_gate_server::EthosGateServer;

#[derive(Debug, Parser)]
#[command(name = "ethos-daemon")]
#[command(about = "EthosOS bounded-latency ethics-evaluation daemon")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:50071")]
    listen: String,

    /// Trusted governance keys JSON: {"keys": {"kid": "hex-verifying-key"}}.
    /// Without it every profile install is refused.
    #[arg(long)]
    trusted_keys: Option<PathBuf>,

    /// Optional Prometheus metrics listen address.
    #[arg(long)]
    metrics_listen: Option<String>,

    /// Directory of signed slice envelopes (*.json) installed at startup.
    #[arg(long)]
    profile_dir: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log: String,
}

#[derive(Debug, Deserialize)]
struct TrustedKeysFile {
    keys: BTreeMap<String, String>,
}

fn load_trusted_keys(
    path: Option<&PathBuf>,
) -> Result<TrustedGovernanceKeys, Box<dyn std::error::Error>> {
    let mut out = TrustedGovernanceKeys::default();
    if let Some(path) = path {
        let payload = std::fs::read(path)?;
        let file: TrustedKeysFile = serde_json::from_slice(&payload)?;
        for (kid, key_hex) in file.keys {
            out.insert_hex(&kid, &key_hex)?;
        }
    }
    Ok(out)
}

/// Installs every `*.json` signed envelope found in `dir`, in name order.
/// A file that fails verification aborts startup: silently serving without
/// a profile the operator asked for is worse than not starting.
fn preload_profiles(
    svc: &EthosGateService,
    dir: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    for path in paths {
        let payload = std::fs::read(&path)?;
        let signed: ethos_core::profile::SignedProfileSlice = serde_json::from_slice(&payload)
            .map_err(|e| format!("{}: {e}", path.display()))?;
        let (slice_id, version, _) = svc
            .install_signed(signed)
            .map_err(|e| format!("{}: {e}", path.display()))?;
        tracing::info!(slice_id, version, path = %path.display(), "preloaded profile slice");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log))
        .init();

    let trusted_keys = load_trusted_keys(args.trusted_keys.as_ref())?;
    if trusted_keys.keys.is_empty() {
        tracing::warn!("no trusted governance keys loaded; profile installs will be refused");
    }

    let cfg = DaemonConfig::from_env();
    let addr: SocketAddr = args.listen.parse()?;
    let self_check_interval_ms = cfg.self_check_interval_ms;
    let svc = EthosGateService::build(cfg, trusted_keys);

    if let Some(metrics_listen) = args.metrics_listen {
        let metrics_addr: SocketAddr = metrics_listen.parse()?;
        let _handle = svc.telemetry().spawn_metrics_server(metrics_addr).await?;
        tracing::info!(%metrics_addr, "metrics endpoint up");
    }

    if let Some(profile_dir) = args.profile_dir.as_ref() {
        preload_profiles(&svc, profile_dir)?;
    }

    if self_check_interval_ms > 0 {
        let sweeper = svc.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(
                self_check_interval_ms,
            ));
            loop {
                ticker.tick().await;
                let quarantined = sweeper.run_self_check_sweep();
                if !quarantined.is_empty() {
                    tracing::error!(?quarantined, "self-check sweep quarantined slices");
                }
            }
        });
    }

    tracing::info!(%addr, "starting EthosOS gRPC server");

    tonic::transport::Server::builder()
        .add_service(EthosGateServer::new(svc))
        .serve(addr)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_keys_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let sk = ed25519_dalek::SigningKey::from_bytes(&[3_u8; 32]);
        let body = serde_json::json!({
            "keys": { "gov-1": hex::encode(sk.verifying_key().to_bytes()) }
        });
        std::fs::write(&path, serde_json::to_vec(&body).unwrap()).unwrap();
        let keys = load_trusted_keys(Some(&path)).unwrap();
        assert!(keys.keys.contains_key("gov-1"));
    }

    #[test]
    fn missing_keys_file_yields_empty_set() {
        let keys = load_trusted_keys(None).unwrap();
        assert!(keys.keys.is_empty());
    }

    #[tokio::test]
    async fn preload_installs_envelopes_from_dir() {
        use ethos_protocol::pb::ethos_gate_server::EthosGate;

        let dir = tempfile::tempdir().unwrap();
        let sk = ed25519_dalek::SigningKey::from_bytes(&[3_u8; 32]);
        let mut keys = TrustedGovernanceKeys::default();
        keys.insert_hex("gov-1", &hex::encode(sk.verifying_key().to_bytes()))
            .unwrap();
        let config = ethos_compile::CompilerConfig {
            validation_samples: 1_000,
            ..ethos_compile::CompilerConfig::default()
        };
        let (signed, _) = ethos_compile::compile_and_sign(
            &ethos_compile::source::reference_profile(),
            &config,
            "gov-1",
            &sk,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("slice0.json"),
            serde_json::to_vec(&signed).unwrap(),
        )
        .unwrap();

        let svc = EthosGateService::build(DaemonConfig::default(), keys);
        preload_profiles(&svc, dir.path()).unwrap();

        let health = svc
            .get_health(tonic::Request::new(
                ethos_protocol::pb::GetHealthRequest {},
            ))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(health.slices.len(), 1);
        assert_eq!(health.slices[0].version, 1);
    }
}
