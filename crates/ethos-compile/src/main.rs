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

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;

use ethos_compile::source::{reference_profile, SourceProfile};
use ethos_compile::{compile, compile_and_sign, CompilerConfig};

#[derive(Debug, Parser)]
#[command(name = "ethos-compile")]
#[command(about = "Compile a rich ethical profile into a signed fixed-point slice")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile a source profile to a slice, optionally signing it.
    Compile {
        /// Source profile JSON path.
        #[arg(long)]
        source: PathBuf,

        /// Output path for the compiled slice JSON.
        #[arg(long)]
        out: PathBuf,

        /// Optional path to write the validation report JSON.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Hex-encoded ed25519 signing key file; absent means unsigned output.
        #[arg(long)]
        signing_key: Option<PathBuf>,

        /// Governance key id recorded in the signed envelope.
        #[arg(long, default_value = "governance")]
        key_id: String,

        /// Validation sample count.
        #[arg(long, default_value_t = 10_000)]
        samples: usize,

        /// Validation sampler seed.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write the built-in reference profile as a worked starting point.
    EmitReference {
        #[arg(long)]
        out: PathBuf,
    },

    /// Generate an ed25519 signing keypair and print the public half.
    Keygen {
        /// Path to write the hex-encoded secret key.
        #[arg(long)]
        out: PathBuf,
    },
}

fn load_source(path: &PathBuf) -> Result<SourceProfile, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    let source: SourceProfile = serde_json::from_slice(&bytes)?;
    Ok(source)
}

fn load_signing_key(path: &PathBuf) -> Result<SigningKey, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    let raw = hex::decode(text.trim())?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| "signing key must be 32 bytes of hex")?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn run_compile(
    source_path: &PathBuf,
    out: &PathBuf,
    report_path: Option<&PathBuf>,
    signing_key: Option<&PathBuf>,
    key_id: &str,
    samples: usize,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = load_source(source_path)?;
    let mut config = CompilerConfig {
        validation_samples: samples,
        ..CompilerConfig::default()
    };
    if let Some(seed) = seed {
        config.seed = seed;
    }

    let report = match signing_key {
        Some(key_path) => {
            let sk = load_signing_key(key_path)?;
            let (signed, report) = compile_and_sign(&source, &config, key_id, &sk)?;
            fs::write(out, serde_json::to_vec_pretty(&signed)?)?;
            report
        }
        None => {
            let (slice, report) = compile(&source, &config)?;
            fs::write(out, serde_json::to_vec_pretty(&slice)?)?;
            report
        }
    };

    if let Some(path) = report_path {
        fs::write(path, serde_json::to_vec_pretty(&report)?)?;
    }
    println!(
        "compiled {:?} slice {} v{}: recall {:.4} precision {:.4} mean divergence {:.4}",
        report.profile_name,
        source.slice_id,
        source.version,
        report.veto_recall,
        report.veto_precision,
        report.mean_score_divergence,
    );
    println!("wrote {}", out.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    match args.command {
        Command::Compile {
            source,
            out,
            report,
            signing_key,
            key_id,
            samples,
            seed,
        } => run_compile(
            &source,
            &out,
            report.as_ref(),
            signing_key.as_ref(),
            &key_id,
            samples,
            seed,
        ),
        Command::EmitReference { out } => {
            let profile = reference_profile();
            fs::write(&out, serde_json::to_vec_pretty(&profile)?)?;
            println!("wrote {}", out.display());
            Ok(())
        }
        Command::Keygen { out } => {
            let sk = SigningKey::generate(&mut rand::rngs::OsRng);
            fs::write(&out, hex::encode(sk.to_bytes()))?;
            println!("public key: {}", hex::encode(sk.verifying_key().to_bytes()));
            println!("wrote {}", out.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_subcommand_writes_slice_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.json");
        let out_path = dir.path().join("slice.json");
        let report_path = dir.path().join("report.json");
        fs::write(
            &source_path,
            serde_json::to_vec_pretty(&reference_profile()).unwrap(),
        )
        .unwrap();

        run_compile(
            &source_path,
            &out_path,
            Some(&report_path),
            None,
            "governance",
            2_000,
            None,
        )
        .unwrap();

        let slice: ethos_core::profile::ProfileSlice =
            serde_json::from_slice(&fs::read(&out_path).unwrap()).unwrap();
        slice.validate().unwrap();
        let report: ethos_compile::ValidationReport =
            serde_json::from_slice(&fs::read(&report_path).unwrap()).unwrap();
        assert_eq!(report.missed_triggers, 0);
    }

    #[test]
    fn signing_key_round_trips_through_hex_file() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("key.hex");
        fs::write(&key_path, hex::encode([7_u8; 32])).unwrap();
        let sk = load_signing_key(&key_path).unwrap();
        assert_eq!(sk.to_bytes(), [7_u8; 32]);
    }
}
