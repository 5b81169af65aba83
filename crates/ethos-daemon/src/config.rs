// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Daemon tuning knobs. Defaults are the shipped admission contract;
//! every field can be overridden through `ETHOS_*` environment variables.

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Bounded queue capacity per priority class.
    pub critical_queue_cap: usize,
    pub normal_queue_cap: usize,
    pub background_queue_cap: usize,
    /// Wait time after which an entry is promoted one class up.
    pub aging_interval_ms: u64,
    /// Per-agent token bucket: sustained rate and burst size.
    pub bucket_rate_per_s: u64,
    pub bucket_burst: u64,
    /// Observed arrival rate that suspends an agent, and for how long.
    pub suspension_rate_per_s: u64,
    pub suspension_cooldown_ms: u64,
    /// Malformed frames tolerated per window before suspension.
    pub bad_frame_limit: u64,
    /// Fixed evaluation worker count; also the pipeline depth reported
    /// over the wire.
    pub workers: usize,
    /// Default admission-to-response deadline when the caller passes 0.
    pub default_timeout_us: u64,
    /// Decision ring capacity.
    pub decision_log_cap: usize,
    /// Agent contexts idle longer than this are evicted.
    pub agent_idle_evict_ms: u64,
    /// Hard cap on tracked agent contexts.
    pub max_agents: usize,
    /// Periodic profile self-check sweep interval; 0 disables the sweep.
    pub self_check_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            critical_queue_cap: 4,
            normal_queue_cap: 16,
            background_queue_cap: 32,
            aging_interval_ms: 5,
            bucket_rate_per_s: 100,
            bucket_burst: 20,
            suspension_rate_per_s: 200,
            suspension_cooldown_ms: 100,
            bad_frame_limit: 10,
            workers: 2,
            default_timeout_us: 50_000,
            decision_log_cap: 4096,
            agent_idle_evict_ms: 60_000,
            max_agents: 4096,
            self_check_interval_ms: 1_000,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            critical_queue_cap: read_env_usize("ETHOS_QUEUE_CRITICAL_CAP", d.critical_queue_cap),
            normal_queue_cap: read_env_usize("ETHOS_QUEUE_NORMAL_CAP", d.normal_queue_cap),
            background_queue_cap: read_env_usize(
                "ETHOS_QUEUE_BACKGROUND_CAP",
                d.background_queue_cap,
            ),
            aging_interval_ms: read_env_u64("ETHOS_AGING_INTERVAL_MS", d.aging_interval_ms),
            bucket_rate_per_s: read_env_u64("ETHOS_BUCKET_RATE_PER_S", d.bucket_rate_per_s),
            bucket_burst: read_env_u64("ETHOS_BUCKET_BURST", d.bucket_burst),
            suspension_rate_per_s: read_env_u64(
                "ETHOS_SUSPENSION_RATE_PER_S",
                d.suspension_rate_per_s,
            ),
            suspension_cooldown_ms: read_env_u64(
                "ETHOS_SUSPENSION_COOLDOWN_MS",
                d.suspension_cooldown_ms,
            ),
            bad_frame_limit: read_env_u64("ETHOS_BAD_FRAME_LIMIT", d.bad_frame_limit),
            workers: read_env_usize("ETHOS_WORKERS", d.workers),
            default_timeout_us: read_env_u64("ETHOS_DEFAULT_TIMEOUT_US", d.default_timeout_us),
            decision_log_cap: read_env_usize("ETHOS_DECISION_LOG_CAP", d.decision_log_cap),
            agent_idle_evict_ms: read_env_u64("ETHOS_AGENT_IDLE_EVICT_MS", d.agent_idle_evict_ms),
            max_agents: read_env_usize("ETHOS_MAX_AGENTS", d.max_agents),
            self_check_interval_ms: {
                // Zero is meaningful here: it turns the sweep off.
                std::env::var("ETHOS_SELF_CHECK_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(d.self_check_interval_ms)
            },
        }
    }
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn read_env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
