use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Pull `CADENCE_*` settings from a local `.env`, if there is one.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// A `PROD` profile reads `PROD_STATE_DIR` ahead of `STATE_DIR`; the default
/// profile reads the bare key only.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    let scoped = (!profile.is_empty())
        .then(|| env_opt(&format!("{}_{}", profile, key)))
        .flatten();
    scoped.or_else(|| env_opt(key))
}

fn profiled_path(profile: &str, key: &str, default: &str) -> PathBuf {
    PathBuf::from(profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string()))
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub evaluator: EvaluatorConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CADENCE_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CADENCE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            evaluator: EvaluatorConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  evaluator:   threads={}",
            self.evaluator.resolved_worker_threads()
        );
        tracing::info!(
            "  storage:     state_dir={}, policies_dir={}",
            self.storage.state_dir.display(),
            self.storage.policies_dir.display()
        );
    }

    /// Return a view safe for status output.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "evaluator": { "worker_threads": self.evaluator.resolved_worker_threads() },
            "storage": {
                "state_dir": self.storage.state_dir,
                "policies_dir": self.storage.policies_dir,
            },
        })
    }
}

// ── Evaluator ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Threads used to evaluate independent condition trees. 0 = available parallelism.
    pub worker_threads: usize,
}

impl EvaluatorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            worker_threads: profiled_env_usize(p, "EVALUATOR_THREADS", 0),
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self { worker_threads: 0 }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding persisted per-condition cursors.
    pub state_dir: PathBuf,
    /// Directory scanned for YAML policy documents.
    pub policies_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = profiled_path(p, "DATA_DIR", "data");
        let state_dir = profiled_env_opt(p, "STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("state"));
        let policies_dir = profiled_env_opt(p, "POLICIES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("policies"));
        Self {
            state_dir,
            policies_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_thread_count_is_kept() {
        let cfg = EvaluatorConfig { worker_threads: 3 };
        assert_eq!(cfg.resolved_worker_threads(), 3);
    }

    #[test]
    fn zero_threads_resolves_to_parallelism() {
        assert!(EvaluatorConfig::default().resolved_worker_threads() >= 1);
    }

    #[test]
    fn profile_scoped_keys_shadow_bare_keys() {
        env::set_var("CFGTEST_STATE_DIR", "/var/lib/cadence/state");
        env::set_var("CFGTEST_EVALUATOR_THREADS", "6");
        let cfg = Config::for_profile("cfgtest");
        assert_eq!(cfg.profile, "CFGTEST");
        assert_eq!(cfg.storage.state_dir, PathBuf::from("/var/lib/cadence/state"));
        assert_eq!(cfg.evaluator.worker_threads, 6);
        env::remove_var("CFGTEST_STATE_DIR");
        env::remove_var("CFGTEST_EVALUATOR_THREADS");
    }

    #[test]
    fn profile_label_defaults() {
        let cfg = Config {
            profile: String::new(),
            evaluator: EvaluatorConfig::default(),
            storage: StorageConfig {
                state_dir: PathBuf::from("s"),
                policies_dir: PathBuf::from("p"),
            },
        };
        assert_eq!(cfg.profile_label(), "default");
        assert_eq!(cfg.redacted_summary()["storage"]["state_dir"], "s");
    }
}
