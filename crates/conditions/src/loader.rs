//! YAML policy documents and the filesystem policy loader.
//!
//! A policy document attaches condition trees to assets:
//!
//! ```yaml
//! policies:
//!   - asset: mart/daily_orders
//!     condition:
//!       kind: in_latest_time_window
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cadence_core::AssetKey;

use crate::condition::SchedulingCondition;
use crate::error::{EvaluationError, Result};

/// A condition tree attached to the asset it schedules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub asset: AssetKey,
    pub condition: SchedulingCondition,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl PolicyDocument {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let doc: PolicyDocument = serde_yaml::from_str(contents)?;
        for policy in &doc.policies {
            policy.condition.validate().map_err(|e| {
                EvaluationError::Config(format!("policy for '{}': {}", policy.asset, e))
            })?;
        }
        Ok(doc)
    }
}

/// Outcome of loading a single policy file.
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

#[derive(Debug)]
pub enum LoadStatus {
    Loaded { policies: usize },
    /// Dotfile, non-YAML file, etc.
    Skipped { reason: String },
    Failed { error: String },
}

/// Loads every `*.yml` / `*.yaml` policy document under a directory.
pub struct PolicyLoader {
    policies_dir: PathBuf,
}

impl PolicyLoader {
    pub fn new(policies_dir: impl Into<PathBuf>) -> Self {
        Self {
            policies_dir: policies_dir.into(),
        }
    }

    pub fn load_file(&self, path: &Path) -> Result<PolicyDocument> {
        let contents = fs::read_to_string(path)?;
        PolicyDocument::from_yaml_str(&contents)
    }

    /// Recursively scan the directory, in path order.
    ///
    /// A file that fails to parse or validate is reported in the returned
    /// [`LoadResult`]s and contributes no policies; the scan continues.
    pub fn load_all(&self) -> Result<(Vec<Policy>, Vec<LoadResult>)> {
        let mut policies = Vec::new();
        let mut results = Vec::new();
        self.scan_dir(&self.policies_dir, &mut policies, &mut results)?;
        Ok((policies, results))
    }

    fn scan_dir(
        &self,
        dir: &Path,
        policies: &mut Vec<Policy>,
        results: &mut Vec<LoadResult>,
    ) -> Result<()> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        paths.sort();

        for path in paths {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    if path.is_file() {
                        results.push(LoadResult {
                            path,
                            status: LoadStatus::Skipped {
                                reason: "dotfile".to_string(),
                            },
                        });
                    }
                    continue;
                }
            }

            if path.is_dir() {
                self.scan_dir(&path, policies, results)?;
                continue;
            }

            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yml" || e == "yaml")
                .unwrap_or(false);
            if !is_yaml {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            match self.load_file(&path) {
                Ok(doc) => {
                    info!(path = %path.display(), policies = doc.policies.len(), "loaded policy file");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Loaded {
                            policies: doc.policies.len(),
                        },
                    });
                    policies.extend(doc.policies);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load policy file");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const POLICY_YAML: &str = r#"
policies:
  - asset: raw/events
    condition:
      kind: missing
  - asset: mart/daily
    condition:
      kind: and
      operands:
        - kind: in_latest_time_window
        - kind: all_deps_match
          operand:
            kind: newly_updated
"#;

    #[test]
    fn parses_policy_document() {
        let doc = PolicyDocument::from_yaml_str(POLICY_YAML).unwrap();
        assert_eq!(doc.policies.len(), 2);
        assert_eq!(doc.policies[0].asset, AssetKey::from("raw/events"));
        assert_eq!(doc.policies[1].condition.children().len(), 2);
    }

    #[test]
    fn invalid_condition_is_config_error() {
        let yaml = "policies:\n  - asset: a\n    condition:\n      kind: or\n      operands: []\n";
        let err = PolicyDocument::from_yaml_str(yaml).unwrap_err();
        assert!(err.is_config());

        let single = "policies:\n  - asset: a\n    condition:\n      kind: and\n      operands:\n        - kind: missing\n";
        assert!(PolicyDocument::from_yaml_str(single).unwrap_err().is_config());
    }

    #[test]
    fn load_all_skips_dotfiles_and_reports_failures() {
        let dir = TempDir::new().expect("create tempdir");
        fs::write(dir.path().join("main.yml"), POLICY_YAML).unwrap();
        fs::write(dir.path().join(".hidden.yml"), POLICY_YAML).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a policy").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/broken.yaml"), "policies: [ {").unwrap();

        let (policies, results) = PolicyLoader::new(dir.path()).load_all().unwrap();
        assert_eq!(policies.len(), 2);

        let count = |f: fn(&LoadStatus) -> bool| results.iter().filter(|r| f(&r.status)).count();
        assert_eq!(count(|s| matches!(s, LoadStatus::Loaded { policies: 2 })), 1);
        assert_eq!(count(|s| matches!(s, LoadStatus::Skipped { .. })), 2);
        assert_eq!(count(|s| matches!(s, LoadStatus::Failed { .. })), 1);
    }
}
