//! Rule corpus provisioning
//!
//! The corpus is a directory tree of YAML files refreshed from a remote
//! repository. In the default deployment a sidecar provisioner owns the
//! checkout and this service only verifies it; with `rules.self_manage`
//! the clone/pull happens here, driven through the external `git` binary.

use crate::config::RulesConfig;
use std::path::Path;
use tokio::process::Command;
use tracing::{error, info, warn};
use walkdir::WalkDir;

pub struct RuleSource {
    config: RulesConfig,
}

impl RuleSource {
    pub fn new(config: RulesConfig) -> Self {
        RuleSource { config }
    }

    /// Guarantee a populated rules directory. Returns `false` on any
    /// failure so the caller can retry with its own backoff.
    pub async fn ensure(&self) -> bool {
        if self.config.self_manage {
            if !self.sync_repository().await {
                return false;
            }
        }
        self.verify()
    }

    /// Root exists, the rules subdirectory exists, and at least one rule
    /// file is present.
    pub fn verify(&self) -> bool {
        let root = Path::new(&self.config.directory);
        if !root.is_dir() {
            warn!("Rules directory not found: {}", self.config.directory);
            return false;
        }

        let rules_root = root.join(&self.config.subdir);
        if !rules_root.is_dir() {
            warn!("Rules subdirectory not found: {}", rules_root.display());
            return false;
        }

        let has_rule_file = WalkDir::new(&rules_root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_type().is_file() && is_rule_file(entry.path()));
        if !has_rule_file {
            warn!("No rule files found under {}", rules_root.display());
        }
        has_rule_file
    }

    /// Clone or update the corpus checkout.
    async fn sync_repository(&self) -> bool {
        let root = Path::new(&self.config.directory);
        if let Err(e) = tokio::fs::create_dir_all(root).await {
            error!("Failed to create rules directory {}: {}", root.display(), e);
            return false;
        }

        if root.join(".git").is_dir() {
            info!("Updating rules repository in {}", root.display());
            return self
                .run_git(&["-C", &self.config.directory, "pull", "--ff-only"])
                .await;
        }

        // A non-repo directory gets emptied before the clone so stale
        // provisioner leftovers cannot shadow the checkout.
        if let Err(e) = clear_directory(root).await {
            error!("Failed to clear rules directory {}: {}", root.display(), e);
            return false;
        }

        info!(
            "Cloning rules repository {} into {}",
            self.config.repo_url,
            root.display()
        );
        self.run_git(&[
            "clone",
            "--depth",
            "1",
            &self.config.repo_url,
            &self.config.directory,
        ])
        .await
    }

    async fn run_git(&self, args: &[&str]) -> bool {
        match Command::new("git").args(args).output().await {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                error!(
                    "git {} failed: {}",
                    args.first().copied().unwrap_or(""),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                error!("Failed to launch git: {}", e);
                false
            }
        }
    }
}

pub fn is_rule_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    )
}

async fn clear_directory(root: &Path) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn rules_config(dir: &Path) -> RulesConfig {
        let mut config = Config::default().rules;
        config.directory = dir.to_string_lossy().into_owned();
        config.self_manage = false;
        config
    }

    #[tokio::test]
    async fn test_ensure_fails_on_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let source = RuleSource::new(rules_config(&missing));
        assert!(!source.ensure().await);
    }

    #[tokio::test]
    async fn test_ensure_fails_on_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("rules")).unwrap();
        let source = RuleSource::new(rules_config(dir.path()));
        assert!(!source.ensure().await);
    }

    #[tokio::test]
    async fn test_ensure_succeeds_with_rule_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("rules").join("linux");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("probe.yml"), "title: Probe\n").unwrap();

        let source = RuleSource::new(rules_config(dir.path()));
        assert!(source.ensure().await);
    }

    #[test]
    fn test_is_rule_file_extensions() {
        assert!(is_rule_file(Path::new("a/b/rule.yml")));
        assert!(is_rule_file(Path::new("a/b/rule.yaml")));
        assert!(!is_rule_file(Path::new("a/b/readme.md")));
        assert!(!is_rule_file(Path::new("a/b/rule.yml.bak")));
    }

    #[tokio::test]
    async fn test_clear_directory_removes_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();

        clear_directory(dir.path()).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
