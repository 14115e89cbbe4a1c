use std::path::{Path, PathBuf};

use crate::config::schema::EngineConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses and validates a YAML config. An empty document yields defaults.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = if content.trim().is_empty() {
        EngineConfig::default()
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(&config)?;

    Ok(config)
}

/// Resolves the registry database location, falling back to the per-user
/// data directory.
pub fn database_path(config: &EngineConfig) -> Result<PathBuf, ConfigError> {
    if let Some(path) = &config.database_path {
        return Ok(PathBuf::from(crate::secrets::expand_home(
            &path.to_string_lossy(),
        )));
    }
    crate::registry::default_database_path().ok_or_else(|| ConfigError::Validation {
        message: "Could not determine home directory for the registry database".to_string(),
    })
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    fn invalid(message: &str) -> ConfigError {
        ConfigError::Validation {
            message: message.to_string(),
        }
    }

    if config.scheduler.tick_interval_secs == 0 {
        return Err(invalid("scheduler.tickIntervalSecs must be greater than 0"));
    }
    if config.scheduler.worker_count == 0 {
        return Err(invalid("scheduler.workerCount must be greater than 0"));
    }
    if config.git.timeout_secs == 0 {
        return Err(invalid("git.timeoutSecs must be greater than 0"));
    }
    if config.git.default_branch.trim().is_empty() {
        return Err(invalid("git.defaultBranch must not be empty"));
    }
    if config.cluster.timeout_secs == 0 || config.cluster.connect_timeout_secs == 0 {
        return Err(invalid("cluster timeouts must be greater than 0"));
    }
    if config.ingestion.recognized_groups.is_empty()
        || config
            .ingestion
            .recognized_groups
            .iter()
            .any(|g| g.trim().is_empty())
    {
        return Err(invalid(
            "ingestion.recognizedGroups must list at least one non-empty group",
        ));
    }
    if config.ingestion.lock_timeout_secs == 0 {
        return Err(invalid("ingestion.lockTimeoutSecs must be greater than 0"));
    }
    if config.ingestion.default_namespace.trim().is_empty() {
        return Err(invalid("ingestion.defaultNamespace must not be empty"));
    }

    let mut kinds = std::collections::HashSet::new();
    for mapping in &config.cluster.kinds {
        if mapping.kind.is_empty() || mapping.group.is_empty() || mapping.version.is_empty() {
            return Err(ConfigError::InvalidKind {
                kind: mapping.kind.clone(),
                reason: "kind, group and version are required".to_string(),
            });
        }
        if !kinds.insert(mapping.kind.as_str()) {
            return Err(ConfigError::InvalidKind {
                kind: mapping.kind.clone(),
                reason: "Duplicate kind mapping".to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 60);
        assert_eq!(config.git.max_retries, 3);
        assert_eq!(config.git.default_branch, "main");
        assert_eq!(config.cluster.timeout_secs, 30);
        assert_eq!(config.cluster.pool_max_idle_per_host, 4);
        assert_eq!(config.ingestion.conflict_threshold, 25);
        assert_eq!(config.ingestion.recognized_groups, vec!["githedgehog.com"]);
        assert_eq!(config.registry.orphan_grace_secs, 86_400);
        assert_eq!(
            config.scheduler.effective_queue_capacity(),
            config.scheduler.worker_count * 2
        );
    }

    #[test]
    fn test_load_partial_config() {
        let yaml = r#"
databasePath: /var/lib/fabric-gitops/registry.db
scheduler:
  tickIntervalSecs: 15
  workerCount: 2
cluster:
  timeoutSecs: 5
  kinds:
    - kind: FabricNode
      group: fabric.githedgehog.com
      version: v1alpha1
      plural: fabricnodes
ingestion:
  conflictThreshold: 3
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 15);
        assert_eq!(config.scheduler.effective_queue_capacity(), 4);
        assert_eq!(config.cluster.timeout_secs, 5);
        assert_eq!(config.cluster.connect_timeout_secs, 10);
        assert_eq!(config.cluster.kinds.len(), 1);
        assert_eq!(config.ingestion.conflict_threshold, 3);
        assert_eq!(
            database_path(&config).unwrap(),
            PathBuf::from("/var/lib/fabric-gitops/registry.db")
        );
    }

    #[test]
    fn test_zero_tick_rejected() {
        let result = load_config_from_str("scheduler:\n  tickIntervalSecs: 0\n");
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_empty_recognized_groups_rejected() {
        let result = load_config_from_str("ingestion:\n  recognizedGroups: []\n");
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_duplicate_kind_mapping_rejected() {
        let yaml = r#"
cluster:
  kinds:
    - { kind: VPC, group: vpc.githedgehog.com, version: v1beta1, plural: vpcs }
    - { kind: VPC, group: vpc.githedgehog.com, version: v1, plural: vpcs }
"#;
        let result = load_config_from_str(yaml);
        assert!(matches!(result, Err(ConfigError::InvalidKind { .. })));
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let result = load_config_from_str("scheduler: [unclosed");
        assert!(matches!(result, Err(ConfigError::ParseYaml(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/fabric-gitops.yaml");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
