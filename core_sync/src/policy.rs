//! Per-kind reconciliation policy.
//!
//! Loaded from `reconcile_config.json` with support for environment variable
//! overrides. The table decides which entity kinds accept local prediction
//! and how long their correction or echo-suppression windows run.

use std::{
    collections::HashMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use sync_proto::EntityKind;
use thiserror::Error;

use crate::scalar::{scalar_from_f32, Scalar};

pub const BUILTIN_RECONCILE_CONFIG: &str = include_str!("data/reconcile_config.json");

/// Root reconciliation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub kinds: HashMap<String, KindPolicy>,
    pub fire: FireGrowthConfig,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            kinds: default_kind_policies(),
            fire: FireGrowthConfig::default(),
        }
    }
}

fn default_kind_policies() -> HashMap<String, KindPolicy> {
    let mut kinds = HashMap::new();
    kinds.insert(
        "Door".to_string(),
        KindPolicy {
            predict: true,
            window_secs: 0.4,
            per_entity_window: true,
            echo_window_secs: 0.0,
        },
    );
    kinds.insert(
        "Light".to_string(),
        KindPolicy {
            predict: true,
            window_secs: 1.0,
            per_entity_window: false,
            echo_window_secs: 0.0,
        },
    );
    kinds.insert(
        "Repair".to_string(),
        KindPolicy {
            predict: false,
            window_secs: 0.0,
            per_entity_window: false,
            echo_window_secs: 0.0,
        },
    );
    kinds.insert(
        "Scanner".to_string(),
        KindPolicy {
            predict: false,
            window_secs: 0.0,
            per_entity_window: false,
            echo_window_secs: 0.0,
        },
    );
    kinds.insert(
        "Compartment".to_string(),
        KindPolicy {
            predict: false,
            window_secs: 0.0,
            per_entity_window: false,
            echo_window_secs: 1.0,
        },
    );
    kinds
}

impl ReconcileConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_RECONCILE_CONFIG)
                .expect("builtin reconcile config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ReconcileConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ReconcileConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = ReconcileConfig::from_json_str(&contents)?;
        Ok(config)
    }

    /// Policy for an entity kind, with fallback to the conservative default
    /// (no prediction) for kinds the table does not name.
    pub fn policy_for(&self, kind: EntityKind) -> KindPolicy {
        self.kinds
            .get(kind.name())
            .cloned()
            .unwrap_or_default()
    }

    /// Correction window for one entity. A per-entity override only applies
    /// where the kind opts into per-entity windows.
    pub fn window_for(&self, kind: EntityKind, window_override: Option<f32>) -> Scalar {
        let policy = self.policy_for(kind);
        let secs = match window_override {
            Some(secs) if policy.per_entity_window => secs,
            _ => policy.window_secs,
        };
        scalar_from_f32(secs)
    }

    pub fn echo_window_for(&self, kind: EntityKind) -> Scalar {
        scalar_from_f32(self.policy_for(kind).echo_window_secs)
    }
}

/// Reconciliation behavior of one entity kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KindPolicy {
    /// Whether local input may install prediction overlays.
    pub predict: bool,
    /// Seconds a prediction stands before reverting without confirmation.
    pub window_secs: f32,
    /// Whether entities of this kind may carry their own window override.
    pub per_entity_window: bool,
    /// Seconds server patches are staged after a local aggregate edit.
    pub echo_window_secs: f32,
}

impl Default for KindPolicy {
    fn default() -> Self {
        Self {
            predict: false,
            window_secs: 0.0,
            per_entity_window: false,
            echo_window_secs: 0.0,
        }
    }
}

/// Fire spread tuning for compartment environments.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FireGrowthConfig {
    /// Size units gained per second at full oxygen.
    pub growth_rate: f32,
    pub max_size: f32,
}

impl Default for FireGrowthConfig {
    fn default() -> Self {
        Self {
            growth_rate: 0.1,
            max_size: 1.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileConfigError {
    #[error("failed to parse reconcile config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read reconcile config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Handle for accessing the reconciliation configuration.
#[derive(Resource, Debug, Clone)]
pub struct ReconcileConfigHandle(pub Arc<ReconcileConfig>);

impl ReconcileConfigHandle {
    pub fn new(config: Arc<ReconcileConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<ReconcileConfig> {
        Arc::clone(&self.0)
    }

    pub fn replace(&mut self, config: Arc<ReconcileConfig>) {
        self.0 = config;
    }
}

/// Metadata about the reconciliation configuration source.
#[derive(Resource, Debug, Clone)]
pub struct ReconcileConfigMetadata {
    path: Option<PathBuf>,
}

impl ReconcileConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Load reconciliation configuration from environment or default path.
pub fn load_reconcile_config_from_env() -> (Arc<ReconcileConfig>, ReconcileConfigMetadata) {
    let override_path = env::var("RECONCILE_CONFIG_PATH").ok().map(PathBuf::from);
    let default_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/reconcile_config.json");

    let candidates: Vec<PathBuf> = match override_path {
        Some(ref path) => vec![path.clone()],
        None => vec![default_path.clone()],
    };

    for path in candidates {
        match ReconcileConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "undertow::config",
                    path = %path.display(),
                    "reconcile_config.loaded=file"
                );
                return (Arc::new(config), ReconcileConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "undertow::config",
                    path = %path.display(),
                    error = %err,
                    "reconcile_config.load_failed"
                );
            }
        }
    }

    let config = ReconcileConfig::builtin();
    tracing::info!(
        target: "undertow::config",
        "reconcile_config.loaded=builtin"
    );
    (config, ReconcileConfigMetadata::new(None))
}
