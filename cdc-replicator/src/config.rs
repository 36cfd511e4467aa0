use std::path::Path;

use cdc_config::shared::ReplicatorConfig;
use cdc_config::{load_config, load_config_from_path};

use crate::error::{ReplicatorError, ReplicatorResult};

/// Loads and validates the replicator configuration.
///
/// An explicit `path` replaces the layered `configuration/` directory lookup; `APP_` environment
/// overrides apply either way.
pub fn load_replicator_config(path: Option<&Path>) -> ReplicatorResult<ReplicatorConfig> {
    let config = match path {
        Some(path) => load_config_from_path::<ReplicatorConfig>(path),
        None => load_config::<ReplicatorConfig>(),
    }
    .map_err(ReplicatorError::config)?;

    config.validate().map_err(ReplicatorError::config)?;

    Ok(config)
}
