//! Manager configuration.

use serde::{Deserialize, Serialize};

use crate::layer::BASE_LAYER_NAME;
use crate::manager::UpdateState;

/// Construction-time settings for an [`AnimationManager`](crate::AnimationManager).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Minimum seconds between two effective updates. `0.0` disables throttling.
    pub update_rate: f64,

    /// Value returned by the values store for keys that were never set.
    pub values_default: f64,

    /// Log every overwrite of an existing values-store key.
    pub log_on_replace: bool,

    /// Name given to the base layer (index 0).
    pub base_layer_name: String,

    /// Update state the manager starts in.
    pub initial_state: UpdateState,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            update_rate: 1.0 / 60.0,
            values_default: 0.0,
            log_on_replace: false,
            base_layer_name: BASE_LAYER_NAME.to_string(),
            initial_state: UpdateState::Play,
        }
    }
}
