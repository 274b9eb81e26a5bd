//! Error types for the animation control core.

/// Errors raised when a caller breaks an API contract or a definition cannot be built.
///
/// Lookup misses (unknown state names, unknown clips by name) are not errors; they
/// surface as `None`/`false` with a logged warning.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AnimationError {
    /// A steady state was registered without a name.
    #[error("Steady state name must not be empty")]
    EmptyStateName,

    /// A transition was registered under an empty keyword.
    #[error("Transition keyword must not be empty")]
    EmptyKeyword,

    /// Layer insertion past the end of the layer list.
    #[error("Layer index {index} is out of range (layer count {len})")]
    LayerIndexOutOfRange { index: usize, len: usize },

    /// Channel sample arrays disagree in length or ordering.
    #[error("Invalid channel '{channel}': {reason}")]
    InvalidChannel { channel: String, reason: String },

    /// A definition referenced a clip that was not supplied.
    #[error("Clip not found: {name}")]
    ClipNotFound { name: String },

    /// A definition named a joint that the manager's first pose does not have.
    #[error("Joint not found: {name}")]
    JointNotFound { name: String },

    /// A definition referenced a layer the manager does not have.
    #[error("Layer not found: {name}")]
    LayerNotFound { name: String },

    /// A transition referenced a steady state the layer does not have.
    #[error("Steady state not found: {name} in layer {layer}")]
    StateNotFound { layer: String, name: String },

    /// Unknown transition `type` in a definition.
    #[error("Unknown transition type: {kind}")]
    UnknownTransitionType { kind: String },

    /// Unknown layer `blendType` in a definition.
    #[error("Unknown layer blend type: {kind}")]
    UnknownBlendType { kind: String },

    /// Structurally valid JSON that does not describe a usable definition.
    #[error("Invalid definition: {reason}")]
    InvalidDefinition { reason: String },

    /// JSON parse failure.
    #[error("Parse error: {reason}")]
    Parse { reason: String },
}

impl AnimationError {
    pub(crate) fn invalid_channel(channel: &str, reason: impl Into<String>) -> Self {
        Self::InvalidChannel {
            channel: channel.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_definition(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for AnimationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse {
            reason: err.to_string(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnimationError>;
