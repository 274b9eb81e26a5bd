//! Strata Animation Core (engine-agnostic)
//!
//! Layered skeletal-animation control: an [`AnimationManager`] owns a stack of
//! [`AnimationLayer`]s, each running a finite state machine of [`SteadyState`]s whose
//! source trees sample shared [`AnimationClip`]s. Cross-fades, layer blending and
//! clip timing are resolved here; writing the result into a skeleton is delegated to
//! an [`AnimationApplier`].

pub mod applier;
pub mod blend;
pub mod clip;
pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod instance;
pub mod layer;
pub mod layer_blend;
pub mod loader;
pub mod manager;
pub mod source;
pub mod state;
pub mod timer;
pub mod value;
pub mod values_store;

// Re-exports for consumers (appliers, hosts)
pub use applier::{
    AnimationApplier, ApplyFrame, JointApplier, JointTransform, NullApplier, SkeletonPose,
    TriggerCallback, TriggerCallbacks,
};
pub use blend::{blend_values, step_blend, CombineFn, CombinerRegistry};
pub use clip::{
    joint_channel_name, parse_joint_channel_name, AnimationChannel, AnimationClip,
    FloatChannel, JointChannel, TransformChannel, TriggerChannel, TrsSamples,
};
pub use config::ManagerConfig;
pub use context::{LayerContext, SourceContext};
pub use error::{AnimationError, Result};
pub use ids::ListenerId;
pub use instance::{ClipInstance, ClipInstanceCache, LOOP_FOREVER};
pub use layer::{AnimationLayer, BASE_LAYER_NAME, WILDCARD_KEYWORD};
pub use layer_blend::{LayerBlender, LerpBlender};
pub use loader::{
    load_state_machine_json, load_trigger_channels_json, parse_clip_json,
    parse_clip_library_json, ClipLibrary, LoadSummary,
};
pub use manager::{AnimationManager, UpdateState};
pub use source::{
    BinaryLerpSource, ClipSource, FrozenSource, ManagedTransformSource, MaskedClipSource,
    SourceTree,
};
pub use state::{
    BlendType, FadeKind, FadeState, FiniteState, SteadyState, TransitionKind, TransitionState,
};
pub use timer::{ManualTimer, ReadOnlyTimer, SystemTimer};
pub use value::{SourceData, TriggerData, Value, ValueKind, IDENTITY_ROTATION};
pub use values_store::ValuesStore;
