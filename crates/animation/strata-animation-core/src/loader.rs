//! JSON definitions for clips and layered state machines.
//!
//! State machine format:
//!
//! ```json
//! { "layers": [ { "name": "upper", "blendType": "lerp", "blendKey": "upper_w", "blendWeight": 0.5,
//!                 "transitions": { "*": { "type": "fade", "target": "Wave", "fadeTime": 0.3 } } } ],
//!   "steadyStates": [ { "name": "Idle", "layer": "-BASE_LAYER-", "clip": "idle",
//!                       "endTransition": { "type": "immediate", "target": "Idle" },
//!                       "transitions": { "run": { "type": "syncfade", "target": "Run", "fadeTime": 0.2,
//!                                                  "startWindow": 0.5, "endWindow": 0.9 } } } ] }
//! ```
//!
//! Notes:
//! - A steady state names either a `clip` (shorthand for a clip node) or a `tree`.
//! - Tree nodes: `{"clip": {name, timeScale?, loopCount?, active?}}`,
//!   `{"inclusiveClip"|"exclusiveClip": {name, ..., channels?, joints?}}`,
//!   `{"lerp": {childA, childB, blendKey, blendWeight?}}`,
//!   `{"managed": {initFromClip?: {clip, joints?, jointNames?}}}`, `{"frozen": {child, time?}}`.
//! - `jointNames` are resolved through the manager's applier against its first pose.
//! - Transition types: immediate, fade, syncfade, frozen, ignore. `startWindow` and
//!   `endWindow` are optional bounds on the current state's clip-local time.
//! - `blendWeight` entries seed the values store.
//! - Everything is validated before the manager is touched; a failed load leaves it unchanged.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use serde::Deserialize;

use crate::applier::AnimationApplier;
use crate::clip::{AnimationChannel, AnimationClip, TriggerChannel};
use crate::error::{AnimationError, Result};
use crate::instance::LOOP_FOREVER;
use crate::layer::AnimationLayer;
use crate::layer_blend::LerpBlender;
use crate::manager::AnimationManager;
use crate::source::{
    BinaryLerpSource, FrozenSource, ManagedTransformSource, MaskedClipSource, SourceTree,
};
use crate::state::{BlendType, SteadyState, TransitionState};

/// Clips available to a definition, by name.
pub type ClipLibrary = HashMap<String, Arc<AnimationClip>>;

/// What a successful load added.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadSummary {
    pub layers: Vec<String>,
    /// `(layer, state)` pairs.
    pub steady_states: Vec<(String, String)>,
}

/// Parse and validate one clip.
pub fn parse_clip_json(s: &str) -> Result<AnimationClip> {
    let clip: AnimationClip = serde_json::from_str(s)?;
    clip.validate()?;
    Ok(clip)
}

/// Parse a JSON array of clips into a library keyed by clip name.
pub fn parse_clip_library_json(s: &str) -> Result<ClipLibrary> {
    let clips: Vec<AnimationClip> = serde_json::from_str(s)?;
    let mut library = ClipLibrary::with_capacity(clips.len());
    for clip in clips {
        clip.validate()?;
        library.insert(clip.name.clone(), Arc::new(clip));
    }
    Ok(library)
}

/// Attach trigger channels to clips of `library`:
///
/// ```json
/// [ { "clip": "walk", "guaranteed": true,
///     "triggerChannel": { "name": "steps", "times": [0.1, 0.6], "keys": ["left", "right"] } } ]
/// ```
///
/// A clip still shared elsewhere is copied before it is changed, so attach triggers
/// before handing the library to a state machine. Returns the number of channels
/// added; on error the library is unchanged.
pub fn load_trigger_channels_json(json: &str, library: &mut ClipLibrary) -> Result<usize> {
    let defs: Vec<TriggerChannelDef> = serde_json::from_str(json)?;
    let mut staged = Vec::with_capacity(defs.len());
    for def in defs {
        if !library.contains_key(&def.clip) {
            return Err(AnimationError::ClipNotFound { name: def.clip });
        }
        let channel = AnimationChannel::Trigger(TriggerChannel {
            name: def.trigger_channel.name,
            times: def.trigger_channel.times,
            keys: def.trigger_channel.keys,
            guaranteed: def.guaranteed,
        });
        channel.validate()?;
        staged.push((def.clip, channel));
    }
    let added = staged.len();
    for (clip, channel) in staged {
        if let Some(entry) = library.get_mut(&clip) {
            Arc::make_mut(entry).channels.push(channel);
        }
    }
    Ok(added)
}

/// Build the layers and steady states described by `json` into `manager`.
pub fn load_state_machine_json<A: AnimationApplier>(
    json: &str,
    clips: &ClipLibrary,
    manager: &mut AnimationManager<A>,
) -> Result<LoadSummary> {
    let def: StateMachineDef = serde_json::from_str(json)?;
    let joint_index = |name: &str| -> Option<usize> {
        let pose = manager.pose(0)?;
        manager.applier()?.joint_index(pose, name)
    };
    let mut builder = Builder {
        clips,
        joint_index: &joint_index,
        pending: Pending::default(),
    };

    // layers
    let mut new_layers: Vec<AnimationLayer> = Vec::with_capacity(def.layers.len());
    for layer_def in &def.layers {
        if layer_def.name.is_empty() {
            return Err(AnimationError::invalid_definition("layer without a name"));
        }
        if manager.find_animation_layer(&layer_def.name).is_some()
            || new_layers.iter().any(|l| l.name() == layer_def.name)
        {
            return Err(AnimationError::invalid_definition(format!(
                "duplicate layer '{}'",
                layer_def.name
            )));
        }
        new_layers.push(builder.layer(layer_def)?);
    }

    // steady states, grouped by destination layer
    let base_name = manager.base_animation_layer().name().to_string();
    let mut states: Vec<(String, SteadyState)> = Vec::with_capacity(def.steady_states.len());
    for state_def in &def.steady_states {
        let layer = state_def.layer.clone().unwrap_or_else(|| base_name.clone());
        let known = manager.find_animation_layer(&layer).is_some()
            || new_layers.iter().any(|l| l.name() == layer);
        if !known {
            return Err(AnimationError::LayerNotFound { name: layer });
        }
        states.push((layer, builder.steady_state(state_def)?));
    }

    validate_targets(manager, &new_layers, &states)?;
    let pending = builder.pending;

    // commit
    let mut summary = LoadSummary::default();
    for layer in new_layers {
        summary.layers.push(layer.name().to_string());
        manager.add_animation_layer(layer);
    }
    for (layer_name, state) in states {
        let state_name = state.name().to_string();
        let layer = manager
            .find_animation_layer_mut(&layer_name)
            .ok_or_else(|| AnimationError::LayerNotFound {
                name: layer_name.clone(),
            })?;
        layer.add_steady_state(state)?;
        summary.steady_states.push((layer_name, state_name));
    }
    for (key, weight) in pending.values {
        manager.values_store_mut().set(key, weight);
    }
    let now = manager.current_global_time();
    for (clip, settings) in pending.instances {
        let instance = manager.get_clip_instance(&clip);
        if let Some(time_scale) = settings.time_scale {
            instance.set_time_scale(time_scale);
        }
        if let Some(loop_count) = settings.loop_count {
            instance.set_loop_count(loop_count);
        }
        if settings.active == Some(true) {
            instance.restart(now);
        }
    }
    Ok(summary)
}

/// Every transition must point at a steady state of its own layer.
fn validate_targets<A: AnimationApplier>(
    manager: &AnimationManager<A>,
    new_layers: &[AnimationLayer],
    states: &[(String, SteadyState)],
) -> Result<()> {
    let mut names: HashMap<&str, HashSet<&str>> = HashMap::new();
    for layer in manager.layers().iter().chain(new_layers) {
        names
            .entry(layer.name())
            .or_default()
            .extend(layer.steady_state_names());
    }
    for (layer, state) in states {
        names.entry(layer.as_str()).or_default().insert(state.name());
    }

    let check = |layer: &str, transition: &TransitionState| -> Result<()> {
        let Some(target) = transition.target() else {
            return Ok(());
        };
        if names.get(layer).is_some_and(|s| s.contains(target)) {
            Ok(())
        } else {
            Err(AnimationError::StateNotFound {
                layer: layer.to_string(),
                name: target.to_string(),
            })
        }
    };

    for layer in new_layers {
        for keyword in layer.transition_keywords() {
            if let Some(t) = layer.transition(keyword) {
                check(layer.name(), t)?;
            }
        }
    }
    for (layer, state) in states {
        for keyword in state.transition_keywords() {
            if let Some(t) = state.transition(keyword) {
                check(layer, t)?;
            }
        }
        if let Some(t) = state.end_transition() {
            check(layer, t)?;
        }
    }
    Ok(())
}

#[derive(Default)]
struct Pending {
    values: Vec<(String, f64)>,
    instances: Vec<(Arc<AnimationClip>, ClipDef)>,
}

/// Turns definitions into layers and states, collecting manager changes that are
/// applied only once everything validated.
struct Builder<'a> {
    clips: &'a ClipLibrary,
    joint_index: &'a dyn Fn(&str) -> Option<usize>,
    pending: Pending,
}

impl Builder<'_> {
    fn layer(&mut self, def: &LayerDef) -> Result<AnimationLayer> {
        let mut layer = AnimationLayer::new(def.name.clone());
        match def.blend_type.as_deref() {
            None => {}
            Some(kind) if kind.eq_ignore_ascii_case("lerp") => {
                let key = def.blend_key.clone().ok_or_else(|| {
                    AnimationError::invalid_definition(format!(
                        "layer '{}' blends without a blendKey",
                        def.name
                    ))
                })?;
                if let Some(weight) = def.blend_weight {
                    self.pending.values.push((key.clone(), weight));
                }
                layer.set_layer_blender(Some(Box::new(LerpBlender::new(key))));
            }
            Some(kind) => {
                return Err(AnimationError::UnknownBlendType {
                    kind: kind.to_string(),
                })
            }
        }
        for (keyword, t) in &def.transitions {
            layer.add_transition(keyword.clone(), build_transition(t)?)?;
        }
        Ok(layer)
    }

    fn steady_state(&mut self, def: &SteadyStateDef) -> Result<SteadyState> {
        if def.name.is_empty() {
            return Err(AnimationError::EmptyStateName);
        }
        let tree = match (&def.clip, &def.tree) {
            (Some(name), None) => self.tree(&TreeDef::Clip(ClipDef {
                name: name.clone(),
                ..ClipDef::default()
            }))?,
            (None, Some(tree)) => self.tree(tree)?,
            _ => {
                return Err(AnimationError::invalid_definition(format!(
                    "steady state '{}' needs exactly one of 'clip' or 'tree'",
                    def.name
                )))
            }
        };

        let mut state = SteadyState::new(def.name.clone(), tree);
        for (keyword, t) in &def.transitions {
            state.add_transition(keyword.clone(), build_transition(t)?)?;
        }
        if let Some(end) = &def.end_transition {
            state.set_end_transition(Some(build_transition(end)?));
        }
        Ok(state)
    }

    fn lookup_clip(&self, name: &str) -> Result<Arc<AnimationClip>> {
        self.clips
            .get(name)
            .cloned()
            .ok_or_else(|| AnimationError::ClipNotFound {
                name: name.to_string(),
            })
    }

    /// Clip for a clip node; instance settings are queued for the commit.
    fn clip_node(&mut self, def: &ClipDef) -> Result<Arc<AnimationClip>> {
        let clip = self.lookup_clip(&def.name)?;
        if def.time_scale.is_some() || def.loop_count.is_some() || def.active.is_some() {
            self.pending.instances.push((Arc::clone(&clip), def.clone()));
        }
        Ok(clip)
    }

    fn masked_clip(&mut self, def: &MaskedClipDef) -> Result<MaskedClipSource> {
        let clip = self.clip_node(&def.clip)?;
        Ok(MaskedClipSource::new(clip)
            .with_channels(def.channels.iter().cloned())
            .with_joints(def.joints.iter().copied()))
    }

    fn tree(&mut self, def: &TreeDef) -> Result<SourceTree> {
        Ok(match def {
            TreeDef::Clip(c) => SourceTree::clip(self.clip_node(c)?),
            TreeDef::InclusiveClip(m) => SourceTree::InclusiveClip(self.masked_clip(m)?),
            TreeDef::ExclusiveClip(m) => SourceTree::ExclusiveClip(self.masked_clip(m)?),
            TreeDef::Lerp(l) => {
                if let Some(weight) = l.blend_weight {
                    self.pending.values.push((l.blend_key.clone(), weight));
                }
                SourceTree::Lerp(BinaryLerpSource::new(
                    self.tree(&l.child_a)?,
                    self.tree(&l.child_b)?,
                    l.blend_key.clone(),
                ))
            }
            TreeDef::Managed(m) => {
                let mut source = ManagedTransformSource::new();
                if let Some(init) = &m.init_from_clip {
                    let clip = self.lookup_clip(&init.clip)?;
                    let mut joints = init.joints.clone();
                    for name in &init.joint_names {
                        let index = (self.joint_index)(name).ok_or_else(|| {
                            AnimationError::JointNotFound { name: name.clone() }
                        })?;
                        joints.push(index);
                    }
                    source.init_joints_from_clip(&clip, &joints);
                }
                SourceTree::Managed(source)
            }
            TreeDef::Frozen(f) => {
                SourceTree::Frozen(FrozenSource::new(self.tree(&f.child)?, f.time))
            }
        })
    }
}

fn build_transition(def: &TransitionDef) -> Result<TransitionState> {
    if let (Some(start), Some(end)) = (def.start_window, def.end_window) {
        if start > end {
            return Err(AnimationError::invalid_definition(format!(
                "'{}' transition window starts at {start} after it ends at {end}",
                def.kind
            )));
        }
    }
    Ok(build_transition_kind(def)?.with_window(def.start_window, def.end_window))
}

fn build_transition_kind(def: &TransitionDef) -> Result<TransitionState> {
    let kind = def.kind.to_ascii_lowercase();
    if kind == "ignore" {
        return Ok(TransitionState::ignore());
    }
    let target = def.target.clone().ok_or_else(|| {
        AnimationError::invalid_definition(format!("'{}' transition without a target", def.kind))
    })?;
    let fade_time = def.fade_time.unwrap_or(0.0);
    let blend_type = def.blend_type.unwrap_or_default();
    Ok(match kind.as_str() {
        "immediate" => TransitionState::immediate(target),
        "fade" => TransitionState::fade(target, fade_time, blend_type),
        "syncfade" => TransitionState::sync_fade(target, fade_time, blend_type),
        "frozen" => TransitionState::frozen(target, fade_time, blend_type),
        _ => {
            return Err(AnimationError::UnknownTransitionType {
                kind: def.kind.clone(),
            })
        }
    })
}

// ---- JSON shapes ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateMachineDef {
    #[serde(default)]
    layers: Vec<LayerDef>,
    #[serde(default)]
    steady_states: Vec<SteadyStateDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerDef {
    name: String,
    #[serde(default)]
    blend_type: Option<String>,
    #[serde(default)]
    blend_key: Option<String>,
    #[serde(default)]
    blend_weight: Option<f64>,
    #[serde(default)]
    transitions: HashMap<String, TransitionDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SteadyStateDef {
    name: String,
    #[serde(default)]
    layer: Option<String>,
    #[serde(default)]
    clip: Option<String>,
    #[serde(default)]
    tree: Option<TreeDef>,
    #[serde(default)]
    end_transition: Option<TransitionDef>,
    #[serde(default)]
    transitions: HashMap<String, TransitionDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransitionDef {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    fade_time: Option<f64>,
    #[serde(default)]
    blend_type: Option<BlendType>,
    #[serde(default)]
    start_window: Option<f64>,
    #[serde(default)]
    end_window: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum TreeDef {
    Clip(ClipDef),
    InclusiveClip(MaskedClipDef),
    ExclusiveClip(MaskedClipDef),
    Lerp(LerpDef),
    Managed(ManagedDef),
    Frozen(FrozenDef),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClipDef {
    name: String,
    #[serde(default)]
    time_scale: Option<f64>,
    #[serde(default, deserialize_with = "de_loop_count")]
    loop_count: Option<u32>,
    #[serde(default)]
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MaskedClipDef {
    #[serde(flatten)]
    clip: ClipDef,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    joints: Vec<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LerpDef {
    child_a: Box<TreeDef>,
    child_b: Box<TreeDef>,
    blend_key: String,
    #[serde(default)]
    blend_weight: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedDef {
    #[serde(default)]
    init_from_clip: Option<InitFromClipDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitFromClipDef {
    clip: String,
    #[serde(default, alias = "jointIds")]
    joints: Vec<usize>,
    #[serde(default)]
    joint_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FrozenDef {
    child: Box<TreeDef>,
    #[serde(default)]
    time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerChannelDef {
    clip: String,
    #[serde(default)]
    guaranteed: bool,
    trigger_channel: TriggerSpecDef,
}

#[derive(Debug, Deserialize)]
struct TriggerSpecDef {
    name: String,
    times: Vec<f32>,
    keys: Vec<String>,
}

/// `loopCount` is a non-negative count; any negative value means "forever".
fn de_loop_count<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<i64> = Option::deserialize(deserializer)?;
    Ok(raw.map(|n| {
        if n < 0 {
            LOOP_FOREVER
        } else {
            u32::try_from(n).unwrap_or(LOOP_FOREVER)
        }
    }))
}
