//! AnimationManager: owns the layers, clip instances and values of one character and
//! drives them from a shared timer.
//!
//! Per `update()`:
//! - throttle to `update_rate` (drift compensated),
//! - advance every layer's current state to the animation time,
//! - run the applier on each pose, then on the scene root,
//! - let every layer settle its state (`post_update`).

use std::fmt;
use std::sync::Arc;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::applier::{AnimationApplier, ApplyFrame, NullApplier};
use crate::blend::CombinerRegistry;
use crate::clip::AnimationClip;
use crate::config::ManagerConfig;
use crate::context::{LayerContext, SourceContext};
use crate::error::{AnimationError, Result};
use crate::ids::{IdAllocator, ListenerId};
use crate::instance::{ClipInstance, ClipInstanceCache};
use crate::layer::AnimationLayer;
use crate::state::FiniteState;
use crate::timer::ReadOnlyTimer;
use crate::value::SourceData;
use crate::values_store::ValuesStore;

/// Playback state of a manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateState {
    #[default]
    Play,
    Pause,
    Stop,
}

impl UpdateState {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
        }
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Play)
    }
}

type UpdateStateListener = Box<dyn FnMut(UpdateState, UpdateState) + Send>;

pub struct AnimationManager<A: AnimationApplier = NullApplier> {
    timer: Arc<dyn ReadOnlyTimer>,
    layers: Vec<AnimationLayer>,
    poses: Vec<Arc<A::Pose>>,
    scene_root: Option<Arc<A::SceneRoot>>,
    applier: Option<A>,
    clips: ClipInstanceCache,
    values: ValuesStore,
    combiner: CombinerRegistry,

    update_state: UpdateState,
    /// The one update allowed after entering Stop has run.
    stop_settled: bool,
    paused_at: Option<f64>,
    update_rate: f64,
    last_update: f64,

    ids: IdAllocator,
    listeners: Vec<(ListenerId, UpdateStateListener)>,
}

impl AnimationManager<NullApplier> {
    /// Manager with default configuration and no targets to write to.
    pub fn new(timer: Arc<dyn ReadOnlyTimer>) -> Self {
        Self::with_applier(timer, NullApplier)
    }
}

impl<A: AnimationApplier> AnimationManager<A> {
    /// Manager without an applier; install one with [`set_applier`](Self::set_applier).
    pub fn with_config(timer: Arc<dyn ReadOnlyTimer>, config: ManagerConfig) -> Self {
        let now = timer.time_in_seconds();
        let mut base = AnimationLayer::new(config.base_layer_name);
        base.set_attached(true);
        let paused_at = (config.initial_state == UpdateState::Pause).then_some(now);
        Self {
            timer,
            layers: vec![base],
            poses: Vec::new(),
            scene_root: None,
            applier: None,
            clips: ClipInstanceCache::new(),
            values: ValuesStore::new(config.values_default, config.log_on_replace),
            combiner: CombinerRegistry::default(),
            update_state: config.initial_state,
            stop_settled: false,
            paused_at,
            update_rate: config.update_rate.max(0.0),
            last_update: 0.0,
            ids: IdAllocator::new(),
            listeners: Vec::new(),
        }
    }

    pub fn with_applier(timer: Arc<dyn ReadOnlyTimer>, applier: A) -> Self {
        let mut manager = Self::with_config(timer, ManagerConfig::default());
        manager.applier = Some(applier);
        manager
    }

    // ---- time ----

    pub fn global_timer(&self) -> &Arc<dyn ReadOnlyTimer> {
        &self.timer
    }

    pub fn set_global_timer(&mut self, timer: Arc<dyn ReadOnlyTimer>) {
        self.timer = timer;
    }

    pub fn current_global_time(&self) -> f64 {
        self.timer.time_in_seconds()
    }

    /// Time states are sampled at: the global time, or the pause timestamp while paused.
    pub fn animation_time(&self) -> f64 {
        self.animation_time_at(self.current_global_time())
    }

    fn animation_time_at(&self, now: f64) -> f64 {
        match (self.update_state, self.paused_at) {
            (UpdateState::Pause, Some(paused_at)) => paused_at,
            _ => now,
        }
    }

    pub fn update_rate(&self) -> f64 {
        self.update_rate
    }

    /// Minimum seconds between effective updates; `0.0` updates on every call.
    pub fn set_update_rate(&mut self, rate: f64) {
        self.update_rate = rate.max(0.0);
    }

    // ---- tick ----

    /// Run one tick. Returns false when the call was throttled or the manager is
    /// stopped and already settled.
    pub fn update(&mut self) -> bool {
        if self.update_state == UpdateState::Stop && self.stop_settled {
            return false;
        }

        let now = self.current_global_time();
        if self.update_rate != 0.0 {
            let elapsed = now - self.last_update;
            if elapsed < self.update_rate {
                trace!("update throttled ({elapsed:.4}s since last)");
                return false;
            }
            self.last_update = now - elapsed % self.update_rate;
        }

        if self.update_state == UpdateState::Stop {
            self.stop_settled = true;
        }

        let time = self.animation_time_at(now);
        {
            let mut ctx = LayerContext::new(&mut self.clips, &self.values, time);
            for layer in &mut self.layers {
                layer.update(&mut ctx);
            }
        }

        if let Some(mut applier) = self.applier.take() {
            self.wire_layer_blending();
            let source = self.resolved_source_data();
            let frame = ApplyFrame {
                source: source.as_ref(),
                values: &self.values,
                clips: &self.clips,
                time,
            };
            for pose in &self.poses {
                applier.apply_to(pose, &frame);
            }
            applier.apply(self.scene_root.as_deref(), &frame);
            self.applier = Some(applier);
        }

        for layer in &mut self.layers {
            layer.post_update(&self.clips);
        }
        true
    }

    // ---- play / pause / stop ----

    pub fn update_state(&self) -> UpdateState {
        self.update_state
    }

    pub fn play(&mut self) -> bool {
        self.set_update_state(UpdateState::Play)
    }

    pub fn pause(&mut self) -> bool {
        self.set_update_state(UpdateState::Pause)
    }

    pub fn stop(&mut self) -> bool {
        self.set_update_state(UpdateState::Stop)
    }

    /// Change the playback state. Returns true and notifies listeners only on a
    /// real change; pausing while stopped is refused.
    pub fn set_update_state(&mut self, state: UpdateState) -> bool {
        let old = self.update_state;
        if state == old {
            return false;
        }
        if state == UpdateState::Pause && old == UpdateState::Stop {
            debug!("pause ignored: manager is stopped");
            return false;
        }

        let now = self.current_global_time();
        match state {
            UpdateState::Play => {
                let active = self.clips.active_clips();
                match (old, self.paused_at.take()) {
                    (UpdateState::Pause, Some(paused_at)) => {
                        let paused_for = now - paused_at;
                        for clip in &active {
                            if let Some(instance) = self.clips.instance_mut(clip) {
                                instance.shift_start_time(paused_for);
                            }
                        }
                    }
                    _ => {
                        for clip in &active {
                            if let Some(instance) = self.clips.instance_mut(clip) {
                                instance.set_start_time(now);
                            }
                        }
                    }
                }
            }
            UpdateState::Pause => self.paused_at = Some(now),
            UpdateState::Stop => {
                self.paused_at = None;
                self.stop_settled = false;
            }
        }

        debug!("update state {} -> {}", old.name(), state.name());
        self.update_state = state;
        for (_, listener) in self.listeners.iter_mut() {
            listener(old, state);
        }
        true
    }

    pub fn add_update_state_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(UpdateState, UpdateState) + Send + 'static,
    {
        let id = self.ids.alloc_listener();
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_update_state_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // ---- layers ----

    /// Append a layer; returns its index.
    pub fn add_animation_layer(&mut self, mut layer: AnimationLayer) -> usize {
        if self.find_animation_layer(layer.name()).is_some() {
            warn!("a layer named '{}' already exists", layer.name());
        }
        layer.set_attached(true);
        self.layers.push(layer);
        self.layers.len() - 1
    }

    /// Insert a layer at `index` (`index == layer_count()` appends).
    pub fn insert_animation_layer(&mut self, mut layer: AnimationLayer, index: usize) -> Result<()> {
        let len = self.layers.len();
        if index > len {
            return Err(AnimationError::LayerIndexOutOfRange { index, len });
        }
        if self.find_animation_layer(layer.name()).is_some() {
            warn!("a layer named '{}' already exists", layer.name());
        }
        layer.set_attached(true);
        self.layers.insert(index, layer);
        Ok(())
    }

    /// Detach and return the first layer named `name`. The base layer is never removed.
    pub fn remove_animation_layer(&mut self, name: &str) -> Option<AnimationLayer> {
        let index = self.find_animation_layer_index(name)?;
        if index == 0 {
            warn!("refusing to remove the base layer '{}'", name);
            return None;
        }
        let mut layer = self.layers.remove(index);
        layer.set_attached(false);
        Some(layer)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[AnimationLayer] {
        &self.layers
    }

    pub fn animation_layer(&self, index: usize) -> Option<&AnimationLayer> {
        self.layers.get(index)
    }

    pub fn animation_layer_mut(&mut self, index: usize) -> Option<&mut AnimationLayer> {
        self.layers.get_mut(index)
    }

    pub fn find_animation_layer(&self, name: &str) -> Option<&AnimationLayer> {
        self.layers.iter().find(|l| l.name() == name)
    }

    pub fn find_animation_layer_mut(&mut self, name: &str) -> Option<&mut AnimationLayer> {
        self.layers.iter_mut().find(|l| l.name() == name)
    }

    pub fn find_animation_layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name() == name)
    }

    pub fn base_animation_layer(&self) -> &AnimationLayer {
        &self.layers[0]
    }

    pub fn base_animation_layer_mut(&mut self) -> &mut AnimationLayer {
        &mut self.layers[0]
    }

    /// Run `f` on layer `index` with a context lent from this manager.
    pub fn with_layer<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut AnimationLayer, &mut LayerContext<'_>) -> R,
    ) -> Option<R> {
        let time = self.animation_time();
        let layer = self.layers.get_mut(index)?;
        let mut ctx = LayerContext::new(&mut self.clips, &self.values, time);
        Some(f(layer, &mut ctx))
    }

    pub fn set_current_state(&mut self, layer_index: usize, name: &str, rewind: bool) -> bool {
        self.with_layer(layer_index, |layer, ctx| {
            layer.set_current_state(name, rewind, ctx)
        })
        .unwrap_or(false)
    }

    pub fn set_current_finite_state(
        &mut self,
        layer_index: usize,
        state: Option<FiniteState>,
        rewind: bool,
    ) -> bool {
        self.with_layer(layer_index, |layer, ctx| {
            layer.set_current_finite_state(state, rewind, ctx)
        })
        .is_some()
    }

    pub fn clear_current_state(&mut self, layer_index: usize) -> bool {
        self.with_layer(layer_index, |layer, _| layer.clear_current_state())
            .is_some()
    }

    pub fn do_transition(&mut self, layer_index: usize, keyword: &str) -> bool {
        self.with_layer(layer_index, |layer, ctx| layer.do_transition(keyword, ctx))
            .unwrap_or(false)
    }

    // ---- source data ----

    /// Point each layer's blender at the layer below it, by index.
    fn wire_layer_blending(&mut self) {
        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer.update_layer_blending(index.checked_sub(1), index);
        }
    }

    fn resolved_source_data(&self) -> Option<SourceData> {
        let ctx = SourceContext::new(&self.layers, &self.clips, &self.values, &self.combiner);
        self.layers.last()?.current_source_data(&ctx)
    }

    /// The top layer's data with every layer's blending applied.
    pub fn current_source_data(&mut self) -> Option<SourceData> {
        self.wire_layer_blending();
        self.resolved_source_data()
    }

    // ---- clip instances ----

    /// Instance for `clip`, created inactive (start time = now) on first use.
    pub fn get_clip_instance(&mut self, clip: &Arc<AnimationClip>) -> &mut ClipInstance {
        let now = self.current_global_time();
        self.clips.get_or_create(clip, now)
    }

    pub fn clip_instance(&self, clip: &Arc<AnimationClip>) -> Option<&ClipInstance> {
        self.clips.instance(clip)
    }

    /// Restart `clip` at `start_time`.
    pub fn reset_clip_instance(&mut self, clip: &Arc<AnimationClip>, start_time: f64) {
        self.clips.get_or_create(clip, start_time).restart(start_time);
    }

    pub fn find_clip_instance(&self, clip_name: &str) -> Option<&ClipInstance> {
        self.clips.find_by_name(clip_name)
    }

    pub fn find_animation_clip(&self, clip_name: &str) -> Option<Arc<AnimationClip>> {
        self.clips.find_clip(clip_name)
    }

    pub fn clip_instances(&self) -> &ClipInstanceCache {
        &self.clips
    }

    pub fn clip_instances_mut(&mut self) -> &mut ClipInstanceCache {
        &mut self.clips
    }

    // ---- combining ----

    /// Combiners used by fades, and by blenders and lerp sources without their own.
    pub fn combiner(&self) -> &CombinerRegistry {
        &self.combiner
    }

    pub fn combiner_mut(&mut self) -> &mut CombinerRegistry {
        &mut self.combiner
    }

    // ---- values ----

    pub fn values_store(&self) -> &ValuesStore {
        &self.values
    }

    pub fn values_store_mut(&mut self) -> &mut ValuesStore {
        &mut self.values
    }

    // ---- targets ----

    pub fn add_pose(&mut self, pose: Arc<A::Pose>) {
        self.poses.push(pose);
    }

    /// Stop tracking `pose` (by identity).
    pub fn remove_pose(&mut self, pose: &Arc<A::Pose>) -> bool {
        match self.poses.iter().position(|p| Arc::ptr_eq(p, pose)) {
            Some(index) => {
                self.poses.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains_pose(&self, pose: &Arc<A::Pose>) -> bool {
        self.poses.iter().any(|p| Arc::ptr_eq(p, pose))
    }

    pub fn pose_count(&self) -> usize {
        self.poses.len()
    }

    pub fn pose(&self, index: usize) -> Option<&Arc<A::Pose>> {
        self.poses.get(index)
    }

    pub fn scene_root(&self) -> Option<&Arc<A::SceneRoot>> {
        self.scene_root.as_ref()
    }

    pub fn set_scene_root(&mut self, scene_root: Option<Arc<A::SceneRoot>>) {
        self.scene_root = scene_root;
    }

    pub fn applier(&self) -> Option<&A> {
        self.applier.as_ref()
    }

    pub fn applier_mut(&mut self) -> Option<&mut A> {
        self.applier.as_mut()
    }

    /// Install (or remove) the applier, returning the previous one.
    pub fn set_applier(&mut self, applier: Option<A>) -> Option<A> {
        std::mem::replace(&mut self.applier, applier)
    }
}

impl<A: AnimationApplier> fmt::Debug for AnimationManager<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationManager")
            .field("layers", &self.layers)
            .field("poses", &self.poses.len())
            .field("clips", &self.clips)
            .field("values", &self.values)
            .field("combiner", &self.combiner)
            .field("update_state", &self.update_state)
            .field("stop_settled", &self.stop_settled)
            .field("paused_at", &self.paused_at)
            .field("update_rate", &self.update_rate)
            .field("last_update", &self.last_update)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
