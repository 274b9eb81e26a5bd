//! Per-manager playback state for shared clips.

use std::sync::{Arc, Weak};

use hashbrown::HashMap;

use crate::clip::AnimationClip;
use crate::value::{SourceData, ValueKind};

/// `loop_count` value meaning "loop forever".
pub const LOOP_FOREVER: u32 = u32::MAX;

/// Playback bookkeeping of one clip inside one manager.
///
/// Created lazily and inactive; [`ClipInstance::restart`] (or the manager's
/// `reset_clip_instance`) activates it.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipInstance {
    start_time: f64,
    active: bool,
    time_scale: f64,
    loop_count: u32,
    current_time: f64,
    state_data: SourceData,
}

impl Default for ClipInstance {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            active: false,
            time_scale: 1.0,
            loop_count: 1,
            current_time: 0.0,
            state_data: SourceData::new(),
        }
    }
}

impl ClipInstance {
    pub fn new(start_time: f64) -> Self {
        Self {
            start_time,
            ..Self::default()
        }
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn set_start_time(&mut self, start_time: f64) {
        self.start_time = start_time;
    }

    /// Move the timeline origin by `delta` seconds (used when resuming from pause).
    pub fn shift_start_time(&mut self, delta: f64) {
        self.start_time += delta;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Start playing from `start_time`. Trigger channels fire again from their first key.
    pub fn restart(&mut self, start_time: f64) {
        self.start_time = start_time;
        self.active = true;
        self.state_data
            .retain(|_, value| value.kind() != ValueKind::Trigger);
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    pub fn set_time_scale(&mut self, time_scale: f64) {
        self.time_scale = time_scale;
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Number of plays before the clip ends; [`LOOP_FOREVER`] never ends.
    pub fn set_loop_count(&mut self, loop_count: u32) {
        self.loop_count = loop_count;
    }

    /// Clip-local time of the last sample.
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub(crate) fn set_current_time(&mut self, t: f64) {
        self.current_time = t;
    }

    /// Unwrapped clip-local time at `global_time`.
    pub fn clock_time(&self, global_time: f64) -> f64 {
        self.time_scale * (global_time - self.start_time)
    }

    /// Channel values from the last sample.
    pub fn state_data(&self) -> &SourceData {
        &self.state_data
    }

    pub(crate) fn state_data_mut(&mut self) -> &mut SourceData {
        &mut self.state_data
    }
}

struct CacheEntry {
    clip: Weak<AnimationClip>,
    instance: ClipInstance,
}

/// Clip → instance map that does not keep clips alive.
///
/// Entries are keyed by the clip's allocation. The stored `Weak` pins that
/// allocation, so a key is never reused while its entry exists. Entries whose clip
/// has been dropped are pruned lazily.
#[derive(Default)]
pub struct ClipInstanceCache {
    entries: HashMap<usize, CacheEntry>,
}

impl std::fmt::Debug for ClipInstanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(clip, inst)| (clip.name.clone(), inst.clone())))
            .finish()
    }
}

fn key_of(clip: &Arc<AnimationClip>) -> usize {
    Arc::as_ptr(clip) as usize
}

impl ClipInstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(&self, clip: &Arc<AnimationClip>) -> Option<&ClipInstance> {
        self.entries.get(&key_of(clip)).map(|e| &e.instance)
    }

    pub fn instance_mut(&mut self, clip: &Arc<AnimationClip>) -> Option<&mut ClipInstance> {
        self.entries.get_mut(&key_of(clip)).map(|e| &mut e.instance)
    }

    /// Existing instance for `clip`, or a new inactive one starting at `now`.
    pub fn get_or_create(&mut self, clip: &Arc<AnimationClip>, now: f64) -> &mut ClipInstance {
        &mut self
            .entries
            .entry(key_of(clip))
            .or_insert_with(|| CacheEntry {
                clip: Arc::downgrade(clip),
                instance: ClipInstance::new(now),
            })
            .instance
    }

    /// Instance of the first live clip named `name`.
    pub fn find_by_name(&self, name: &str) -> Option<&ClipInstance> {
        self.iter()
            .find(|(clip, _)| clip.name == name)
            .map(|(_, inst)| inst)
    }

    pub fn find_clip(&self, name: &str) -> Option<Arc<AnimationClip>> {
        self.iter()
            .find(|(clip, _)| clip.name == name)
            .map(|(clip, _)| clip)
    }

    /// Live entries only.
    pub fn iter(&self) -> impl Iterator<Item = (Arc<AnimationClip>, &ClipInstance)> + '_ {
        self.entries
            .values()
            .filter_map(|e| e.clip.upgrade().map(|clip| (clip, &e.instance)))
    }

    /// Drop entries whose clip no longer exists. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.clip.strong_count() > 0);
        before - self.entries.len()
    }

    /// Prune, then snapshot the clips whose instances are active.
    pub(crate) fn active_clips(&mut self) -> Vec<Arc<AnimationClip>> {
        self.prune();
        self.iter()
            .filter(|(_, inst)| inst.is_active())
            .map(|(clip, _)| clip)
            .collect()
    }

    /// Entry count, including entries not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
