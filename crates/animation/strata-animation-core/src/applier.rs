//! Writing resolved animation data to targets.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::clip::parse_joint_channel_name;
use crate::instance::ClipInstanceCache;
use crate::value::{SourceData, Value, IDENTITY_ROTATION};
use crate::values_store::ValuesStore;

/// What appliers see for one tick.
#[derive(Clone, Copy)]
pub struct ApplyFrame<'a> {
    /// Top layer's resolved data; `None` when no layer produced anything.
    pub source: Option<&'a SourceData>,
    pub values: &'a ValuesStore,
    pub clips: &'a ClipInstanceCache,
    /// Animation time of the tick (frozen while paused).
    pub time: f64,
}

/// Pushes resolved data into poses and the scene.
///
/// `apply_to` runs once per tracked pose, in order; `apply` runs once per tick
/// afterwards, whether or not any poses are tracked.
pub trait AnimationApplier {
    type Pose;
    type SceneRoot;

    fn apply_to(&mut self, pose: &Self::Pose, frame: &ApplyFrame<'_>);
    fn apply(&mut self, scene_root: Option<&Self::SceneRoot>, frame: &ApplyFrame<'_>);

    /// Index of the joint called `name` in `pose`, for definitions that address
    /// joints by name. Appliers whose poses carry no names return `None`.
    fn joint_index(&self, _pose: &Self::Pose, _name: &str) -> Option<usize> {
        None
    }
}

/// Callback run for a fired trigger key.
pub type TriggerCallback = Box<dyn FnMut(&str, &ApplyFrame<'_>) + Send>;

/// Trigger key → callbacks. Appliers call [`fire`](Self::fire) once per tick.
#[derive(Default)]
pub struct TriggerCallbacks {
    callbacks: HashMap<String, Vec<TriggerCallback>>,
}

impl fmt::Debug for TriggerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.callbacks.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

impl TriggerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, key: impl Into<String>, callback: F)
    where
        F: FnMut(&str, &ApplyFrame<'_>) + Send + 'static,
    {
        self.callbacks
            .entry(key.into())
            .or_default()
            .push(Box::new(callback));
    }

    /// Drop every callback registered for `key`.
    pub fn remove(&mut self, key: &str) -> bool {
        self.callbacks.remove(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Run the callbacks of every key fired by an armed trigger in `frame.source`.
    /// Returns how many callbacks ran.
    pub fn fire(&mut self, frame: &ApplyFrame<'_>) -> usize {
        let Some(source) = frame.source else {
            return 0;
        };
        let mut ran = 0;
        for trigger in source.values().filter_map(Value::as_trigger) {
            if !trigger.armed {
                continue;
            }
            for key in &trigger.keys {
                let Some(callbacks) = self.callbacks.get_mut(key.as_str()) else {
                    continue;
                };
                for callback in callbacks.iter_mut() {
                    callback(key.as_str(), frame);
                    ran += 1;
                }
            }
        }
        ran
    }
}

/// Applier that does nothing; lets a manager run without targets.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullApplier;

impl AnimationApplier for NullApplier {
    type Pose = SkeletonPose;
    type SceneRoot = ();

    fn apply_to(&mut self, _pose: &SkeletonPose, _frame: &ApplyFrame<'_>) {}
    fn apply(&mut self, _scene_root: Option<&()>, _frame: &ApplyFrame<'_>) {}

    fn joint_index(&self, pose: &SkeletonPose, name: &str) -> Option<usize> {
        pose.find_joint(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointTransform {
    pub translation: [f32; 3],
    /// Quaternion (x, y, z, w)
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl JointTransform {
    pub const IDENTITY: JointTransform = JointTransform {
        translation: [0.0; 3],
        rotation: IDENTITY_ROTATION,
        scale: [1.0; 3],
    };
}

impl Default for JointTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Local joint transforms of one skeleton instance.
///
/// Poses are shared with the manager as `Arc<SkeletonPose>`, so the transforms sit
/// behind a mutex. No hierarchy or skinning math lives here.
#[derive(Debug)]
pub struct SkeletonPose {
    joint_names: Vec<String>,
    local: Mutex<Vec<JointTransform>>,
}

impl SkeletonPose {
    pub fn new(joint_names: Vec<String>) -> Self {
        let local = vec![JointTransform::IDENTITY; joint_names.len()];
        Self {
            joint_names,
            local: Mutex::new(local),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JointTransform>> {
        // a panicking writer leaves plain data behind; keep using it
        self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn joint_count(&self) -> usize {
        self.joint_names.len()
    }

    pub fn joint_names(&self) -> &[String] {
        &self.joint_names
    }

    pub fn find_joint(&self, name: &str) -> Option<usize> {
        self.joint_names.iter().position(|n| n == name)
    }

    pub fn local_transform(&self, joint: usize) -> Option<JointTransform> {
        self.lock().get(joint).copied()
    }

    /// Returns false when `joint` is out of range.
    pub fn set_local_transform(&self, joint: usize, transform: JointTransform) -> bool {
        match self.lock().get_mut(joint) {
            Some(slot) => {
                *slot = transform;
                true
            }
            None => false,
        }
    }

    pub fn local_transforms(&self) -> Vec<JointTransform> {
        self.lock().clone()
    }

    pub fn set_to_bind_pose(&self) {
        self.lock().fill(JointTransform::IDENTITY);
    }
}

/// Writes every `"_jnt{i}"` transform channel into joint `i` of the pose, and runs
/// trigger callbacks once per tick.
#[derive(Debug, Default)]
pub struct JointApplier {
    joints_written: usize,
    triggers: TriggerCallbacks,
    triggers_fired: usize,
}

impl JointApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joint writes performed so far, across all poses.
    pub fn joints_written(&self) -> usize {
        self.joints_written
    }

    pub fn reset_counter(&mut self) {
        self.joints_written = 0;
        self.triggers_fired = 0;
    }

    pub fn add_trigger_callback<F>(&mut self, key: impl Into<String>, callback: F)
    where
        F: FnMut(&str, &ApplyFrame<'_>) + Send + 'static,
    {
        self.triggers.add(key, callback);
    }

    pub fn remove_trigger_callbacks(&mut self, key: &str) -> bool {
        self.triggers.remove(key)
    }

    /// Trigger callbacks run so far.
    pub fn triggers_fired(&self) -> usize {
        self.triggers_fired
    }
}

impl AnimationApplier for JointApplier {
    type Pose = SkeletonPose;
    type SceneRoot = ();

    fn apply_to(&mut self, pose: &SkeletonPose, frame: &ApplyFrame<'_>) {
        let Some(source) = frame.source else {
            return;
        };
        for (key, value) in source.iter() {
            let Some(joint) = parse_joint_channel_name(key) else {
                continue;
            };
            let Some((translation, rotation, scale)) = value.as_transform() else {
                continue;
            };
            let transform = JointTransform {
                translation,
                rotation,
                scale,
            };
            if pose.set_local_transform(joint, transform) {
                self.joints_written += 1;
            }
        }
    }

    fn apply(&mut self, _scene_root: Option<&()>, frame: &ApplyFrame<'_>) {
        self.triggers_fired += self.triggers.fire(frame);
    }

    fn joint_index(&self, pose: &SkeletonPose, name: &str) -> Option<usize> {
        pose.find_joint(name)
    }
}
