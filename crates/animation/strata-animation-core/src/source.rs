//! Source trees: what a steady state plays.
//!
//! A tree is advanced with `set_time` (returns whether it is still producing
//! fresh data), rewound with `reset_clips`, and read with `source_data`.

use std::sync::Arc;

use hashbrown::HashSet;
use log::warn;

use crate::blend::CombinerRegistry;
use crate::clip::{joint_channel_name, parse_joint_channel_name, AnimationClip};
use crate::context::SourceContext;
use crate::instance::{ClipInstanceCache, LOOP_FOREVER};
use crate::value::{SourceData, Value, IDENTITY_ROTATION};

#[derive(Clone, Debug)]
pub enum SourceTree {
    Clip(ClipSource),
    /// Clip reduced to the channels and joints in its mask.
    InclusiveClip(MaskedClipSource),
    /// Clip with the channels and joints in its mask removed.
    ExclusiveClip(MaskedClipSource),
    Managed(ManagedTransformSource),
    Lerp(BinaryLerpSource),
    Frozen(FrozenSource),
}

impl SourceTree {
    pub fn clip(clip: Arc<AnimationClip>) -> Self {
        SourceTree::Clip(ClipSource::new(clip))
    }

    fn clip_source(&self) -> Option<&ClipSource> {
        match self {
            SourceTree::Clip(s) => Some(s),
            SourceTree::InclusiveClip(m) | SourceTree::ExclusiveClip(m) => Some(&m.source),
            _ => None,
        }
    }

    /// Advance to `global_time`. Returns `false` once the tree has finished.
    pub fn set_time(&self, global_time: f64, clips: &mut ClipInstanceCache) -> bool {
        if let Some(s) = self.clip_source() {
            return s.set_time(global_time, clips);
        }
        match self {
            SourceTree::Lerp(s) => {
                // advance both sides even if the first is still running
                let a = s.a.set_time(global_time, clips);
                let b = s.b.set_time(global_time, clips);
                a || b
            }
            SourceTree::Frozen(s) => {
                if !s.child.is_active(clips) {
                    s.child.reset_clips(clips, 0.0);
                }
                s.child.set_time(s.time, clips);
                true
            }
            _ => true,
        }
    }

    /// Restart every clip under this tree at `start_time`.
    pub fn reset_clips(&self, clips: &mut ClipInstanceCache, start_time: f64) {
        if let Some(s) = self.clip_source() {
            return s.reset(clips, start_time);
        }
        match self {
            SourceTree::Lerp(s) => {
                s.a.reset_clips(clips, start_time);
                s.b.reset_clips(clips, start_time);
            }
            // pinned trees run on their own clock that starts at zero
            SourceTree::Frozen(s) => s.child.reset_clips(clips, 0.0),
            _ => {}
        }
    }

    pub fn is_active(&self, clips: &ClipInstanceCache) -> bool {
        if let Some(s) = self.clip_source() {
            return clips.instance(&s.clip).is_some_and(|i| i.is_active());
        }
        match self {
            SourceTree::Lerp(s) => s.a.is_active(clips) || s.b.is_active(clips),
            _ => true,
        }
    }

    pub fn source_data(&self, ctx: &SourceContext<'_>) -> Option<SourceData> {
        match self {
            SourceTree::Clip(s) => s.data(ctx).cloned(),
            SourceTree::InclusiveClip(m) => m.source.data(ctx).map(|d| m.masked(d, true)),
            SourceTree::ExclusiveClip(m) => m.source.data(ctx).map(|d| m.masked(d, false)),
            SourceTree::Managed(s) => Some(s.data.clone()),
            SourceTree::Lerp(s) => {
                let a = s.a.source_data(ctx);
                let b = s.b.source_data(ctx);
                let w = ctx.values.get(&s.blend_key) as f32;
                s.combiner
                    .as_ref()
                    .unwrap_or(ctx.combiner)
                    .combine_source_data(a.as_ref(), b.as_ref(), w)
            }
            SourceTree::Frozen(s) => s.child.source_data(ctx),
        }
    }

    /// Every clip referenced under this tree, depth first.
    pub fn collect_clips(&self, out: &mut Vec<Arc<AnimationClip>>) {
        if let Some(s) = self.clip_source() {
            return out.push(Arc::clone(&s.clip));
        }
        match self {
            SourceTree::Lerp(s) => {
                s.a.collect_clips(out);
                s.b.collect_clips(out);
            }
            SourceTree::Frozen(s) => s.child.collect_clips(out),
            _ => {}
        }
    }

    pub fn first_clip(&self) -> Option<&Arc<AnimationClip>> {
        if let Some(s) = self.clip_source() {
            return Some(&s.clip);
        }
        match self {
            SourceTree::Lerp(s) => s.a.first_clip().or_else(|| s.b.first_clip()),
            SourceTree::Frozen(s) => s.child.first_clip(),
            _ => None,
        }
    }

    /// Clip-local time of the first clip under this tree as of its last sample.
    pub fn local_time(&self, clips: &ClipInstanceCache) -> Option<f64> {
        clips
            .instance(self.first_clip()?)
            .map(|instance| instance.current_time())
    }
}

/// Plays one clip through the manager's instance for it.
#[derive(Clone, Debug)]
pub struct ClipSource {
    clip: Arc<AnimationClip>,
}

impl ClipSource {
    pub fn new(clip: Arc<AnimationClip>) -> Self {
        Self { clip }
    }

    pub fn clip(&self) -> &Arc<AnimationClip> {
        &self.clip
    }

    fn data<'a>(&self, ctx: &SourceContext<'a>) -> Option<&'a SourceData> {
        ctx.clips.instance(&self.clip).map(|i| i.state_data())
    }

    fn reset(&self, clips: &mut ClipInstanceCache, start_time: f64) {
        clips.get_or_create(&self.clip, start_time).restart(start_time);
    }

    fn set_time(&self, global_time: f64, clips: &mut ClipInstanceCache) -> bool {
        let instance = clips.get_or_create(&self.clip, global_time);
        if !instance.is_active() {
            return false;
        }

        let max = self.clip.max_time() as f64;
        let mut clock = instance.clock_time(global_time);
        let loops = instance.loop_count();

        if max > 0.0 {
            let looping = loops == LOOP_FOREVER || (loops > 1 && max * loops as f64 >= clock.abs());
            if looping {
                clock = clock.rem_euclid(max);
            } else if clock > max || clock < 0.0 {
                clock = clock.clamp(0.0, max);
                instance.set_active(false);
            }
        } else {
            // zero-length clip: one pose, then done
            clock = 0.0;
            instance.set_active(false);
        }

        instance.set_current_time(clock);
        self.clip.sample_into(clock, instance.state_data_mut());
        instance.is_active()
    }
}

/// A clip with a mask of channel names and joint indices. Whether the mask keeps or
/// drops those entries depends on the [`SourceTree`] variant holding it.
#[derive(Clone, Debug)]
pub struct MaskedClipSource {
    source: ClipSource,
    channels: HashSet<String>,
    joints: HashSet<usize>,
}

impl MaskedClipSource {
    pub fn new(clip: Arc<AnimationClip>) -> Self {
        Self {
            source: ClipSource::new(clip),
            channels: HashSet::new(),
            joints: HashSet::new(),
        }
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels.extend(channels.into_iter().map(Into::into));
        self
    }

    pub fn with_joints(mut self, joints: impl IntoIterator<Item = usize>) -> Self {
        self.joints.extend(joints);
        self
    }

    pub fn add_channel(&mut self, name: impl Into<String>) {
        self.channels.insert(name.into());
    }

    pub fn add_joint(&mut self, joint_index: usize) {
        self.joints.insert(joint_index);
    }

    pub fn clip(&self) -> &Arc<AnimationClip> {
        self.source.clip()
    }

    /// Whether the mask names `key`, either directly or as a joint channel.
    pub fn matches(&self, key: &str) -> bool {
        self.channels.contains(key)
            || parse_joint_channel_name(key).is_some_and(|j| self.joints.contains(&j))
    }

    fn masked(&self, data: &SourceData, keep_matches: bool) -> SourceData {
        data.iter()
            .filter(|(key, _)| self.matches(key) == keep_matches)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Joint transforms driven by code rather than clips (look-at, procedural offsets...).
#[derive(Clone, Debug, Default)]
pub struct ManagedTransformSource {
    data: SourceData,
}

impl ManagedTransformSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn joint_parts(&self, joint_index: usize) -> ([f32; 3], [f32; 4], [f32; 3]) {
        self.data
            .get(&joint_channel_name(joint_index))
            .and_then(Value::as_transform)
            .unwrap_or(([0.0; 3], IDENTITY_ROTATION, [1.0; 3]))
    }

    pub fn set_joint_transform(
        &mut self,
        joint_index: usize,
        translation: [f32; 3],
        rotation: [f32; 4],
        scale: [f32; 3],
    ) {
        self.data.insert(
            joint_channel_name(joint_index),
            Value::transform(translation, rotation, scale),
        );
    }

    pub fn set_joint_translation(&mut self, joint_index: usize, translation: [f32; 3]) {
        let (_, r, s) = self.joint_parts(joint_index);
        self.set_joint_transform(joint_index, translation, r, s);
    }

    pub fn set_joint_rotation(&mut self, joint_index: usize, rotation: [f32; 4]) {
        let (t, _, s) = self.joint_parts(joint_index);
        self.set_joint_transform(joint_index, t, rotation, s);
    }

    pub fn set_joint_scale(&mut self, joint_index: usize, scale: [f32; 3]) {
        let (t, r, _) = self.joint_parts(joint_index);
        self.set_joint_transform(joint_index, t, r, scale);
    }

    /// Arbitrary named channel.
    pub fn set_channel(&mut self, name: impl Into<String>, value: Value) {
        self.data.insert(name.into(), value);
    }

    pub fn remove_channel(&mut self, name: &str) -> Option<Value> {
        self.data.remove(name)
    }

    /// Seed the given joints with the first frame of `clip`. Joints the clip does not
    /// animate are skipped with a warning.
    pub fn init_joints_from_clip(&mut self, clip: &AnimationClip, joint_indices: &[usize]) {
        for &index in joint_indices {
            match clip.joint_channel(index).and_then(|c| c.samples.frame_at(0)) {
                Some(frame) => {
                    self.data.insert(joint_channel_name(index), frame);
                }
                None => warn!(
                    "clip '{}' has no channel for joint {}; leaving it unset",
                    clip.name, index
                ),
            }
        }
    }

    pub fn data(&self) -> &SourceData {
        &self.data
    }
}

/// Blend of two child trees, weighted by a values-store entry. Uses the manager's
/// combiners unless given its own.
#[derive(Clone, Debug)]
pub struct BinaryLerpSource {
    a: Box<SourceTree>,
    b: Box<SourceTree>,
    blend_key: String,
    combiner: Option<CombinerRegistry>,
}

impl BinaryLerpSource {
    pub fn new(a: SourceTree, b: SourceTree, blend_key: impl Into<String>) -> Self {
        Self {
            a: Box::new(a),
            b: Box::new(b),
            blend_key: blend_key.into(),
            combiner: None,
        }
    }

    pub fn with_combiner(mut self, combiner: CombinerRegistry) -> Self {
        self.combiner = Some(combiner);
        self
    }

    pub fn blend_key(&self) -> &str {
        &self.blend_key
    }

    pub fn set_blend_key(&mut self, key: impl Into<String>) {
        self.blend_key = key.into();
    }

    /// Own combiner, created empty on first access.
    pub fn combiner_mut(&mut self) -> &mut CombinerRegistry {
        self.combiner.get_or_insert_with(CombinerRegistry::default)
    }
}

/// A child tree pinned at a fixed local time.
///
/// The child is sampled at `time` on every tick. If its clips are not running (the
/// state was entered without a rewind) they are started first, so the pinned pose
/// shows up on the next tick either way.
#[derive(Clone, Debug)]
pub struct FrozenSource {
    child: Box<SourceTree>,
    time: f64,
}

impl FrozenSource {
    pub fn new(child: SourceTree, time: f64) -> Self {
        Self {
            child: Box::new(child),
            time,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{AnimationChannel, AnimationClip};
    use crate::values_store::ValuesStore;

    fn approx(a: f32, b: f32, eps: f32) {
        assert!((a - b).abs() <= eps, "left={a} right={b} eps={eps}");
    }

    fn ramp(name: &str, len: f32) -> Arc<AnimationClip> {
        Arc::new(
            AnimationClip::new(name)
                .with_channel(AnimationChannel::float("x", vec![0.0, len], vec![0.0, len]))
                .unwrap(),
        )
    }

    fn read_data(tree: &SourceTree, clips: &ClipInstanceCache, values: &ValuesStore) -> SourceData {
        let combiner = CombinerRegistry::default();
        let ctx = SourceContext::new(&[], clips, values, &combiner);
        tree.source_data(&ctx).unwrap()
    }

    fn read_x(tree: &SourceTree, clips: &ClipInstanceCache, values: &ValuesStore) -> f32 {
        read_data(tree, clips, values)["x"].as_float().unwrap()
    }

    #[test]
    fn inactive_clip_does_not_advance() {
        let mut clips = ClipInstanceCache::new();
        let tree = SourceTree::clip(ramp("r", 1.0));
        assert!(!tree.set_time(0.5, &mut clips));
        assert!(!tree.is_active(&clips));
    }

    #[test]
    fn clip_plays_once_then_holds_last_frame() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let tree = SourceTree::clip(ramp("r", 2.0));
        tree.reset_clips(&mut clips, 10.0);

        assert!(tree.set_time(11.0, &mut clips));
        approx(read_x(&tree, &clips, &values), 1.0, 1e-6);

        assert!(!tree.set_time(12.5, &mut clips));
        approx(read_x(&tree, &clips, &values), 2.0, 1e-6);
        assert!(!tree.is_active(&clips));
    }

    #[test]
    fn clip_loops_within_budget() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let clip = ramp("r", 2.0);
        let tree = SourceTree::clip(Arc::clone(&clip));
        tree.reset_clips(&mut clips, 0.0);
        clips.instance_mut(&clip).unwrap().set_loop_count(2);

        assert!(tree.set_time(3.0, &mut clips));
        approx(read_x(&tree, &clips, &values), 1.0, 1e-6);
        // budget of two plays is spent after 4s
        assert!(!tree.set_time(4.5, &mut clips));
        approx(read_x(&tree, &clips, &values), 2.0, 1e-6);
    }

    #[test]
    fn infinite_loop_with_time_scale() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let clip = ramp("r", 1.0);
        let tree = SourceTree::clip(Arc::clone(&clip));
        tree.reset_clips(&mut clips, 0.0);
        let inst = clips.instance_mut(&clip).unwrap();
        inst.set_loop_count(LOOP_FOREVER);
        inst.set_time_scale(2.0);

        assert!(tree.set_time(100.25, &mut clips));
        approx(read_x(&tree, &clips, &values), 0.5, 1e-4);
        assert!((clips.instance(&clip).unwrap().current_time() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn lerp_reads_weight_from_values_store() {
        let mut clips = ClipInstanceCache::new();
        let mut values = ValuesStore::default();
        let mut low = ManagedTransformSource::new();
        low.set_channel("x", Value::Float(0.0));
        let mut high = ManagedTransformSource::new();
        high.set_channel("x", Value::Float(10.0));
        let tree = SourceTree::Lerp(BinaryLerpSource::new(
            SourceTree::Managed(low),
            SourceTree::Managed(high),
            "mix",
        ));

        assert!(tree.set_time(0.0, &mut clips));
        approx(read_x(&tree, &clips, &values), 0.0, 1e-6);
        values.set("mix", 0.3);
        approx(read_x(&tree, &clips, &values), 3.0, 1e-5);
    }

    #[test]
    fn frozen_tree_samples_its_pinned_time() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let tree = SourceTree::Frozen(FrozenSource::new(SourceTree::clip(ramp("r", 4.0)), 1.5));
        tree.reset_clips(&mut clips, 99.0);
        assert!(tree.set_time(1234.0, &mut clips));
        approx(read_x(&tree, &clips, &values), 1.5, 1e-6);
    }

    #[test]
    fn frozen_tree_starts_its_child_without_a_rewind() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let tree = SourceTree::Frozen(FrozenSource::new(SourceTree::clip(ramp("r", 4.0)), 2.5));
        // no reset_clips: the child instance does not exist yet
        assert!(tree.set_time(7.0, &mut clips));
        approx(read_x(&tree, &clips, &values), 2.5, 1e-6);
    }

    #[test]
    fn lerp_uses_context_combiner_unless_it_has_its_own() {
        use crate::value::ValueKind;

        fn always_seven(_: &Value, _: &Value, _: f32) -> Value {
            Value::Float(7.0)
        }

        let mut clips = ClipInstanceCache::new();
        let mut values = ValuesStore::default();
        values.set("mix", 0.5);
        let mut low = ManagedTransformSource::new();
        low.set_channel("x", Value::Float(0.0));
        let mut high = ManagedTransformSource::new();
        high.set_channel("x", Value::Float(10.0));
        let lerp = BinaryLerpSource::new(
            SourceTree::Managed(low),
            SourceTree::Managed(high),
            "mix",
        );
        let plain = SourceTree::Lerp(lerp.clone());
        plain.set_time(0.0, &mut clips);

        let mut shared = CombinerRegistry::default();
        shared.register(ValueKind::Float, always_seven);
        let ctx = SourceContext::new(&[], &clips, &values, &shared);
        assert_eq!(plain.source_data(&ctx).unwrap()["x"], Value::Float(7.0));

        let own = SourceTree::Lerp(lerp.with_combiner(CombinerRegistry::default()));
        approx(
            own.source_data(&ctx).unwrap()["x"].as_float().unwrap(),
            5.0,
            1e-5,
        );
    }

    fn limbs() -> Arc<AnimationClip> {
        let pose = crate::clip::TrsSamples {
            times: vec![0.0],
            translations: vec![[1.0, 0.0, 0.0]],
            rotations: vec![[0.0, 0.0, 0.0, 1.0]],
            scales: vec![[1.0; 3]],
        };
        Arc::new(
            AnimationClip::new("limbs")
                .with_channel(AnimationChannel::joint("arm", 1, pose.clone()))
                .unwrap()
                .with_channel(AnimationChannel::joint("leg", 4, pose))
                .unwrap()
                .with_channel(AnimationChannel::float("x", vec![0.0, 1.0], vec![0.0, 1.0]))
                .unwrap()
                .with_channel(AnimationChannel::float("y", vec![0.0, 1.0], vec![0.0, 1.0]))
                .unwrap(),
        )
    }

    #[test]
    fn inclusive_clip_keeps_only_masked_entries() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let tree = SourceTree::InclusiveClip(
            MaskedClipSource::new(limbs())
                .with_channels(["x"])
                .with_joints([1]),
        );
        tree.reset_clips(&mut clips, 0.0);
        assert!(tree.set_time(0.5, &mut clips));
        let data = read_data(&tree, &clips, &values);
        let mut keys: Vec<&str> = data.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["_jnt1", "x"]);
        approx(data["x"].as_float().unwrap(), 0.5, 1e-6);
    }

    #[test]
    fn exclusive_clip_drops_masked_entries() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let mut mask = MaskedClipSource::new(limbs());
        mask.add_channel("x");
        mask.add_joint(4);
        let tree = SourceTree::ExclusiveClip(mask);
        tree.reset_clips(&mut clips, 0.0);
        tree.set_time(0.25, &mut clips);
        let data = read_data(&tree, &clips, &values);
        let mut keys: Vec<&str> = data.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["_jnt1", "y"]);
        assert_eq!(tree.first_clip().unwrap().name, "limbs");
        assert!((tree.local_time(&clips).unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn managed_joint_setters_keep_other_parts() {
        let mut m = ManagedTransformSource::new();
        m.set_joint_translation(2, [1.0, 2.0, 3.0]);
        m.set_joint_scale(2, [2.0; 3]);
        let (t, r, s) = m.data()["_jnt2"].as_transform().unwrap();
        assert_eq!(t, [1.0, 2.0, 3.0]);
        assert_eq!(r, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(s, [2.0; 3]);
    }
}
