//! Animation clips and channel sampling.
//!
//! Model:
//! - A clip is a named list of channels; clips are shared as `Arc<AnimationClip>`.
//! - Every channel holds ascending sample times (clip-local seconds) and one sample per time.
//! - Sampling before the first time, or on a single-sample channel, yields sample 0.
//!   At or past the last time it yields the last sample. In between, the bracketing
//!   samples are interpolated: translation/scale/float lerp, rotation slerp.
//! - Joint channels are published under `"_jnt{index}"` so appliers can route them
//!   to skeleton joints without a name table.
//! - Trigger channels are not interpolated: they publish a [`TriggerData`] naming the
//!   keys fired since the previous sample written into the same output map.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::blend::{lerp_array, lerp_f, slerp};
use crate::error::{AnimationError, Result};
use crate::value::{SourceData, TriggerData, Value};

const JOINT_CHANNEL_PREFIX: &str = "_jnt";

/// Source-data key for joint `index`.
pub fn joint_channel_name(index: usize) -> String {
    format!("{JOINT_CHANNEL_PREFIX}{index}")
}

/// Inverse of [`joint_channel_name`].
pub fn parse_joint_channel_name(name: &str) -> Option<usize> {
    name.strip_prefix(JOINT_CHANNEL_PREFIX)?.parse().ok()
}

/// Locate `t` among ascending sample times. Returns `(left, right, progress)`;
/// `left == right` means "take that sample as is".
fn locate(times: &[f32], t: f64) -> Option<(usize, usize, f32)> {
    let n = times.len();
    if n == 0 {
        return None;
    }
    if n == 1 || t < 0.0 || t <= times[0] as f64 {
        return Some((0, 0, 0.0));
    }
    let last = n - 1;
    if t >= times[last] as f64 {
        return Some((last, last, 0.0));
    }
    // times[0] < t < times[last], so 1 <= right <= last
    let right = times.partition_point(|&x| (x as f64) <= t);
    let left = right - 1;
    let (t0, t1) = (times[left] as f64, times[right] as f64);
    let progress = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
    Some((left, right, progress as f32))
}

/// Index of the last key at or before `t`; `None` before the first key.
fn key_index(times: &[f32], t: f64) -> Option<usize> {
    times.partition_point(|&x| (x as f64) <= t).checked_sub(1)
}

fn check_times(channel: &str, times: &[f32]) -> Result<()> {
    if times.windows(2).any(|w| w[1] < w[0]) {
        return Err(AnimationError::invalid_channel(
            channel,
            "sample times must be non-decreasing",
        ));
    }
    Ok(())
}

fn check_len(channel: &str, what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(AnimationError::invalid_channel(
            channel,
            format!("{what} has {actual} samples, times has {expected}"),
        ));
    }
    Ok(())
}

/// Translation/rotation/scale tracks sharing one time base.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrsSamples {
    pub times: Vec<f32>,
    pub translations: Vec<[f32; 3]>,
    /// Quaternions (x, y, z, w)
    pub rotations: Vec<[f32; 4]>,
    pub scales: Vec<[f32; 3]>,
}

impl TrsSamples {
    fn validate(&self, channel: &str) -> Result<()> {
        let n = self.times.len();
        if n == 0 {
            return Err(AnimationError::invalid_channel(channel, "no samples"));
        }
        check_len(channel, "translations", n, self.translations.len())?;
        check_len(channel, "rotations", n, self.rotations.len())?;
        check_len(channel, "scales", n, self.scales.len())?;
        check_times(channel, &self.times)
    }

    /// Transform at sample `index`, if it exists.
    pub fn frame_at(&self, index: usize) -> Option<Value> {
        Some(Value::transform(
            *self.translations.get(index)?,
            *self.rotations.get(index)?,
            *self.scales.get(index)?,
        ))
    }

    pub fn sample(&self, t: f64) -> Option<Value> {
        let (i0, i1, p) = locate(&self.times, t)?;
        if i0 == i1 || p == 0.0 {
            return self.frame_at(i0);
        }
        let (t0, r0, s0) = self.frame_at(i0)?.as_transform()?;
        let (t1, r1, s1) = self.frame_at(i1)?.as_transform()?;
        Some(Value::Transform {
            translation: lerp_array(&t0, &t1, p),
            rotation: slerp(r0, r1, p),
            scale: lerp_array(&s0, &s1, p),
        })
    }

    fn max_time(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }
}

/// Named transform channel (non-skeletal targets).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformChannel {
    pub name: String,
    #[serde(flatten)]
    pub samples: TrsSamples,
}

/// Transform channel bound to a skeleton joint by index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JointChannel {
    #[serde(default)]
    pub joint_name: String,
    pub joint_index: usize,
    #[serde(flatten)]
    pub samples: TrsSamples,
}

/// Scalar channel (morph weights, blend parameters, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FloatChannel {
    pub name: String,
    pub times: Vec<f32>,
    pub values: Vec<f32>,
}

impl FloatChannel {
    pub fn sample(&self, t: f64) -> Option<Value> {
        let (i0, i1, p) = locate(&self.times, t)?;
        let v0 = *self.values.get(i0)?;
        let v = if i0 == i1 {
            v0
        } else {
            lerp_f(v0, *self.values.get(i1)?, p)
        };
        Some(Value::Float(v))
    }
}

/// Named events placed on the clip timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerChannel {
    pub name: String,
    pub times: Vec<f32>,
    pub keys: Vec<String>,
    /// Fire every key passed since the previous sample, not just the latest one.
    #[serde(default)]
    pub guaranteed: bool,
}

impl TriggerChannel {
    /// Sample at `t` given the value this channel published last time.
    ///
    /// The result is armed only when a different key than `previous` was reached.
    /// Going back to an earlier key means the clip wrapped; a guaranteed channel then
    /// fires the tail of the key list followed by its head.
    pub fn sample(&self, t: f64, previous: Option<&TriggerData>) -> TriggerData {
        let Some(index) = key_index(&self.times, t) else {
            return TriggerData::default();
        };
        let last = previous.and_then(|p| p.index);
        if last == Some(index) {
            return TriggerData {
                index: Some(index),
                keys: Vec::new(),
                armed: false,
            };
        }
        let keys = if self.guaranteed {
            let crossed: Vec<usize> = match last {
                Some(prev) if prev < index => (prev + 1..=index).collect(),
                Some(prev) => (prev + 1..self.keys.len()).chain(0..=index).collect(),
                None => (0..=index).collect(),
            };
            crossed
                .into_iter()
                .filter_map(|i| self.keys.get(i).cloned())
                .collect()
        } else {
            self.keys.get(index).cloned().into_iter().collect()
        };
        TriggerData {
            index: Some(index),
            keys,
            armed: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnimationChannel {
    Transform(TransformChannel),
    Joint(JointChannel),
    Float(FloatChannel),
    Trigger(TriggerChannel),
}

impl AnimationChannel {
    pub fn transform(name: impl Into<String>, samples: TrsSamples) -> Self {
        Self::Transform(TransformChannel {
            name: name.into(),
            samples,
        })
    }

    pub fn joint(joint_name: impl Into<String>, joint_index: usize, samples: TrsSamples) -> Self {
        Self::Joint(JointChannel {
            joint_name: joint_name.into(),
            joint_index,
            samples,
        })
    }

    pub fn float(name: impl Into<String>, times: Vec<f32>, values: Vec<f32>) -> Self {
        Self::Float(FloatChannel {
            name: name.into(),
            times,
            values,
        })
    }

    pub fn trigger(name: impl Into<String>, times: Vec<f32>, keys: Vec<String>) -> Self {
        Self::Trigger(TriggerChannel {
            name: name.into(),
            times,
            keys,
            guaranteed: false,
        })
    }

    pub fn guaranteed_trigger(
        name: impl Into<String>,
        times: Vec<f32>,
        keys: Vec<String>,
    ) -> Self {
        Self::Trigger(TriggerChannel {
            name: name.into(),
            times,
            keys,
            guaranteed: true,
        })
    }

    /// Key under which this channel's samples appear in [`SourceData`].
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            AnimationChannel::Transform(c) => Cow::Borrowed(&c.name),
            AnimationChannel::Joint(c) => Cow::Owned(joint_channel_name(c.joint_index)),
            AnimationChannel::Float(c) => Cow::Borrowed(&c.name),
            AnimationChannel::Trigger(c) => Cow::Borrowed(&c.name),
        }
    }

    pub fn max_time(&self) -> f32 {
        match self {
            AnimationChannel::Transform(c) => c.samples.max_time(),
            AnimationChannel::Joint(c) => c.samples.max_time(),
            AnimationChannel::Float(c) => c.times.last().copied().unwrap_or(0.0),
            AnimationChannel::Trigger(c) => c.times.last().copied().unwrap_or(0.0),
        }
    }

    /// Sample at `t`. Trigger channels are sampled without history here, so any
    /// reached key reads as freshly fired.
    pub fn sample(&self, t: f64) -> Option<Value> {
        match self {
            AnimationChannel::Transform(c) => c.samples.sample(t),
            AnimationChannel::Joint(c) => c.samples.sample(t),
            AnimationChannel::Float(c) => c.sample(t),
            AnimationChannel::Trigger(c) => Some(Value::Trigger(c.sample(t, None))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.name();
        match self {
            AnimationChannel::Transform(c) => c.samples.validate(&name),
            AnimationChannel::Joint(c) => c.samples.validate(&name),
            AnimationChannel::Float(c) => {
                if c.times.is_empty() {
                    return Err(AnimationError::invalid_channel(&name, "no samples"));
                }
                check_len(&name, "values", c.times.len(), c.values.len())?;
                check_times(&name, &c.times)
            }
            AnimationChannel::Trigger(c) => {
                if c.times.is_empty() {
                    return Err(AnimationError::invalid_channel(&name, "no keys"));
                }
                check_len(&name, "keys", c.times.len(), c.keys.len())?;
                check_times(&name, &c.times)
            }
        }
    }
}

/// Immutable animation data, shared between managers as `Arc<AnimationClip>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnimationClip {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<AnimationChannel>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: Vec::new(),
        }
    }

    /// Builder-style channel append; validates the channel.
    pub fn with_channel(mut self, channel: AnimationChannel) -> Result<Self> {
        self.add_channel(channel)?;
        Ok(self)
    }

    pub fn add_channel(&mut self, channel: AnimationChannel) -> Result<()> {
        channel.validate()?;
        self.channels.push(channel);
        Ok(())
    }

    pub fn remove_channel(&mut self, name: &str) -> Option<AnimationChannel> {
        let idx = self.channels.iter().position(|c| c.name() == name)?;
        Some(self.channels.remove(idx))
    }

    pub fn channel(&self, name: &str) -> Option<&AnimationChannel> {
        self.channels.iter().find(|c| c.name() == name)
    }

    pub fn joint_channel(&self, joint_index: usize) -> Option<&JointChannel> {
        self.channels.iter().find_map(|c| match c {
            AnimationChannel::Joint(j) if j.joint_index == joint_index => Some(j),
            _ => None,
        })
    }

    /// Length of the clip in local seconds: the latest final sample time of any channel.
    pub fn max_time(&self) -> f32 {
        self.channels
            .iter()
            .map(AnimationChannel::max_time)
            .fold(0.0, f32::max)
    }

    pub fn validate(&self) -> Result<()> {
        self.channels.iter().try_for_each(AnimationChannel::validate)
    }

    /// Sample every channel at `local_time`, overwriting entries in `out`.
    ///
    /// Trigger channels compare against the trigger value already in `out`, so `out`
    /// should be the same map from one sample to the next.
    pub fn sample_into(&self, local_time: f64, out: &mut SourceData) {
        for channel in &self.channels {
            let name = channel.name();
            let value = match channel {
                AnimationChannel::Trigger(c) => {
                    let previous = out.get(name.as_ref()).and_then(Value::as_trigger);
                    Value::Trigger(c.sample(local_time, previous))
                }
                _ => match channel.sample(local_time) {
                    Some(value) => value,
                    None => continue,
                },
            };
            match out.get_mut(name.as_ref()) {
                Some(slot) => *slot = value,
                None => {
                    out.insert(name.into_owned(), value);
                }
            }
        }
    }
}
