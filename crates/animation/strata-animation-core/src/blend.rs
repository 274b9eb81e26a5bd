//! Blending utilities for [`Value`]s and whole [`SourceData`] maps.
//! - f32 linear interpolation for floats and vector components
//! - quaternion slerp (shortest-arc)
//! - transform TRS blending (translation/scale lerp, rotation slerp)
//! - elementwise blending for generic Vector
//! - step blending for Bool/Text/Trigger and mismatched kinds (left for t < 0.5, else right)

use hashbrown::HashMap;

use crate::value::{SourceData, Value, ValueKind, IDENTITY_ROTATION};

/// Linear interpolation written as `a*(1-t) + b*t` so both endpoints are exact.
#[inline]
pub(crate) fn lerp_f(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

pub(crate) fn lerp_array<const N: usize>(a: &[f32; N], b: &[f32; N], t: f32) -> [f32; N] {
    let mut out = [0.0f32; N];
    for i in 0..N {
        out[i] = lerp_f(a[i], b[i], t);
    }
    out
}

/// Normalize a quaternion represented as [x,y,z,w]
pub(crate) fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let mag = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if mag == 0.0 {
        IDENTITY_ROTATION
    } else {
        [q[0] / mag, q[1] / mag, q[2] / mag, q[3] / mag]
    }
}

/// Slerp between two quaternions along the shortest arc.
pub(crate) fn slerp(q1: [f32; 4], q2: [f32; 4], t: f32) -> [f32; 4] {
    let qa = normalize_quat(q1);
    let mut qb = normalize_quat(q2);

    let mut dot = qa[0] * qb[0] + qa[1] * qb[1] + qa[2] * qb[2] + qa[3] * qb[3];

    // Take the short path.
    if dot < 0.0 {
        qb = [-qb[0], -qb[1], -qb[2], -qb[3]];
        dot = -dot;
    }

    // Nearly parallel: nlerp is stable and indistinguishable.
    const DOT_THRESHOLD: f32 = 0.9995;
    if dot > DOT_THRESHOLD {
        return normalize_quat(lerp_array(&qa, &qb, t));
    }

    let theta_0 = dot.clamp(-1.0, 1.0).acos();
    let theta = theta_0 * t;
    let sin_theta_0 = theta_0.sin();

    let s0 = (theta_0 - theta).sin() / sin_theta_0;
    let s1 = theta.sin() / sin_theta_0;

    [
        s0 * qa[0] + s1 * qb[0],
        s0 * qa[1] + s1 * qb[1],
        s0 * qa[2] + s1 * qb[2],
        s0 * qa[3] + s1 * qb[3],
    ]
}

/// Blend two generic vectors elementwise. If lengths differ, missing elements count as 0.0.
fn blend_vector(a: &[f32], b: &[f32], t: f32) -> Vec<f32> {
    let n = a.len().max(b.len());
    (0..n)
        .map(|i| {
            let ai = a.get(i).copied().unwrap_or(0.0);
            let bi = b.get(i).copied().unwrap_or(0.0);
            lerp_f(ai, bi, t)
        })
        .collect()
}

/// Step blending for step-only types: choose a for t < 0.5, else b.
pub fn step_blend(a: &Value, b: &Value, t: f32) -> Value {
    if t < 0.5 {
        a.clone()
    } else {
        b.clone()
    }
}

/// Blend two values of the same kind. Mismatched kinds and step-only kinds use
/// [`step_blend`].
pub fn blend_values(a: &Value, b: &Value, t: f32) -> Value {
    match (a, b) {
        (Value::Float(af), Value::Float(bf)) => Value::Float(lerp_f(*af, *bf, t)),

        (Value::Vec2(aa), Value::Vec2(bb)) => Value::Vec2(lerp_array(aa, bb, t)),
        (Value::Vec3(aa), Value::Vec3(bb)) => Value::Vec3(lerp_array(aa, bb, t)),
        (Value::Vec4(aa), Value::Vec4(bb)) => Value::Vec4(lerp_array(aa, bb, t)),

        (Value::ColorRgba(ac), Value::ColorRgba(bc)) => Value::ColorRgba(lerp_array(ac, bc, t)),

        (Value::Quat(aq), Value::Quat(bq)) => Value::Quat(slerp(*aq, *bq, t)),

        (
            Value::Transform {
                translation: ap,
                rotation: ar,
                scale: ascale,
            },
            Value::Transform {
                translation: bp,
                rotation: br,
                scale: bscale,
            },
        ) => Value::Transform {
            translation: lerp_array(ap, bp, t),
            rotation: slerp(*ar, *br, t),
            scale: lerp_array(ascale, bscale, t),
        },

        (Value::Vector(va), Value::Vector(vb)) => Value::Vector(blend_vector(va, vb, t)),

        _ => step_blend(a, b, t),
    }
}

/// Per-kind combiner used in place of [`blend_values`].
pub type CombineFn = fn(&Value, &Value, f32) -> Value;

/// Dispatches value combination by [`ValueKind`], falling back to [`blend_values`].
///
/// Weights of exactly `0.0` and `1.0` short-circuit to the left and right value, so
/// custom combiners never see the endpoints.
#[derive(Clone, Debug, Default)]
pub struct CombinerRegistry {
    overrides: HashMap<ValueKind, CombineFn>,
}

impl CombinerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a combiner for `kind`, returning the one it replaces.
    pub fn register(&mut self, kind: ValueKind, combine: CombineFn) -> Option<CombineFn> {
        self.overrides.insert(kind, combine)
    }

    pub fn unregister(&mut self, kind: ValueKind) -> Option<CombineFn> {
        self.overrides.remove(&kind)
    }

    pub fn combine(&self, a: &Value, b: &Value, w: f32) -> Value {
        if w == 0.0 {
            return a.clone();
        }
        if w == 1.0 {
            return b.clone();
        }
        if a.kind() == b.kind() {
            if let Some(combine) = self.overrides.get(&a.kind()) {
                return combine(a, b, w);
            }
        }
        blend_values(a, b, w)
    }

    /// Combine two optional channel maps.
    ///
    /// Channels present on both sides are combined with weight `w` (towards `b`).
    /// Channels present on only one side pass through unweighted. If one side is
    /// missing entirely the other side is returned as is.
    pub fn combine_source_data(
        &self,
        a: Option<&SourceData>,
        b: Option<&SourceData>,
        w: f32,
    ) -> Option<SourceData> {
        match (a, b) {
            (None, None) => None,
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (Some(a), Some(b)) => {
                let mut out = SourceData::with_capacity(a.len().max(b.len()));
                for (key, va) in a.iter() {
                    let value = match b.get(key) {
                        Some(vb) => self.combine(va, vb, w),
                        None => va.clone(),
                    };
                    out.insert(key.clone(), value);
                }
                for (key, vb) in b.iter() {
                    if !a.contains_key(key) {
                        out.insert(key.clone(), vb.clone());
                    }
                }
                Some(out)
            }
        }
    }
}
