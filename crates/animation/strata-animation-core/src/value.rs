//! Per-channel values produced by sources and consumed by blenders and appliers.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Per-channel data keyed by channel name. This is what states, layers and
/// blenders hand to each other.
pub type SourceData = HashMap<String, Value>;

pub const IDENTITY_ROTATION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Quat,
    ColorRgba,
    Transform,
    Vector,
    Bool,
    Text,
    Trigger,
}

/// Output of a trigger channel.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerData {
    /// Last key reached, `None` before the first one.
    pub index: Option<usize>,
    /// Keys fired on reaching `index`.
    pub keys: Vec<String>,
    /// Set only on the sample that reached `index`.
    pub armed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Value {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// Quaternion (x, y, z, w)
    Quat([f32; 4]),
    ColorRgba([f32; 4]),
    /// Joint/local transform split to TRS
    Transform {
        translation: [f32; 3],
        rotation: [f32; 4], // quat (x,y,z,w)
        scale: [f32; 3],
    },
    /// Variable-length float vector, blended elementwise
    Vector(Vec<f32>),
    /// Step-only boolean value (no blending)
    Bool(bool),
    /// Step-only string/text value (no blending)
    Text(String),
    /// Step-only trigger state (no blending)
    Trigger(TriggerData),
}

impl Value {
    #[inline]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Float(_) => ValueKind::Float,
            Value::Vec2(_) => ValueKind::Vec2,
            Value::Vec3(_) => ValueKind::Vec3,
            Value::Vec4(_) => ValueKind::Vec4,
            Value::Quat(_) => ValueKind::Quat,
            Value::ColorRgba(_) => ValueKind::ColorRgba,
            Value::Transform { .. } => ValueKind::Transform,
            Value::Vector(_) => ValueKind::Vector,
            Value::Bool(_) => ValueKind::Bool,
            Value::Text(_) => ValueKind::Text,
            Value::Trigger(_) => ValueKind::Trigger,
        }
    }

    pub fn transform(translation: [f32; 3], rotation: [f32; 4], scale: [f32; 3]) -> Self {
        Value::Transform {
            translation,
            rotation,
            scale,
        }
    }

    pub fn identity_transform() -> Self {
        Value::transform([0.0; 3], IDENTITY_ROTATION, [1.0; 3])
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_trigger(&self) -> Option<&TriggerData> {
        match self {
            Value::Trigger(t) => Some(t),
            _ => None,
        }
    }

    /// TRS parts of a transform value.
    pub fn as_transform(&self) -> Option<([f32; 3], [f32; 4], [f32; 3])> {
        match self {
            Value::Transform {
                translation,
                rotation,
                scale,
            } => Some((*translation, *rotation, *scale)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_type_and_data_tags() {
        let v = Value::Float(0.5);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"type":"Float","data":0.5}"#);

        let t: Value = serde_json::from_str(
            r#"{"type":"Transform","data":{"translation":[1,2,3],"rotation":[0,0,0,1],"scale":[1,1,1]}}"#,
        )
        .unwrap();
        assert_eq!(t.kind(), ValueKind::Transform);
        assert_eq!(t.as_transform().unwrap().0, [1.0, 2.0, 3.0]);

        let fired: Value = serde_json::from_str(
            r#"{"type":"Trigger","data":{"index":1,"keys":["step"],"armed":true}}"#,
        )
        .unwrap();
        assert_eq!(fired.kind(), ValueKind::Trigger);
        assert_eq!(fired.as_trigger().unwrap().keys, vec!["step".to_string()]);
    }
}
