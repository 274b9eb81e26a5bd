//! Blending a layer with the layer below it.

use std::fmt::Debug;

use crate::blend::CombinerRegistry;
use crate::context::SourceContext;
use crate::value::SourceData;

/// Combines two layers' data. The manager wires input A to the previous layer and
/// input B to the owning layer before every resolve. Inputs are layer indices, so
/// layers sharing a name stay distinguishable.
pub trait LayerBlender: Debug {
    fn layer_a(&self) -> Option<usize>;
    fn set_layer_a(&mut self, layer: Option<usize>);
    fn layer_b(&self) -> Option<usize>;
    fn set_layer_b(&mut self, layer: Option<usize>);
    fn blend_key(&self) -> &str;
    fn set_blend_key(&mut self, key: String);

    /// Blended data, or `None` when neither input has any.
    fn blended_source_data(&self, ctx: &SourceContext<'_>) -> Option<SourceData>;
}

/// Linear blend `A*(1-w) + B*w`, with `w` read from the values store.
///
/// A is layer A's full (possibly blended) data; B is only layer B's current state,
/// which keeps B's own blender out of the recursion. Without a combiner of its own
/// the blender uses the manager's.
#[derive(Clone, Debug, Default)]
pub struct LerpBlender {
    layer_a: Option<usize>,
    layer_b: Option<usize>,
    blend_key: String,
    combiner: Option<CombinerRegistry>,
}

impl LerpBlender {
    pub fn new(blend_key: impl Into<String>) -> Self {
        Self {
            blend_key: blend_key.into(),
            ..Self::default()
        }
    }

    pub fn with_combiner(mut self, combiner: CombinerRegistry) -> Self {
        self.combiner = Some(combiner);
        self
    }

    /// Own combiner, created empty on first access.
    pub fn combiner_mut(&mut self) -> &mut CombinerRegistry {
        self.combiner.get_or_insert_with(CombinerRegistry::default)
    }
}

impl LayerBlender for LerpBlender {
    fn layer_a(&self) -> Option<usize> {
        self.layer_a
    }

    fn set_layer_a(&mut self, layer: Option<usize>) {
        self.layer_a = layer;
    }

    fn layer_b(&self) -> Option<usize> {
        self.layer_b
    }

    fn set_layer_b(&mut self, layer: Option<usize>) {
        self.layer_b = layer;
    }

    fn blend_key(&self) -> &str {
        &self.blend_key
    }

    fn set_blend_key(&mut self, key: String) {
        self.blend_key = key;
    }

    fn blended_source_data(&self, ctx: &SourceContext<'_>) -> Option<SourceData> {
        let a = self
            .layer_a
            .and_then(|index| ctx.layer(index))
            .and_then(|layer| layer.current_source_data(ctx));
        let b = self
            .layer_b
            .and_then(|index| ctx.layer(index))
            .and_then(|layer| layer.current_state_source_data(ctx));
        let w = ctx.values.get(&self.blend_key) as f32;
        self.combiner
            .as_ref()
            .unwrap_or(ctx.combiner)
            .combine_source_data(a.as_ref(), b.as_ref(), w)
    }
}
