//! Borrowed views of manager state handed to layers, states and sources.
//!
//! Layers never hold a pointer back to their manager. Whatever they need from it
//! is lent for the duration of a call through one of these views.

use crate::blend::CombinerRegistry;
use crate::instance::ClipInstanceCache;
use crate::layer::AnimationLayer;
use crate::values_store::ValuesStore;

/// Read-only view used while resolving source data.
#[derive(Clone, Copy)]
pub struct SourceContext<'a> {
    /// The manager's layers in order; empty when resolving outside a manager.
    pub layers: &'a [AnimationLayer],
    pub clips: &'a ClipInstanceCache,
    pub values: &'a ValuesStore,
    /// Combiners for fades and blends that do not carry their own.
    pub combiner: &'a CombinerRegistry,
}

impl<'a> SourceContext<'a> {
    pub fn new(
        layers: &'a [AnimationLayer],
        clips: &'a ClipInstanceCache,
        values: &'a ValuesStore,
        combiner: &'a CombinerRegistry,
    ) -> Self {
        Self {
            layers,
            clips,
            values,
            combiner,
        }
    }

    /// Layer at `index` in manager order.
    pub fn layer(&self, index: usize) -> Option<&'a AnimationLayer> {
        self.layers.get(index)
    }
}

/// Mutable view used by state changes and per-tick updates.
pub struct LayerContext<'a> {
    pub clips: &'a mut ClipInstanceCache,
    pub values: &'a ValuesStore,
    /// Animation time of the call: the global time, or the pause timestamp while paused.
    pub time: f64,
}

impl<'a> LayerContext<'a> {
    pub fn new(clips: &'a mut ClipInstanceCache, values: &'a ValuesStore, time: f64) -> Self {
        Self {
            clips,
            values,
            time,
        }
    }
}
