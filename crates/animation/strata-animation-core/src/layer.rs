//! One animation layer: a finite-state machine over named steady states.

use hashbrown::HashMap;
use log::{debug, warn};

use crate::context::{LayerContext, SourceContext};
use crate::error::{AnimationError, Result};
use crate::instance::ClipInstanceCache;
use crate::layer_blend::LayerBlender;
use crate::state::{FiniteState, SteadyState, Transition, TransitionState};
use crate::value::SourceData;

/// Name of the layer every manager creates at index 0.
pub const BASE_LAYER_NAME: &str = "-BASE_LAYER-";

/// Layer-level keyword that matches any trigger without an exact entry.
pub const WILDCARD_KEYWORD: &str = "*";

#[derive(Debug)]
pub struct AnimationLayer {
    name: String,
    steady_states: HashMap<String, SteadyState>,
    transitions: HashMap<String, TransitionState>,
    current_state: Option<FiniteState>,
    attached: bool,
    blender: Option<Box<dyn LayerBlender>>,
}

impl AnimationLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steady_states: HashMap::new(),
            transitions: HashMap::new(),
            current_state: None,
            attached: false,
            blender: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a manager currently owns this layer.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub(crate) fn set_attached(&mut self, attached: bool) {
        self.attached = attached;
    }

    // ---- steady states ----

    /// Add (or replace) a steady state, keyed by its name.
    pub fn add_steady_state(&mut self, state: SteadyState) -> Result<()> {
        if state.name().is_empty() {
            return Err(AnimationError::EmptyStateName);
        }
        if self
            .steady_states
            .insert(state.name().to_string(), state)
            .is_some()
        {
            debug!("layer '{}': replaced a steady state", self.name);
        }
        Ok(())
    }

    pub fn steady_state(&self, name: &str) -> Option<&SteadyState> {
        self.steady_states.get(name)
    }

    pub fn steady_state_mut(&mut self, name: &str) -> Option<&mut SteadyState> {
        self.steady_states.get_mut(name)
    }

    /// Remove a steady state. If the layer is in (or fading to) it, the layer is cleared.
    pub fn remove_steady_state(&mut self, name: &str) -> Option<SteadyState> {
        let removed = self.steady_states.remove(name)?;
        if self
            .current_state
            .as_ref()
            .is_some_and(|s| s.destination() == name)
        {
            debug!("layer '{}': current state '{}' removed", self.name, name);
            self.current_state = None;
        }
        Some(removed)
    }

    pub fn steady_state_names(&self) -> impl Iterator<Item = &str> {
        self.steady_states.keys().map(String::as_str)
    }

    // ---- layer transitions ----

    pub fn add_transition(
        &mut self,
        keyword: impl Into<String>,
        transition: TransitionState,
    ) -> Result<()> {
        let keyword = keyword.into();
        if keyword.is_empty() {
            return Err(AnimationError::EmptyKeyword);
        }
        self.transitions.insert(keyword, transition);
        Ok(())
    }

    pub fn transition(&self, keyword: &str) -> Option<&TransitionState> {
        self.transitions.get(keyword)
    }

    pub fn remove_transition(&mut self, keyword: &str) -> Option<TransitionState> {
        self.transitions.remove(keyword)
    }

    /// Remove the first entry equal to `transition`.
    pub fn remove_transition_state(&mut self, transition: &TransitionState) -> bool {
        let key = self
            .transitions
            .iter()
            .find(|(_, t)| *t == transition)
            .map(|(k, _)| k.clone());
        key.and_then(|k| self.transitions.remove(&k)).is_some()
    }

    pub fn transition_keywords(&self) -> impl Iterator<Item = &str> {
        self.transitions.keys().map(String::as_str)
    }

    /// Exact keyword first, then the wildcard.
    fn layer_transition(&self, keyword: &str) -> Option<&TransitionState> {
        self.transitions
            .get(keyword)
            .or_else(|| self.transitions.get(WILDCARD_KEYWORD))
    }

    // ---- current state ----

    pub fn current_state(&self) -> Option<&FiniteState> {
        self.current_state.as_ref()
    }

    /// The steady state the layer is in, if it is not mid-transition.
    pub fn current_steady_state(&self) -> Option<&SteadyState> {
        let name = self.current_state.as_ref()?.steady_name()?;
        self.steady_states.get(name)
    }

    /// Enter the steady state `name`. Unknown names are logged and ignored.
    pub fn set_current_state(&mut self, name: &str, rewind: bool, ctx: &mut LayerContext<'_>) -> bool {
        if !self.steady_states.contains_key(name) {
            warn!(
                "layer '{}' has no steady state named '{}'; state unchanged",
                self.name, name
            );
            return false;
        }
        self.set_current_finite_state(Some(FiniteState::steady(name)), rewind, ctx);
        true
    }

    /// Replace the current state unconditionally; `None` clears the layer.
    pub fn set_current_finite_state(
        &mut self,
        state: Option<FiniteState>,
        rewind: bool,
        ctx: &mut LayerContext<'_>,
    ) {
        if rewind {
            if let Some(state) = &state {
                state.reset_clips(&self.steady_states, ctx.clips, ctx.time);
            }
        }
        debug!(
            "layer '{}': current state set to {:?}",
            self.name,
            state.as_ref().map(FiniteState::destination)
        );
        self.current_state = state;
    }

    pub fn clear_current_state(&mut self) {
        self.current_state = None;
    }

    /// Swap `current` for `new` if `current` is still the active state.
    pub fn replace_state(&mut self, current: &FiniteState, new: Option<FiniteState>) -> bool {
        if self.current_state.as_ref() != Some(current) {
            return false;
        }
        self.current_state = new;
        true
    }

    /// Fire `keyword`. Lookup order: the current steady state's own table, the
    /// layer's exact entry, then the layer's wildcard. A rule that resolves to
    /// nothing (unknown target, or outside its time window) passes the keyword on
    /// to the next table; an ignore rule keeps it.
    ///
    /// Returns true only when the layer ends up in a different state.
    pub fn do_transition(&mut self, keyword: &str, ctx: &mut LayerContext<'_>) -> bool {
        let now = ctx.time;
        let clips: &ClipInstanceCache = ctx.clips;
        let states = &self.steady_states;

        let resolved = match self.current_state.as_ref() {
            None => self
                .layer_transition(keyword)
                .and_then(|t| t.resolve(None, states, clips, now)),
            Some(FiniteState::Fade(_)) => {
                debug!(
                    "layer '{}': '{}' ignored while a fade is running",
                    self.name, keyword
                );
                return false;
            }
            Some(current) => current
                .steady_name()
                .and_then(|name| states.get(name))
                .and_then(|s| s.transition(keyword))
                .and_then(|t| t.resolve(Some(current), states, clips, now))
                .or_else(|| {
                    self.layer_transition(keyword)
                        .and_then(|t| t.resolve(Some(current), states, clips, now))
                }),
        };

        let Some(transition) = resolved else {
            return false;
        };
        if self.current_state.as_ref() == Some(&transition.next) {
            return false;
        }
        debug!(
            "layer '{}': '{}' -> {}",
            self.name,
            keyword,
            transition.next.destination()
        );
        self.enter(transition, ctx);
        true
    }

    fn enter(&mut self, transition: Transition, ctx: &mut LayerContext<'_>) {
        if let Some(start) = transition.rewind_at {
            transition
                .next
                .reset_clips(&self.steady_states, ctx.clips, start);
        }
        self.current_state = Some(transition.next);
    }

    // ---- blending ----

    pub fn layer_blender(&self) -> Option<&dyn LayerBlender> {
        self.blender.as_deref()
    }

    pub fn layer_blender_mut(&mut self) -> Option<&mut (dyn LayerBlender + 'static)> {
        self.blender.as_deref_mut()
    }

    pub fn set_layer_blender(&mut self, blender: Option<Box<dyn LayerBlender>>) {
        self.blender = blender;
    }

    /// Point the blender at the layer at index `previous` (input A) and at this
    /// layer, sitting at index `own` (input B). The base layer has no predecessor
    /// and blends against nothing.
    pub fn update_layer_blending(&mut self, previous: Option<usize>, own: usize) {
        if let Some(blender) = self.blender.as_deref_mut() {
            blender.set_layer_a(previous);
            blender.set_layer_b(Some(own));
        }
    }

    /// This layer's output: the blender's result when one is attached, else the
    /// current state's data.
    pub fn current_source_data(&self, ctx: &SourceContext<'_>) -> Option<SourceData> {
        match &self.blender {
            Some(blender) => blender.blended_source_data(ctx),
            None => self.current_state_source_data(ctx),
        }
    }

    /// Data of the current state alone, ignoring any blender.
    pub fn current_state_source_data(&self, ctx: &SourceContext<'_>) -> Option<SourceData> {
        self.current_state
            .as_ref()?
            .source_data(&self.steady_states, ctx)
    }

    // ---- per tick ----

    /// Advance the current state to `ctx.time`, taking a finished steady state's
    /// end transition.
    pub(crate) fn update(&mut self, ctx: &mut LayerContext<'_>) {
        let time = ctx.time;
        let name = match self.current_state.as_mut() {
            None => return,
            Some(FiniteState::Steady(name)) => name.clone(),
            Some(fading) => {
                fading.advance(time, &self.steady_states, ctx.clips);
                return;
            }
        };

        let Some(state) = self.steady_states.get(&name) else {
            return;
        };
        if state.source().set_time(time, ctx.clips) {
            return;
        }
        let Some(end) = state.end_transition() else {
            return;
        };

        let current = FiniteState::Steady(name);
        let Some(transition) = end.resolve(Some(&current), &self.steady_states, ctx.clips, time)
        else {
            return;
        };
        if let Some(start) = transition.rewind_at {
            transition
                .next
                .reset_clips(&self.steady_states, ctx.clips, start);
        }
        let mut next = transition.next;
        next.advance(time, &self.steady_states, ctx.clips);
        if next != current {
            debug!(
                "layer '{}': '{}' finished -> {}",
                self.name,
                current.destination(),
                next.destination()
            );
        }
        self.current_state = Some(next);
    }

    /// Settle the current state after appliers ran: drop a finished steady state
    /// without an end transition, and land a completed fade on its target.
    pub(crate) fn post_update(&mut self, clips: &ClipInstanceCache) {
        let next = match &self.current_state {
            Some(FiniteState::Steady(name)) => match self.steady_states.get(name.as_str()) {
                Some(s) if !s.source().is_active(clips) && s.end_transition().is_none() => {
                    debug!("layer '{}': '{}' finished; layer cleared", self.name, name);
                    None
                }
                _ => return,
            },
            Some(FiniteState::Fade(fade)) if fade.is_complete() => {
                Some(FiniteState::steady(fade.target()))
            }
            _ => return,
        };
        self.current_state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ManagedTransformSource, SourceTree};
    use crate::values_store::ValuesStore;

    fn managed(name: &str) -> SteadyState {
        SteadyState::new(name, SourceTree::Managed(ManagedTransformSource::new()))
    }

    #[test]
    fn empty_names_and_keywords_are_rejected() {
        let mut layer = AnimationLayer::new("L");
        assert_eq!(
            layer.add_steady_state(managed("")),
            Err(AnimationError::EmptyStateName)
        );
        assert_eq!(
            layer.add_transition("", TransitionState::ignore()),
            Err(AnimationError::EmptyKeyword)
        );
    }

    #[test]
    fn unknown_state_name_is_a_soft_miss() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let mut ctx = LayerContext::new(&mut clips, &values, 0.0);
        let mut layer = AnimationLayer::new("L");
        layer.add_steady_state(managed("Idle")).unwrap();
        assert!(!layer.set_current_state("Nope", true, &mut ctx));
        assert!(layer.current_state().is_none());
        assert!(layer.set_current_state("Idle", true, &mut ctx));
        assert_eq!(layer.current_steady_state().unwrap().name(), "Idle");
    }

    #[test]
    fn removing_current_state_clears_layer() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let mut ctx = LayerContext::new(&mut clips, &values, 0.0);
        let mut layer = AnimationLayer::new("L");
        layer.add_steady_state(managed("Idle")).unwrap();
        layer.set_current_state("Idle", false, &mut ctx);
        assert!(layer.remove_steady_state("Idle").is_some());
        assert!(layer.current_state().is_none());
        assert!(layer.remove_steady_state("Idle").is_none());
    }

    #[test]
    fn state_ignore_keeps_keyword_from_layer_table() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let mut ctx = LayerContext::new(&mut clips, &values, 0.0);
        let mut layer = AnimationLayer::new("L");
        let mut idle = managed("Idle");
        idle.add_transition("go", TransitionState::ignore()).unwrap();
        layer.add_steady_state(idle).unwrap();
        layer.add_steady_state(managed("Run")).unwrap();
        layer
            .add_transition(WILDCARD_KEYWORD, TransitionState::immediate("Run"))
            .unwrap();
        layer.set_current_state("Idle", false, &mut ctx);

        assert!(!layer.do_transition("go", &mut ctx));
        assert_eq!(layer.current_steady_state().unwrap().name(), "Idle");
        assert!(layer.do_transition("other", &mut ctx));
        assert_eq!(layer.current_steady_state().unwrap().name(), "Run");
    }

    #[test]
    fn unknown_target_falls_through_to_layer_table() {
        let mut clips = ClipInstanceCache::new();
        let values = ValuesStore::default();
        let mut ctx = LayerContext::new(&mut clips, &values, 0.0);
        let mut layer = AnimationLayer::new("L");
        let mut idle = managed("Idle");
        idle.add_transition("go", TransitionState::immediate("Missing"))
            .unwrap();
        layer.add_steady_state(idle).unwrap();
        layer.add_steady_state(managed("Run")).unwrap();
        layer
            .add_transition("go", TransitionState::immediate("Run"))
            .unwrap();
        layer.set_current_state("Idle", false, &mut ctx);

        assert!(layer.do_transition("go", &mut ctx));
        assert_eq!(layer.current_steady_state().unwrap().name(), "Run");
    }

    #[test]
    fn replace_state_checks_identity() {
        let mut layer = AnimationLayer::new("L");
        let idle = FiniteState::steady("Idle");
        assert!(!layer.replace_state(&idle, None));
        layer.current_state = Some(idle.clone());
        assert!(!layer.replace_state(&FiniteState::steady("Run"), None));
        assert!(layer.replace_state(&idle, Some(FiniteState::steady("Run"))));
        assert_eq!(layer.current_state(), Some(&FiniteState::steady("Run")));
    }
}
