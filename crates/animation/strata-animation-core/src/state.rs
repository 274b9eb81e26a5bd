//! Finite states of an animation layer and the rules that move between them.
//!
//! - [`SteadyState`]: a named state playing a [`SourceTree`], with its own keyword
//!   table and an optional end transition taken when the tree finishes.
//! - [`FiniteState`]: what a layer is currently in; either one of its steady states
//!   (by name) or a transient [`FadeState`] produced by a transition.
//! - [`TransitionState`]: a stateless rule mapping the current state to the next,
//!   optionally limited to a window of the current state's clip-local time.

use hashbrown::HashMap;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::context::SourceContext;
use crate::error::{AnimationError, Result};
use crate::instance::ClipInstanceCache;
use crate::source::SourceTree;
use crate::value::SourceData;

/// Shaping curve applied to a fade's linear progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendType {
    #[default]
    Linear,
    /// 3t² − 2t³
    SCurve3,
    /// 6t⁵ − 15t⁴ + 10t³
    SCurve5,
}

impl BlendType {
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            BlendType::Linear => t,
            BlendType::SCurve3 => t * t * (3.0 - 2.0 * t),
            BlendType::SCurve5 => t * t * t * (t * (6.0 * t - 15.0) + 10.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeKind {
    /// Target restarts now; source keeps playing.
    Fade,
    /// Target takes the source's start time; source keeps playing.
    SyncFade,
    /// Target restarts now; source holds its pose.
    Frozen,
}

/// Cross-fade in progress from some prior state to a steady state.
#[derive(Clone, Debug, PartialEq)]
pub struct FadeState {
    from: Option<Box<FiniteState>>,
    target: String,
    fade_time: f64,
    blend_type: BlendType,
    kind: FadeKind,
    start_time: f64,
    percent: f64,
}

impl FadeState {
    pub fn from_state(&self) -> Option<&FiniteState> {
        self.from.as_deref()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn fade_time(&self) -> f64 {
        self.fade_time
    }

    pub fn blend_type(&self) -> BlendType {
        self.blend_type
    }

    pub fn kind(&self) -> FadeKind {
        self.kind
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Linear progress in [0, 1] as of the last update.
    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn is_complete(&self) -> bool {
        self.percent >= 1.0
    }

    fn update(
        &mut self,
        time: f64,
        states: &HashMap<String, SteadyState>,
        clips: &mut ClipInstanceCache,
    ) {
        if self.kind != FadeKind::Frozen {
            if let Some(from) = self.from.as_deref_mut() {
                from.advance(time, states, clips);
            }
        }
        if let Some(target) = states.get(&self.target) {
            target.source().set_time(time, clips);
        }
        self.percent = if self.fade_time <= 0.0 {
            1.0
        } else {
            ((time - self.start_time) / self.fade_time).clamp(0.0, 1.0)
        };
    }
}

/// The state a layer is in.
#[derive(Clone, Debug, PartialEq)]
pub enum FiniteState {
    /// One of the layer's steady states, by name.
    Steady(String),
    Fade(FadeState),
}

impl FiniteState {
    pub fn steady(name: impl Into<String>) -> Self {
        FiniteState::Steady(name.into())
    }

    pub fn steady_name(&self) -> Option<&str> {
        match self {
            FiniteState::Steady(name) => Some(name.as_str()),
            FiniteState::Fade(_) => None,
        }
    }

    pub fn as_fade(&self) -> Option<&FadeState> {
        match self {
            FiniteState::Fade(fade) => Some(fade),
            FiniteState::Steady(_) => None,
        }
    }

    /// Steady state this state is, or is heading towards.
    pub fn destination(&self) -> &str {
        match self {
            FiniteState::Steady(name) => name,
            FiniteState::Fade(fade) => &fade.target,
        }
    }

    pub(crate) fn advance(
        &mut self,
        time: f64,
        states: &HashMap<String, SteadyState>,
        clips: &mut ClipInstanceCache,
    ) {
        match self {
            FiniteState::Steady(name) => {
                if let Some(state) = states.get(name.as_str()) {
                    state.source().set_time(time, clips);
                }
            }
            FiniteState::Fade(fade) => fade.update(time, states, clips),
        }
    }

    pub(crate) fn reset_clips(
        &self,
        states: &HashMap<String, SteadyState>,
        clips: &mut ClipInstanceCache,
        start_time: f64,
    ) {
        if let Some(state) = states.get(self.destination()) {
            state.source().reset_clips(clips, start_time);
        }
    }

    pub(crate) fn source_data(
        &self,
        states: &HashMap<String, SteadyState>,
        ctx: &SourceContext<'_>,
    ) -> Option<SourceData> {
        match self {
            FiniteState::Steady(name) => states.get(name.as_str())?.source().source_data(ctx),
            FiniteState::Fade(fade) => {
                let from = fade
                    .from
                    .as_deref()
                    .and_then(|s| s.source_data(states, ctx));
                let to = states.get(&fade.target)?.source().source_data(ctx);
                let w = fade.blend_type.apply(fade.percent) as f32;
                ctx.combiner
                    .combine_source_data(from.as_ref(), to.as_ref(), w)
            }
        }
    }

    /// Start time of the first clip this state plays, for synchronized fades.
    fn clip_start_time(
        &self,
        states: &HashMap<String, SteadyState>,
        clips: &ClipInstanceCache,
    ) -> Option<f64> {
        let clip = states.get(self.destination())?.source().first_clip()?;
        clips.instance(clip).map(|i| i.start_time())
    }

    /// Clip-local time of a steady state as of its last sample; `None` while fading
    /// or when the state plays no clip.
    pub(crate) fn local_time(
        &self,
        states: &HashMap<String, SteadyState>,
        clips: &ClipInstanceCache,
    ) -> Option<f64> {
        states.get(self.steady_name()?)?.source().local_time(clips)
    }
}

/// A named state playing a source tree.
#[derive(Clone, Debug)]
pub struct SteadyState {
    name: String,
    source: SourceTree,
    transitions: HashMap<String, TransitionState>,
    end_transition: Option<TransitionState>,
}

impl SteadyState {
    pub fn new(name: impl Into<String>, source: SourceTree) -> Self {
        Self {
            name: name.into(),
            source,
            transitions: HashMap::new(),
            end_transition: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceTree {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut SourceTree {
        &mut self.source
    }

    pub fn set_source(&mut self, source: SourceTree) {
        self.source = source;
    }

    /// Register `transition` under `keyword`, replacing any previous one.
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

    /// Exact keyword lookup; steady states do not use the `"*"` wildcard.
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

    pub fn end_transition(&self) -> Option<&TransitionState> {
        self.end_transition.as_ref()
    }

    pub fn set_end_transition(&mut self, transition: Option<TransitionState>) {
        self.end_transition = transition;
    }
}

/// Outcome of resolving a transition rule.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Transition {
    pub next: FiniteState,
    /// Restart the next state's clips at this time when it is entered.
    pub rewind_at: Option<f64>,
}

/// What a transition does once it applies.
#[derive(Clone, Debug, PartialEq)]
pub enum TransitionKind {
    /// Switch straight to `target`, restarting it.
    Immediate { target: String },
    /// Cross-fade to `target` over `fade_time` seconds.
    Fade {
        target: String,
        fade_time: f64,
        blend_type: BlendType,
    },
    /// Cross-fade with the target's clips aligned to the source's start time.
    SyncFade {
        target: String,
        fade_time: f64,
        blend_type: BlendType,
    },
    /// Cross-fade from a pose frozen when the transition starts.
    Frozen {
        target: String,
        fade_time: f64,
        blend_type: BlendType,
    },
    /// Stay in the current state.
    Ignore,
}

/// Rule for leaving the current state.
///
/// A window limits the rule to moments when the current state's clip-local time
/// lies in `[start, end]` (either bound may be open). Outside it the rule resolves
/// to nothing and the layer keeps looking.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionState {
    kind: TransitionKind,
    start_window: Option<f64>,
    end_window: Option<f64>,
}

impl From<TransitionKind> for TransitionState {
    fn from(kind: TransitionKind) -> Self {
        Self::new(kind)
    }
}

impl TransitionState {
    pub fn new(kind: TransitionKind) -> Self {
        Self {
            kind,
            start_window: None,
            end_window: None,
        }
    }

    pub fn immediate(target: impl Into<String>) -> Self {
        Self::new(TransitionKind::Immediate {
            target: target.into(),
        })
    }

    pub fn fade(target: impl Into<String>, fade_time: f64, blend_type: BlendType) -> Self {
        Self::new(TransitionKind::Fade {
            target: target.into(),
            fade_time,
            blend_type,
        })
    }

    pub fn sync_fade(target: impl Into<String>, fade_time: f64, blend_type: BlendType) -> Self {
        Self::new(TransitionKind::SyncFade {
            target: target.into(),
            fade_time,
            blend_type,
        })
    }

    pub fn frozen(target: impl Into<String>, fade_time: f64, blend_type: BlendType) -> Self {
        Self::new(TransitionKind::Frozen {
            target: target.into(),
            fade_time,
            blend_type,
        })
    }

    pub fn ignore() -> Self {
        Self::new(TransitionKind::Ignore)
    }

    pub fn with_window(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.start_window = start;
        self.end_window = end;
        self
    }

    pub fn kind(&self) -> &TransitionKind {
        &self.kind
    }

    pub fn start_window(&self) -> Option<f64> {
        self.start_window
    }

    pub fn end_window(&self) -> Option<f64> {
        self.end_window
    }

    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            TransitionKind::Immediate { target }
            | TransitionKind::Fade { target, .. }
            | TransitionKind::SyncFade { target, .. }
            | TransitionKind::Frozen { target, .. } => Some(target.as_str()),
            TransitionKind::Ignore => None,
        }
    }

    /// Whether `local_time` is inside the window. Without a local time there is
    /// nothing to restrict.
    pub fn in_window(&self, local_time: Option<f64>) -> bool {
        let Some(t) = local_time else {
            return true;
        };
        self.start_window.map_or(true, |start| t >= start)
            && self.end_window.map_or(true, |end| t <= end)
    }

    /// Next state given the current one, or `None` when this rule does not apply.
    pub(crate) fn resolve(
        &self,
        current: Option<&FiniteState>,
        states: &HashMap<String, SteadyState>,
        clips: &ClipInstanceCache,
        now: f64,
    ) -> Option<Transition> {
        let local_time = current.and_then(|c| c.local_time(states, clips));
        if !self.in_window(local_time) {
            return None;
        }

        let (target, fade) = match &self.kind {
            TransitionKind::Ignore => {
                return current.map(|c| Transition {
                    next: c.clone(),
                    rewind_at: None,
                });
            }
            TransitionKind::Immediate { target } => (target, None),
            TransitionKind::Fade {
                target,
                fade_time,
                blend_type,
            } => (target, Some((*fade_time, *blend_type, FadeKind::Fade))),
            TransitionKind::SyncFade {
                target,
                fade_time,
                blend_type,
            } => (target, Some((*fade_time, *blend_type, FadeKind::SyncFade))),
            TransitionKind::Frozen {
                target,
                fade_time,
                blend_type,
            } => (target, Some((*fade_time, *blend_type, FadeKind::Frozen))),
        };
        if !states.contains_key(target.as_str()) {
            warn!("transition target '{}' is not a steady state of this layer", target);
            return None;
        }

        let Some((fade_time, blend_type, kind)) = fade else {
            return Some(Transition {
                next: FiniteState::steady(target.as_str()),
                rewind_at: Some(now),
            });
        };

        let rewind_at = match kind {
            FadeKind::SyncFade => current
                .and_then(|c| c.clip_start_time(states, clips))
                .unwrap_or(now),
            FadeKind::Fade | FadeKind::Frozen => now,
        };

        Some(Transition {
            next: FiniteState::Fade(FadeState {
                from: current.cloned().map(Box::new),
                target: target.clone(),
                fade_time,
                blend_type,
                kind,
                start_time: now,
                percent: 0.0,
            }),
            rewind_at: Some(rewind_at),
        })
    }
}
