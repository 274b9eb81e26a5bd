use std::sync::{Arc, Mutex};

use strata_animation_core::{
    load_state_machine_json, load_trigger_channels_json, parse_clip_json, AnimationApplier,
    AnimationError, AnimationManager, ClipLibrary, JointApplier, LayerBlender, ManualTimer,
    SkeletonPose, LOOP_FOREVER,
};
use strata_test_fixtures::{clips, state_machines};

fn approx(a: f32, b: f32, eps: f32) {
    assert!((a - b).abs() <= eps, "left={a} right={b} eps={eps}");
}

fn mk_library(machine: &str) -> ClipLibrary {
    let mut lib = ClipLibrary::new();
    for key in state_machines::clip_keys(machine).expect("manifest entry") {
        let json = clips::json(&key).expect("clip fixture");
        let clip = parse_clip_json(&json).expect("valid clip");
        lib.insert(clip.name.clone(), Arc::new(clip));
    }
    lib
}

fn mk_loaded<A: AnimationApplier>(
    mut m: AnimationManager<A>,
) -> (AnimationManager<A>, ClipLibrary) {
    m.set_update_rate(0.0);
    let lib = mk_library("locomotion");
    let json = state_machines::json("locomotion").unwrap();
    load_state_machine_json(&json, &lib, &mut m).expect("locomotion loads");
    (m, lib)
}

fn float_at(m: &mut AnimationManager<impl AnimationApplier>, key: &str) -> Option<f32> {
    m.current_source_data()?.get(key)?.as_float()
}

#[test]
fn fixtures_are_listed() {
    let mut keys = clips::keys();
    keys.sort();
    assert_eq!(keys, vec!["idle", "run", "walk", "wave"]);
    assert!(state_machines::keys().contains(&"locomotion".to_string()));
    assert!(state_machines::keys().contains(&"upper_body".to_string()));
    assert!(state_machines::path("locomotion").unwrap().exists());
    let raw: serde_json::Value = state_machines::load("locomotion").unwrap();
    assert_eq!(raw["steadyStates"].as_array().unwrap().len(), 5);
}

#[test]
fn locomotion_builds_layers_states_and_settings() {
    let timer = Arc::new(ManualTimer::new(0.0));
    let mut m = AnimationManager::new(timer);
    m.set_update_rate(0.0);
    let lib = mk_library("locomotion");
    let summary =
        load_state_machine_json(&state_machines::json("locomotion").unwrap(), &lib, &mut m)
            .unwrap();

    assert_eq!(summary.layers, vec!["gesture".to_string()]);
    assert_eq!(summary.steady_states.len(), 5);
    assert_eq!(m.layer_count(), 2);

    let mut base_states: Vec<&str> = m.base_animation_layer().steady_state_names().collect();
    base_states.sort();
    assert_eq!(base_states, vec!["Idle", "Run", "Walk"]);

    let gesture = m.find_animation_layer("gesture").unwrap();
    assert!(gesture.steady_state("Wave").is_some());
    assert!(gesture.steady_state("Wave").unwrap().end_transition().is_some());
    assert_eq!(gesture.layer_blender().unwrap().blend_key(), "gesture_w");
    assert_eq!(m.values_store().try_get("gesture_w"), Some(1.0));

    assert_eq!(m.find_clip_instance("idle").unwrap().loop_count(), LOOP_FOREVER);
    // wave keeps the default single play
    assert!(m.find_clip_instance("wave").is_none());
}

#[test]
fn idle_walk_run_through_fades() {
    let timer = Arc::new(ManualTimer::new(0.0));
    let (mut m, lib) = mk_loaded(AnimationManager::new(timer.clone()));
    assert!(m.set_current_state(0, "Idle", true));

    timer.set_time(0.5);
    assert!(m.update());
    assert!(m.do_transition(0, "walk"));

    timer.set_time(0.6);
    m.update();
    assert!(m
        .base_animation_layer()
        .current_state()
        .unwrap()
        .as_fade()
        .is_some());

    timer.set_time(0.8);
    m.update();
    assert_eq!(
        m.base_animation_layer().current_state().unwrap().steady_name(),
        Some("Walk")
    );
    // Walk swallows its own keyword
    assert!(!m.do_transition(0, "walk"));

    timer.set_time(1.0);
    assert!(m.do_transition(0, "run"));
    let run = &lib["run"];
    assert_eq!(m.clip_instance(run).unwrap().start_time(), 0.5);

    timer.set_time(1.3);
    m.update();
    assert_eq!(
        m.base_animation_layer().current_state().unwrap().steady_name(),
        Some("Run")
    );
    approx(float_at(&mut m, "speed").unwrap(), 3.0, 1e-6);
}

#[test]
fn gesture_layer_overrides_then_hands_back() {
    let timer = Arc::new(ManualTimer::new(0.0));
    let (mut m, _lib) = mk_loaded(AnimationManager::new(timer.clone()));
    m.set_current_state(0, "Idle", true);
    assert!(m.do_transition(1, "wave"));

    timer.set_time(0.5);
    m.update();
    approx(float_at(&mut m, "wave_amount").unwrap(), 1.0, 1e-6);
    approx(float_at(&mut m, "breath").unwrap(), 0.5, 1e-6);

    timer.set_time(1.2);
    m.update();
    let gesture = m.find_animation_layer("gesture").unwrap();
    assert_eq!(gesture.current_state().unwrap().steady_name(), Some("Rest"));
    // Rest is an empty managed source, so only the base layer shows through
    assert!(float_at(&mut m, "wave_amount").is_none());
    assert!(float_at(&mut m, "breath").is_some());
}

#[test]
fn joint_applier_drives_a_skeleton_from_fixtures() {
    let timer = Arc::new(ManualTimer::new(0.0));
    let (mut m, _lib) = mk_loaded(AnimationManager::with_applier(
        timer.clone(),
        JointApplier::new(),
    ));
    let pose = Arc::new(SkeletonPose::new(vec![
        "hips".into(),
        "spine".into(),
        "hand_r".into(),
    ]));
    m.add_pose(pose.clone());
    m.set_current_state(0, "Idle", true);
    m.do_transition(1, "wave");

    timer.set_time(0.5);
    assert!(m.update());
    approx(pose.local_transform(0).unwrap().translation[1], 1.01, 1e-5);
    approx(pose.local_transform(2).unwrap().translation[1], 1.6, 1e-5);
    assert_eq!(m.applier().unwrap().joints_written(), 2);
}

#[test]
fn second_load_of_the_same_layers_is_rejected_whole() {
    let timer = Arc::new(ManualTimer::new(0.0));
    let (mut m, lib) = mk_loaded(AnimationManager::new(timer));
    let json = state_machines::json("locomotion").unwrap();
    let err = load_state_machine_json(&json, &lib, &mut m).unwrap_err();
    assert!(matches!(err, AnimationError::InvalidDefinition { .. }));
    assert_eq!(m.layer_count(), 2);
}

#[test]
fn missing_clip_in_library_is_reported() {
    let timer = Arc::new(ManualTimer::new(0.0));
    let mut m = AnimationManager::new(timer);
    let mut lib = mk_library("locomotion");
    lib.remove("run");
    let err = load_state_machine_json(&state_machines::json("locomotion").unwrap(), &lib, &mut m)
        .unwrap_err();
    assert_eq!(err, AnimationError::ClipNotFound { name: "run".into() });
    assert_eq!(m.layer_count(), 1);
    assert_eq!(m.base_animation_layer().steady_state_names().count(), 0);
}

/// Upper-body fixture on a three-joint skeleton, with a "peak" trigger on the wave
/// clip recorded into the returned log.
fn mk_upper_body() -> (
    Arc<ManualTimer>,
    AnimationManager<JointApplier>,
    Arc<SkeletonPose>,
    Arc<Mutex<Vec<String>>>,
) {
    let timer = Arc::new(ManualTimer::new(0.0));
    let fired = Arc::new(Mutex::new(Vec::new()));
    let mut applier = JointApplier::new();
    let log = Arc::clone(&fired);
    applier.add_trigger_callback("peak", move |key, _| log.lock().unwrap().push(key.to_string()));

    let mut m = AnimationManager::with_applier(timer.clone(), applier);
    m.set_update_rate(0.0);
    let pose = Arc::new(SkeletonPose::new(vec![
        "hips".into(),
        "spine".into(),
        "hand_r".into(),
    ]));
    m.add_pose(pose.clone());

    let mut lib = mk_library("upper_body");
    let triggers = r#"[ { "clip": "wave",
        "triggerChannel": { "name": "wave_fx", "times": [0.5], "keys": ["peak"] } } ]"#;
    assert_eq!(load_trigger_channels_json(triggers, &mut lib).unwrap(), 1);
    load_state_machine_json(&state_machines::json("upper_body").unwrap(), &lib, &mut m)
        .expect("upper_body loads");
    (timer, m, pose, fired)
}

#[test]
fn masked_clips_split_the_body_between_layers() {
    let (timer, mut m, pose, fired) = mk_upper_body();
    m.set_current_state(0, "Walk", true);
    assert!(m.do_transition(1, "wave"));

    timer.set_time(0.25);
    assert!(m.update());
    let out = m.current_source_data().unwrap();
    // walk without its speed channel, wave reduced to the hand and its curves
    assert!(out.get("speed").is_none());
    assert!(out.contains_key("_jnt0") && out.contains_key("_jnt1") && out.contains_key("_jnt2"));
    approx(out["wave_amount"].as_float().unwrap(), 0.5, 1e-6);
    approx(pose.local_transform(2).unwrap().translation[1], 1.5, 1e-5);

    timer.set_time(0.6);
    m.update();
    assert_eq!(*fired.lock().unwrap(), ["peak"]);
    timer.set_time(0.7);
    m.update();
    assert_eq!(fired.lock().unwrap().len(), 1);
}

#[test]
fn windowed_transition_and_named_joint_hold() {
    let (timer, mut m, pose, _fired) = mk_upper_body();
    m.set_current_state(0, "Walk", true);
    m.do_transition(1, "wave");

    // too early for the fade: the layer wildcard snaps to Hold instead
    timer.set_time(0.25);
    m.update();
    assert!(m.do_transition(1, "lower"));
    let upper = m.find_animation_layer("upper").unwrap();
    assert_eq!(upper.current_state().unwrap().steady_name(), Some("Hold"));

    // Hold was seeded from the wave's first frame on the joint named hand_r
    timer.set_time(0.3);
    m.update();
    approx(pose.local_transform(2).unwrap().translation[1], 1.4, 1e-5);

    assert!(m.do_transition(1, "wave"));
    timer.set_time(0.9);
    m.update();
    assert!(m.do_transition(1, "lower"));
    let upper = m.find_animation_layer("upper").unwrap();
    assert!(upper.current_state().unwrap().as_fade().is_some());
}

#[test]
fn joint_names_fail_without_a_matching_pose() {
    let timer = Arc::new(ManualTimer::new(0.0));
    let mut m = AnimationManager::with_applier(timer, JointApplier::new());
    m.add_pose(Arc::new(SkeletonPose::new(vec!["hips".into()])));
    let lib = mk_library("upper_body");
    let err = load_state_machine_json(&state_machines::json("upper_body").unwrap(), &lib, &mut m)
        .unwrap_err();
    assert_eq!(err, AnimationError::JointNotFound { name: "hand_r".into() });
    assert_eq!(m.layer_count(), 1);
}
