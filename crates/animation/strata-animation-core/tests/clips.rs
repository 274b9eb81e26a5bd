use std::sync::Arc;

use strata_animation_core::{
    parse_clip_json, AnimationChannel, AnimationClip, AnimationError, AnimationManager,
    ManualTimer, SourceTree, SteadyState, TrsSamples, Value, IDENTITY_ROTATION,
};

fn approx(a: f32, b: f32, eps: f32) {
    assert!((a - b).abs() <= eps, "left={a} right={b} eps={eps}");
}

fn norm4(q: [f32; 4]) -> f32 {
    (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt()
}

fn mk_ramp(name: &str, len: f32) -> Arc<AnimationClip> {
    Arc::new(
        AnimationClip::new(name)
            .with_channel(AnimationChannel::float("x", vec![0.0, len], vec![0.0, len]))
            .unwrap(),
    )
}

fn mk_manager() -> (Arc<ManualTimer>, AnimationManager) {
    let timer = Arc::new(ManualTimer::new(0.0));
    let mut m = AnimationManager::new(timer.clone());
    m.set_update_rate(0.0);
    (timer, m)
}

#[test]
fn transform_channel_interpolates_trs() {
    // 90 degrees about Z at the end
    let s = std::f32::consts::FRAC_1_SQRT_2;
    let samples = TrsSamples {
        times: vec![0.0, 1.0],
        translations: vec![[0.0; 3], [2.0, 4.0, 0.0]],
        rotations: vec![IDENTITY_ROTATION, [0.0, 0.0, s, s]],
        scales: vec![[1.0; 3], [3.0; 3]],
    };
    let ch = AnimationChannel::transform("prop", samples);

    let Some(Value::Transform {
        translation,
        rotation,
        scale,
    }) = ch.sample(0.5)
    else {
        panic!("expected a transform");
    };
    approx(translation[0], 1.0, 1e-6);
    approx(translation[1], 2.0, 1e-6);
    approx(scale[2], 2.0, 1e-6);
    approx(norm4(rotation), 1.0, 1e-5);
    // halfway is 45 degrees: z = sin(22.5°)
    approx(rotation[2], 0.382_683_4, 1e-4);
    approx(rotation[3], 0.923_879_5, 1e-4);
}

#[test]
fn sampling_clamps_outside_the_key_range() {
    let ch = AnimationChannel::float("f", vec![1.0, 2.0], vec![5.0, 9.0]);
    assert_eq!(ch.sample(0.0), Some(Value::Float(5.0)));
    assert_eq!(ch.sample(3.0), Some(Value::Float(9.0)));
    assert_eq!(ch.sample(1.5), Some(Value::Float(7.0)));

    let single = AnimationChannel::float("g", vec![0.5], vec![4.0]);
    assert_eq!(single.sample(10.0), Some(Value::Float(4.0)));
}

#[test]
fn clip_length_is_the_longest_channel() {
    let clip = AnimationClip::new("c")
        .with_channel(AnimationChannel::float("a", vec![0.0, 1.5], vec![0.0, 1.0]))
        .unwrap()
        .with_channel(AnimationChannel::float("b", vec![0.0, 3.0], vec![0.0, 1.0]))
        .unwrap();
    assert_eq!(clip.max_time(), 3.0);
    assert!(clip.channel("b").is_some());
    assert!(clip.channel("zzz").is_none());
}

#[test]
fn malformed_channels_are_rejected() {
    let err = AnimationClip::new("bad")
        .with_channel(AnimationChannel::float("f", vec![0.0, 1.0], vec![0.0]))
        .unwrap_err();
    assert!(matches!(err, AnimationError::InvalidChannel { .. }));

    let err = AnimationClip::new("bad")
        .with_channel(AnimationChannel::float("f", vec![1.0, 0.5], vec![0.0, 1.0]))
        .unwrap_err();
    assert!(matches!(err, AnimationError::InvalidChannel { .. }));

    let err = parse_clip_json(r#"{ "name": "x", "channels": [ { "kind": "float", "name": "f", "times": [], "values": [] } ] }"#)
        .unwrap_err();
    assert!(matches!(err, AnimationError::InvalidChannel { .. }));

    assert!(matches!(
        parse_clip_json("{ not json"),
        Err(AnimationError::Parse { .. })
    ));
}

#[test]
fn loop_count_limits_replays() {
    let (timer, mut m) = mk_manager();
    let clip = mk_ramp("twice", 1.0);
    m.base_animation_layer_mut()
        .add_steady_state(SteadyState::new("Twice", SourceTree::clip(clip.clone())))
        .unwrap();
    m.get_clip_instance(&clip).set_loop_count(2);
    m.set_current_state(0, "Twice", true);

    timer.set_time(1.5);
    m.update();
    let inst = m.clip_instance(&clip).unwrap();
    assert!(inst.is_active());
    approx(inst.current_time() as f32, 0.5, 1e-6);

    timer.set_time(2.5);
    m.update();
    let inst = m.clip_instance(&clip).unwrap();
    assert!(!inst.is_active());
    assert_eq!(inst.current_time(), 1.0);
}

#[test]
fn time_scale_speeds_up_playback() {
    let (timer, mut m) = mk_manager();
    let clip = mk_ramp("fast", 10.0);
    m.base_animation_layer_mut()
        .add_steady_state(SteadyState::new("Fast", SourceTree::clip(clip.clone())))
        .unwrap();
    m.get_clip_instance(&clip).set_time_scale(2.0);
    m.set_current_state(0, "Fast", true);

    timer.set_time(1.25);
    m.update();
    let x = m.current_source_data().unwrap()["x"].as_float().unwrap();
    approx(x, 2.5, 1e-5);
}

#[test]
fn instances_are_found_by_name_and_reset() {
    let (timer, mut m) = mk_manager();
    let clip = mk_ramp("walk", 1.0);
    timer.set_time(4.0);
    let inst = m.get_clip_instance(&clip);
    assert!(!inst.is_active());
    assert_eq!(inst.start_time(), 4.0);

    m.reset_clip_instance(&clip, 6.0);
    let found = m.find_clip_instance("walk").unwrap();
    assert!(found.is_active());
    assert_eq!(found.start_time(), 6.0);
    assert!(Arc::ptr_eq(&m.find_animation_clip("walk").unwrap(), &clip));
    assert!(m.find_clip_instance("run").is_none());
    assert!(m.find_animation_clip("run").is_none());
}

#[test]
fn dropped_clips_disappear_from_the_cache() {
    let (_timer, mut m) = mk_manager();
    let keep = mk_ramp("keep", 1.0);
    let gone = mk_ramp("gone", 1.0);
    m.reset_clip_instance(&keep, 0.0);
    m.reset_clip_instance(&gone, 0.0);
    assert_eq!(m.clip_instances().len(), 2);

    drop(gone);
    assert!(m.find_clip_instance("gone").is_none());
    assert_eq!(m.clip_instances().iter().count(), 1);
    // dead entries linger until pruned
    assert_eq!(m.clip_instances().len(), 2);
    assert_eq!(m.clip_instances_mut().prune(), 1);
    assert_eq!(m.clip_instances().len(), 1);

    // resuming walks the cache and prunes it first
    let other = mk_ramp("other", 1.0);
    m.reset_clip_instance(&other, 0.0);
    drop(other);
    m.pause();
    assert_eq!(m.clip_instances().len(), 2);
    m.play();
    assert_eq!(m.clip_instances().len(), 1);
    assert!(m.find_clip_instance("keep").is_some());
}

#[test]
fn each_manager_keeps_its_own_instances() {
    let clip = mk_ramp("shared", 1.0);
    let (_t1, mut a) = mk_manager();
    let (_t2, mut b) = mk_manager();
    a.reset_clip_instance(&clip, 1.0);
    b.reset_clip_instance(&clip, 2.0);
    assert_eq!(a.clip_instance(&clip).unwrap().start_time(), 1.0);
    assert_eq!(b.clip_instance(&clip).unwrap().start_time(), 2.0);
    assert_eq!(Arc::strong_count(&clip), 1);
}
