//! Facade-level tests. The engines here never open an output device: tracks
//! accumulate state, fades and schedules run on the control thread, and
//! audio is pulled (when needed) through `render`.

use hushmix::{
    AmbientEngine, AudioData, EngineConfig, EngineError, PlayOptions, RouteChangeReason,
    SafeVolumeManager, SafetyAdvisory, SessionEvent, SessionState, Sound, StopWhen,
};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

fn engine_with(config: EngineConfig) -> (AmbientEngine, Arc<SafeVolumeManager>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let safety = Arc::new(SafeVolumeManager::new(1.0, false));
    let engine = AmbientEngine::new(config, Arc::clone(&safety));
    (engine, safety)
}

fn engine() -> (AmbientEngine, Arc<SafeVolumeManager>) {
    engine_with(EngineConfig::default())
}

fn looping_sound(id: &str) -> Sound {
    let data = Arc::new(AudioData::new(vec![0.1; 4800], 48000, 1).unwrap());
    Sound::from_memory(id, data).looped(true)
}

fn one_shot_sound(id: &str, frames: usize) -> Sound {
    let data = Arc::new(AudioData::new(vec![0.2; frames], 48000, 1).unwrap());
    Sound::from_memory(id, data).looped(false)
}

// Instant-based LRU needs distinct creation times.
fn spaced() {
    sleep(Duration::from_millis(3));
}

#[test]
fn five_plays_evict_the_first() {
    let (engine, _) = engine();
    let mut ids = Vec::new();
    for name in ["a", "b", "c", "d", "e"] {
        ids.push(engine.play(&looping_sound(name)).unwrap());
        spaced();
        assert!(engine.current_snapshot().len() <= 4);
    }

    let snap = engine.current_snapshot();
    assert_eq!(snap.len(), 4);
    assert!(!snap.contains(ids[0]), "first track evicted");
    for id in &ids[1..] {
        assert!(snap.contains(*id));
    }

    let mut removed = engine.stop_all(None);
    removed.sort();
    let mut expected = ids[1..].to_vec();
    expected.sort();
    assert_eq!(removed, expected);
    assert!(engine.current_snapshot().is_empty());
}

#[test]
fn locked_track_survives_eviction() {
    let (engine, _) = engine();
    let a = engine.play(&looping_sound("a")).unwrap();
    engine.set_track_locked(a, true);
    spaced();
    let b = engine.play(&looping_sound("b")).unwrap();
    spaced();
    for name in ["c", "d", "e"] {
        engine.play(&looping_sound(name)).unwrap();
        spaced();
    }
    let snap = engine.current_snapshot();
    assert!(snap.contains(a), "locked track never auto-evicted");
    assert!(!snap.contains(b), "oldest unlocked evicted instead");
}

#[test]
fn safety_level_applies_immediately_to_live_tracks() {
    let (engine, _) = engine();
    engine.set_safety_enabled(true);
    let a = engine.play(&looping_sound("a")).unwrap();
    spaced();
    let b = engine.play(&looping_sound("b")).unwrap();

    let before = engine.current_snapshot();
    engine.set_safety_level(0.3);

    for id in [a, b] {
        let gain = engine.effective_gain(id).unwrap();
        assert!((gain - 0.3).abs() < 1e-6, "gain for {id} is {gain}");
    }

    // Same tracks, not re-created.
    let after = engine.current_snapshot();
    for id in [a, b] {
        assert_eq!(
            before.get(id).unwrap().started_at,
            after.get(id).unwrap().started_at
        );
    }
}

#[test]
fn safety_ceiling_caps_hot_gain_requests() {
    let (engine, _) = engine();
    engine.set_safety_enabled(true);
    engine.set_safety_level(0.5);
    for db in [0.0f32, 3.0, 12.0] {
        let id = engine
            .play_with(&looping_sound("hot"), PlayOptions::default().gain_db(db))
            .unwrap();
        assert!(engine.effective_gain(id).unwrap() <= 0.5);
        engine.stop(id, None);
    }
}

#[test]
fn stop_is_idempotent_and_stale_ids_are_no_ops() {
    let (engine, _) = engine();
    let id = engine.play(&looping_sound("a")).unwrap();
    engine.stop(id, None);
    assert!(engine.current_snapshot().is_empty());
    // Second stop, and queries through the stale handle, do nothing.
    engine.stop(id, None);
    engine.cancel_fade(id);
    engine.set_track_locked(id, true);
    engine.set_track_pan(id, 1.0);
    assert!(engine.effective_gain(id).is_none());
    assert!(engine.current_snapshot().is_empty());
}

#[test]
fn fade_runs_to_completion_and_removes_track() {
    let (engine, _) = engine_with(EngineConfig::default().fade_steps(5));
    let id = engine.play(&looping_sound("a")).unwrap();
    engine.stop(id, Some(Duration::from_millis(50)));

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while engine.current_snapshot().contains(id) {
        assert!(
            std::time::Instant::now() < deadline,
            "fade did not remove the track"
        );
        sleep(Duration::from_millis(10));
    }
    assert!(engine.effective_gain(id).is_none());
}

#[test]
fn cancelled_fade_restores_pre_fade_gain_exactly() {
    let (engine, _) = engine();
    let id = engine
        .play_with(&looping_sound("a"), PlayOptions::default().gain_db(-6.0))
        .unwrap();
    let before = engine.effective_gain(id).unwrap();

    // Long fade so the ramp is still mid-flight when we cancel.
    engine.stop(id, Some(Duration::from_secs(30)));
    sleep(Duration::from_millis(50));
    engine.cancel_fade(id);

    assert!(engine.current_snapshot().contains(id));
    assert_eq!(engine.effective_gain(id).unwrap(), before);

    // And the track is stoppable normally afterwards.
    engine.stop(id, None);
    assert!(engine.current_snapshot().is_empty());
}

#[test]
fn scheduled_stop_fires_and_rearming_replaces() {
    let (engine, _) = engine();
    engine.play(&looping_sound("a")).unwrap();
    engine.schedule_stop_all(StopWhen::After(Duration::from_secs(60)), None);
    engine.schedule_stop_all(StopWhen::After(Duration::from_millis(40)), None);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !engine.current_snapshot().is_empty() {
        assert!(
            std::time::Instant::now() < deadline,
            "scheduled stop never fired"
        );
        sleep(Duration::from_millis(10));
    }
}

#[test]
fn cancelled_schedule_does_not_fire() {
    let (engine, _) = engine();
    engine.play(&looping_sound("a")).unwrap();
    engine.schedule_stop_all(StopWhen::After(Duration::from_millis(40)), None);
    engine.cancel_scheduled_stops();
    sleep(Duration::from_millis(300));
    assert_eq!(engine.current_snapshot().len(), 1);
}

#[test]
fn per_track_auto_fade_removes_only_its_target() {
    let (engine, _) = engine_with(EngineConfig::default().fade_steps(4));
    let a = engine.play(&looping_sound("a")).unwrap();
    spaced();
    let b = engine.play(&looping_sound("b")).unwrap();
    engine.schedule_fade(a, Duration::from_millis(30), Duration::from_millis(30));

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while engine.current_snapshot().contains(a) {
        assert!(std::time::Instant::now() < deadline, "auto-fade never fired");
        sleep(Duration::from_millis(10));
    }
    assert!(engine.current_snapshot().contains(b));
}

#[test]
fn one_shot_completion_retires_the_track() {
    let (engine, _) = engine();
    let id = engine.play(&one_shot_sound("chime", 256)).unwrap();
    assert!(engine.current_snapshot().contains(id));

    // Pull more audio than the source holds, as the device callback would.
    let mut buffer = vec![0.0f32; 1024];
    engine.render(&mut buffer);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while engine.current_snapshot().contains(id) {
        assert!(
            std::time::Instant::now() < deadline,
            "completion never reached the control thread"
        );
        sleep(Duration::from_millis(10));
    }
    // Stopping after natural completion is a quiet no-op.
    engine.stop(id, None);
}

#[test]
fn interruption_round_trip_preserves_gain_and_pan() {
    let (mut engine_, _) = engine();
    let a = engine_
        .play_with(&looping_sound("a"), PlayOptions::default().gain_db(-3.0).pan(-0.5))
        .unwrap();
    spaced();
    let b = engine_
        .play_with(&looping_sound("b"), PlayOptions::default().gain_db(-9.0).pan(0.25))
        .unwrap();

    let before = engine_.current_snapshot();
    engine_.handle_session_event(SessionEvent::InterruptionBegan);
    assert_eq!(engine_.session_state(), SessionState::InterruptedPaused);
    // Tracks paused in place, not removed.
    assert_eq!(engine_.current_snapshot().len(), 2);

    engine_.handle_session_event(SessionEvent::InterruptionEnded {
        should_resume: true,
    });
    assert_eq!(engine_.session_state(), SessionState::Active);

    let after = engine_.current_snapshot();
    for id in [a, b] {
        let pre = before.get(id).unwrap();
        let post = after.get(id).unwrap();
        assert_eq!(pre.gain_db, post.gain_db);
        assert_eq!(pre.pan, post.pan);
        assert_eq!(pre.started_at, post.started_at);
    }
}

#[test]
fn unsafe_route_change_pauses_until_explicit_resume() {
    let (mut engine_, safety) = engine();
    engine_.play(&looping_sound("a")).unwrap();
    assert!(safety.session_duration().is_some());

    engine_.handle_session_event(SessionEvent::RouteChanged {
        reason: RouteChangeReason::DeviceUnavailable,
    });
    assert_eq!(engine_.session_state(), SessionState::RouteSafetyPaused);
    assert!(safety.session_duration().is_none(), "listening session ended");

    engine_.handle_session_event(SessionEvent::InterruptionEnded {
        should_resume: true,
    });
    assert_eq!(engine_.session_state(), SessionState::RouteSafetyPaused);

    engine_.resume_playback();
    assert_eq!(engine_.session_state(), SessionState::Active);
    // The resumed tracks form a new continuous playback span; the safety
    // oracle must be tracking it again.
    assert!(
        safety.session_duration().is_some(),
        "listening session restarted on resume"
    );
}

#[test]
fn listening_session_spans_first_play_to_last_removal() {
    let (engine, safety) = engine();
    assert!(safety.session_duration().is_none());
    let a = engine.play(&looping_sound("a")).unwrap();
    spaced();
    let b = engine.play(&looping_sound("b")).unwrap();
    assert!(safety.session_duration().is_some());

    engine.stop(a, None);
    assert!(safety.session_duration().is_some(), "still one track live");
    engine.stop(b, None);
    assert!(safety.session_duration().is_none());
}

#[test]
fn break_advisory_dips_and_commits_reduced_gain() {
    let (engine, safety) = engine();
    let id = engine.play(&looping_sound("a")).unwrap();
    let started = engine.current_snapshot().get(id).unwrap().started_at;

    safety.notify(SafetyAdvisory::BreakRecommended);

    // The dip ramps down over a few seconds, then commits into the gain.
    let deadline = std::time::Instant::now() + Duration::from_secs(6);
    while engine
        .current_snapshot()
        .get(id)
        .is_none_or(|t| t.gain_db > -5.0)
    {
        assert!(std::time::Instant::now() < deadline, "dip never committed");
        sleep(Duration::from_millis(20));
    }

    let snap = engine.current_snapshot();
    let track = snap.get(id).unwrap();
    assert!(
        (track.gain_db + 6.0206).abs() < 0.1,
        "half level committed, got {} dB",
        track.gain_db
    );
    assert_eq!(track.started_at, started, "same track, not re-created");
    assert!((engine.effective_gain(id).unwrap() - 0.5).abs() < 1e-3);
}

#[test]
fn cancelling_mid_dip_restores_full_gain() {
    let (engine, safety) = engine();
    let id = engine.play(&looping_sound("a")).unwrap();
    assert_eq!(engine.effective_gain(id).unwrap(), 1.0);

    safety.notify(SafetyAdvisory::BreakRecommended);
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while engine.effective_gain(id).unwrap() >= 1.0 {
        assert!(std::time::Instant::now() < deadline, "dip never started");
        sleep(Duration::from_millis(10));
    }

    engine.cancel_scheduled_stops();
    assert_eq!(engine.effective_gain(id).unwrap(), 1.0);
    assert_eq!(engine.current_snapshot().get(id).unwrap().gain_db, 0.0);
}

#[test]
fn max_time_advisory_stops_everything() {
    let (engine, safety) = engine();
    engine.play(&looping_sound("a")).unwrap();
    spaced();
    engine.play(&looping_sound("b")).unwrap();

    safety.notify(SafetyAdvisory::MaxTimeReached);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !engine.current_snapshot().is_empty() {
        assert!(
            std::time::Instant::now() < deadline,
            "max-time advisory did not stop playback"
        );
        sleep(Duration::from_millis(10));
    }
}

#[test]
fn missing_file_surfaces_source_unavailable() {
    let (engine, _) = engine();
    let sound = Sound::from_path("ghost", "/nonexistent/ghost.wav");
    match engine.play(&sound) {
        Err(EngineError::SourceUnavailable(_)) => {}
        other => panic!("expected SourceUnavailable, got {other:?}"),
    }
    assert!(engine.current_snapshot().is_empty());
}

#[test]
fn subscribers_receive_each_mutation() {
    let (engine, _) = engine();
    let rx = engine.subscribe();
    assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap().is_empty());

    let id = engine.play(&looping_sound("a")).unwrap();
    let snap = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(snap.contains(id));
    assert_eq!(snap.get(id).unwrap().sound_id, "a");

    engine.stop(id, None);
    let snap = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(snap.is_empty());
}

#[test]
fn pan_moves_a_live_track_and_republishes() {
    let (engine, _) = engine();
    let rx = engine.subscribe();
    let id = engine.play(&looping_sound("a")).unwrap();
    let _ = rx.recv_timeout(Duration::from_secs(1)).unwrap(); // initial
    let _ = rx.recv_timeout(Duration::from_secs(1)).unwrap(); // play

    engine.set_track_pan(id, -1.0);
    let snap = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(snap.get(id).unwrap().pan, -1.0);

    // Hard left: the right channel stays silent.
    let mut buffer = vec![0.0f32; 64];
    engine.render(&mut buffer);
    assert!(buffer.iter().skip(1).step_by(2).all(|s| *s == 0.0));
    assert!(buffer.iter().step_by(2).any(|s| *s != 0.0));
}

#[test]
fn slow_now_playing_hook_does_not_block_playback_calls() {
    let (engine, _) = engine();
    let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
    engine.set_now_playing_hook(Box::new(move |snap| {
        sleep(Duration::from_millis(300));
        let _ = seen_tx.send(snap.track_ids());
    }));

    let start = std::time::Instant::now();
    let id = engine.play(&looping_sound("a")).unwrap();
    assert!(engine.current_snapshot().contains(id));
    assert!(
        start.elapsed() < Duration::from_millis(200),
        "facade calls blocked on the hook"
    );

    let ids = seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(ids, vec![id]);
}

#[test]
fn play_during_interruption_starts_paused_and_resumes() {
    let (mut engine_, _) = engine();
    engine_.handle_session_event(SessionEvent::InterruptionBegan);
    let id = engine_.play(&looping_sound("a")).unwrap();
    assert!(engine_.current_snapshot().contains(id));

    // Nothing audible while paused.
    let mut buffer = vec![0.0f32; 512];
    engine_.render(&mut buffer);
    assert!(buffer.iter().all(|s| *s == 0.0));

    engine_.handle_session_event(SessionEvent::InterruptionEnded {
        should_resume: true,
    });
    let mut buffer = vec![0.0f32; 512];
    engine_.render(&mut buffer);
    assert!(buffer.iter().any(|s| *s != 0.0));
}
