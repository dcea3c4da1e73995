//! Engine facade and control loop.
//!
//! [`AmbientEngine`] is the public contract: play/stop/schedule/volume plus
//! session-event handling. All track-set mutation funnels through a single
//! mutex-guarded [`Controller`] — facade calls lock it directly, and a
//! dedicated control-loop thread locks it to run scheduled actions, fade
//! steps, voice completions and safety advisories. The audio callback never
//! takes part in any of this; it posts completions over a channel.
//!
//! The engine is an explicitly constructed instance, not a process global:
//! tests build as many isolated engines as they like.

use crate::audio_data::{AudioData, SoundLoader, SymphoniaLoader};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::level::{db_to_linear, linear_to_db};
use crate::mix::{MixGraph, Voice, mix_voices};
use crate::output::OutputEngine;
use crate::pool::TrackPool;
use crate::safety::{SafeVolumeManager, SafetyAdvisory};
use crate::sched::{FadeKind, SchedAction, Scheduler};
use crate::session::{SessionCoordinator, SessionDirective, SessionEvent, SessionState};
use crate::snapshot::{NowPlayingHook, PlayingSnapshot, PlayingTrack, SnapshotPublisher};
use crate::sound::{Sound, SoundId, SoundSource};
use crate::track::{FadeState, Track, TrackId, TrackState};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// When a scheduled stop-all should fire.
#[derive(Debug, Clone, Copy)]
pub enum StopWhen {
    At(Instant),
    After(Duration),
}

impl StopWhen {
    fn fire_at(self, now: Instant) -> Instant {
        match self {
            StopWhen::At(at) => at,
            StopWhen::After(after) => now + after,
        }
    }
}

/// Per-play overrides on top of the sound's catalog defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayOptions {
    pub looped: Option<bool>,
    pub gain_db: Option<f32>,
    pub pan: f32,
}

impl PlayOptions {
    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = Some(looped);
        self
    }

    pub fn gain_db(mut self, db: f32) -> Self {
        self.gain_db = Some(db);
        self
    }

    pub fn pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }
}

/// Messages marshaled onto the control thread.
enum ControlMsg {
    /// A one-shot voice finished in the audio callback.
    VoiceFinished(TrackId),
    /// A deadline may have moved; recompute the wait.
    Nudge,
    Shutdown,
}

/// Break-reminder dip: ramp all tracks to this multiplier over this long.
const BREAK_DIP_LEVEL: f32 = 0.5;
const BREAK_DIP_DURATION: Duration = Duration::from_secs(3);

/// Idle wait when the scheduler has no pending deadline.
const IDLE_WAIT: Duration = Duration::from_millis(250);

struct Controller {
    config: EngineConfig,
    pool: TrackPool,
    mix: MixGraph,
    sched: Scheduler,
    session: SessionCoordinator,
    safety: Arc<SafeVolumeManager>,
    publisher: SnapshotPublisher,
    loader: Box<dyn SoundLoader + Send>,
    sound_cache: HashMap<SoundId, Arc<AudioData>>,
    /// Set when an output (re)start failed; cleared by the next success.
    degraded: bool,
}

impl Controller {
    fn ceiling(&self) -> Option<f32> {
        self.safety.enabled().then(|| self.safety.ceiling())
    }

    /// Decode (or fetch from cache) and bring to the engine sample rate.
    /// The first play of a sound pays the decode cost; repeats are cheap.
    fn resolve_audio(&mut self, sound: &Sound) -> Result<Arc<AudioData>> {
        if let Some(data) = self.sound_cache.get(&sound.id) {
            return Ok(Arc::clone(data));
        }
        let raw = match &sound.source {
            SoundSource::Memory(data) => Arc::clone(data),
            SoundSource::Path(path) => self.loader.load(path)?,
        };
        let data = if raw.sample_rate() != self.config.sample_rate {
            Arc::new(raw.resample(self.config.sample_rate)?)
        } else {
            raw
        };
        self.sound_cache.insert(sound.id.clone(), Arc::clone(&data));
        Ok(data)
    }

    fn play(&mut self, sound: &Sound, opts: PlayOptions) -> Result<TrackId> {
        if self.degraded {
            return Err(EngineError::ResourceUnavailable(
                "output engine is not running".into(),
            ));
        }

        let data = self.resolve_audio(sound)?;
        if data.is_empty() {
            // Voice attach would fail; bail before the pool is touched.
            return Err(EngineError::ResourceUnavailable(format!(
                "sound {} decoded to zero frames",
                sound.id
            )));
        }

        let looped = opts.looped.unwrap_or(sound.looped);
        let gain_db = opts.gain_db.unwrap_or(sound.default_gain_db);
        let track = Track::new(sound.id.clone(), looped, gain_db, opts.pan);

        let live_before = self.pool.len();
        let (id, evicted) = self.pool.admit(track);
        if let Some(victim) = evicted {
            // Silent policy action; the handle just stops resolving.
            log::info!("evicted {victim} to admit {id}");
            self.mix.disconnect(victim);
            self.sched.cancel_track(victim);
        }

        self.mix.connect(id, Voice::new(data, looped, opts.pan))?;
        self.mix.apply_gain(id, gain_db, self.ceiling());

        let paused = self.session.state() != SessionState::Active;
        if let Some(track) = self.pool.get_mut(id) {
            track.state = if paused {
                TrackState::PausedByInterruption
            } else {
                TrackState::Playing
            };
        }
        if paused {
            log::debug!("session not active, starting {id} paused");
            self.mix.pause(id);
        }

        if live_before == 0 {
            self.safety.start_listening_session();
        }
        log::info!("playing {} as {id} (loop: {looped}, gain: {gain_db} dB)", sound.id);
        self.publish();
        Ok(id)
    }

    /// Detach and drop a track. Idempotent; returns whether it was live.
    fn remove_track(&mut self, id: TrackId) -> bool {
        if self.pool.remove(id).is_none() {
            return false;
        }
        self.mix.disconnect(id);
        self.sched.cancel_track(id);
        if self.pool.is_empty() {
            self.safety.end_listening_session();
        }
        true
    }

    fn stop(&mut self, id: TrackId, fade: Option<Duration>) {
        if !self.pool.contains(id) {
            // Stale or already-removed handle: success, not an error.
            return;
        }
        match fade {
            None => {
                if self.remove_track(id) {
                    log::info!("stopped {id}");
                    self.publish();
                }
            }
            Some(duration) => self.begin_removal_fade(id, duration),
        }
    }

    fn begin_removal_fade(&mut self, id: TrackId, duration: Duration) {
        let Some(track) = self.pool.get_mut(id) else {
            return;
        };
        if track.state == TrackState::FadingOut {
            return;
        }
        track.fade = Some(FadeState {
            from_db: track.gain_db,
        });
        track.state = TrackState::FadingOut;
        self.sched
            .begin_ramp(id, FadeKind::Remove, Instant::now(), duration);
        log::debug!("fading out {id} over {duration:?}");
    }

    /// Cancel a running fade-out, restoring the pre-fade gain exactly.
    fn cancel_fade(&mut self, id: TrackId) {
        if !self.sched.cancel_ramp(id) {
            return;
        }
        let ceiling = self.ceiling();
        if let Some(track) = self.pool.get_mut(id) {
            if let Some(fade) = track.fade.take() {
                track.gain_db = fade.from_db;
            }
            if track.state == TrackState::FadingOut {
                track.state = TrackState::Playing;
            }
            let gain_db = track.gain_db;
            self.mix.set_fade_level(id, 1.0);
            self.mix.apply_gain(id, gain_db, ceiling);
        }
    }

    /// Cancel every pending scheduled action. In-flight fades revert to
    /// their pre-fade gain first; a track must never be left stranded at a
    /// partial level.
    fn cancel_all_scheduled(&mut self) {
        let ids: Vec<TrackId> = self.pool.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.cancel_fade(id);
        }
        self.sched.cancel_all();
    }

    /// Stop every track that exists right now. `user_initiated` also clears
    /// pending scheduled actions so no stale timer fires against future
    /// playback.
    fn stop_all(&mut self, fade: Option<Duration>, user_initiated: bool) -> Vec<TrackId> {
        if user_initiated {
            self.cancel_all_scheduled();
        }
        let ids: Vec<TrackId> = self.pool.iter().map(|(id, _)| id).collect();
        for id in &ids {
            self.stop(*id, fade);
        }
        ids
    }

    fn on_voice_finished(&mut self, id: TrackId) {
        // The voice already left the mix table on the audio thread; here we
        // retire the track itself.
        if self.remove_track(id) {
            log::info!("{id} completed");
            self.publish();
        }
    }

    fn on_advisory(&mut self, advisory: SafetyAdvisory) {
        match advisory {
            SafetyAdvisory::VolumeWarning => {
                log::info!("safety: volume warning");
            }
            SafetyAdvisory::BreakRecommended => {
                log::info!("safety: break recommended, dipping all tracks");
                let now = Instant::now();
                let ids: Vec<TrackId> = self
                    .pool
                    .iter()
                    .filter(|(_, t)| t.state == TrackState::Playing)
                    .map(|(id, _)| id)
                    .collect();
                for id in ids {
                    self.sched
                        .begin_ramp(id, FadeKind::DipTo(BREAK_DIP_LEVEL), now, BREAK_DIP_DURATION);
                }
            }
            SafetyAdvisory::MaxTimeReached => {
                log::info!("safety: max listening time reached, stopping all");
                self.stop_all(None, false);
            }
        }
    }

    fn apply_sched_action(&mut self, action: SchedAction) {
        match action {
            SchedAction::StopAll { fade } => {
                log::info!("scheduled stop fired");
                self.stop_all(fade, false);
            }
            SchedAction::StartFade { id, fade } => {
                // Target may be long gone; stale actions are discarded.
                self.stop(id, Some(fade));
            }
            SchedAction::FadeStep { id, level } => {
                self.mix.set_fade_level(id, level);
            }
            SchedAction::FadeFinished { id, kind } => match kind {
                FadeKind::Remove => {
                    if self.remove_track(id) {
                        log::info!("fade of {id} completed, track removed");
                        self.publish();
                    }
                }
                FadeKind::DipTo(level) => {
                    // Commit the reduced level into the track gain.
                    let ceiling = self.ceiling();
                    if let Some(track) = self.pool.get_mut(id) {
                        track.gain_db = linear_to_db(db_to_linear(track.gain_db) * level);
                        track.fade = None;
                        let gain_db = track.gain_db;
                        self.mix.set_fade_level(id, 1.0);
                        self.mix.apply_gain(id, gain_db, ceiling);
                    }
                    self.publish();
                }
            },
        }
    }

    /// Re-apply the safety ceiling to every live voice. Runs synchronously
    /// inside the setter, so there is no window where a voice plays at a
    /// stale, unsafe gain.
    fn reapply_all_gains(&mut self) {
        let ceiling = self.ceiling();
        let gains: Vec<(TrackId, f32)> = self
            .pool
            .iter()
            .map(|(id, t)| (id, t.gain_db))
            .collect();
        for (id, gain_db) in gains {
            self.mix.apply_gain(id, gain_db, ceiling);
        }
    }

    /// Execute the track-side effects of session directives; output-engine
    /// directives are returned for the facade, which owns the stream.
    fn run_session_directives(&mut self, directives: &[SessionDirective]) {
        for directive in directives {
            match directive {
                SessionDirective::PauseAllTracks => {
                    for (_, track) in self.pool.iter_mut() {
                        if track.state == TrackState::Playing {
                            track.state = TrackState::PausedByInterruption;
                        }
                    }
                    self.mix.pause_all();
                }
                SessionDirective::ResumeAllTracks => {
                    for (_, track) in self.pool.iter_mut() {
                        if track.state == TrackState::PausedByInterruption {
                            track.state = TrackState::Playing;
                        }
                    }
                    self.mix.resume_all();
                }
                SessionDirective::EndListeningSession => {
                    self.safety.end_listening_session();
                }
                SessionDirective::StartListeningSession => {
                    // A resumed span counts as a fresh continuous playback
                    // span for the safety oracle.
                    if !self.pool.is_empty() {
                        self.safety.start_listening_session();
                    }
                }
                SessionDirective::StopOutput
                | SessionDirective::RestartOutput
                | SessionDirective::VerifyOutput => {}
            }
        }
    }

    /// Reposition a live voice in the stereo field. No-op on stale ids.
    fn set_pan(&mut self, id: TrackId, pan: f32) {
        let Some(track) = self.pool.get_mut(id) else {
            return;
        };
        track.pan = pan.clamp(-1.0, 1.0);
        let pan = track.pan;
        self.mix.set_pan(id, pan);
        self.publish();
    }

    fn snapshot(&self) -> PlayingSnapshot {
        let tracks = self
            .pool
            .iter()
            .map(|(id, t)| {
                (
                    id,
                    PlayingTrack {
                        sound_id: t.sound_id.clone(),
                        started_at: t.started_at,
                        looped: t.looped,
                        gain_db: t.gain_db,
                        pan: t.pan,
                    },
                )
            })
            .collect();
        PlayingSnapshot::new(tracks)
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.publisher.publish(snapshot);
    }
}

/// The multi-track ambient playback engine.
///
/// Holds the cpal output stream, so it lives on the thread that created it;
/// the control loop and audio callback run on their own threads and share
/// only the controller and the voice table.
pub struct AmbientEngine {
    inner: Arc<Mutex<Controller>>,
    control_tx: Sender<ControlMsg>,
    control_loop: Option<JoinHandle<()>>,
    output: OutputEngine,
    /// Whether the host ever asked for hardware output. Session-driven
    /// restarts only apply once it did.
    output_requested: bool,
}

impl AmbientEngine {
    pub fn new(config: EngineConfig, safety: Arc<SafeVolumeManager>) -> Self {
        Self::with_loader(config, safety, Box::new(SymphoniaLoader))
    }

    pub fn with_loader(
        config: EngineConfig,
        safety: Arc<SafeVolumeManager>,
        loader: Box<dyn SoundLoader + Send>,
    ) -> Self {
        let mix = MixGraph::new();
        let voices = mix.voice_table();
        let (control_tx, control_rx) = unbounded();
        let safety_rx = safety.subscribe();

        let controller = Controller {
            pool: TrackPool::new(config.max_tracks),
            mix,
            sched: Scheduler::new(config.fade_steps),
            session: SessionCoordinator::new(),
            safety,
            publisher: SnapshotPublisher::new(),
            loader,
            sound_cache: HashMap::new(),
            degraded: false,
            config: config.clone(),
        };
        let inner = Arc::new(Mutex::new(controller));

        let mut output = OutputEngine::new(config);
        let callback_tx = control_tx.clone();
        output.set_fill_callback(move |buffer, channels| {
            let frames = buffer.len() / channels as usize;
            for id in mix_voices(buffer, channels, &voices) {
                // Marshal completion onto the control thread; the audio
                // thread never touches the track set.
                let _ = callback_tx.send(ControlMsg::VoiceFinished(id));
            }
            frames
        });

        let loop_inner = Arc::clone(&inner);
        let control_loop = std::thread::Builder::new()
            .name("hushmix-control".into())
            .spawn(move || control_loop(loop_inner, control_rx, safety_rx))
            .expect("failed to spawn control thread");

        Self {
            inner,
            control_tx,
            control_loop: Some(control_loop),
            output,
            output_requested: false,
        }
    }

    /// Start the hardware output. Playback state accumulates regardless;
    /// nothing is audible until this succeeds.
    pub fn start(&mut self) -> Result<()> {
        self.output_requested = true;
        match self.output.start() {
            Ok(()) => {
                self.lock().degraded = false;
                Ok(())
            }
            Err(e) => {
                log::error!("output engine failed to start: {e}");
                self.lock().degraded = true;
                Err(e)
            }
        }
    }

    /// Play a sound with its catalog defaults.
    pub fn play(&self, sound: &Sound) -> Result<TrackId> {
        self.play_with(sound, PlayOptions::default())
    }

    /// Play a sound with per-call overrides.
    pub fn play_with(&self, sound: &Sound, opts: PlayOptions) -> Result<TrackId> {
        self.lock().play(sound, opts)
    }

    /// Stop one track, immediately or via fade-then-remove. No-op for
    /// unknown or stale ids.
    pub fn stop(&self, id: TrackId, fade: Option<Duration>) {
        self.lock().stop(id, fade);
        self.nudge();
    }

    /// Stop every currently live track, returning their ids. Ends the
    /// listening session once the last one is removed, and cancels any
    /// pending scheduled stops.
    pub fn stop_all(&self, fade: Option<Duration>) -> Vec<TrackId> {
        let ids = self.lock().stop_all(fade, true);
        self.nudge();
        ids
    }

    /// Arm the single global scheduled stop, replacing any previous one.
    pub fn schedule_stop_all(&self, when: StopWhen, fade: Option<Duration>) {
        let now = Instant::now();
        self.lock().sched.arm_stop_all(when.fire_at(now), fade);
        self.nudge();
    }

    /// Cancel every pending scheduled action, reverting in-flight fades to
    /// their pre-fade gain.
    pub fn cancel_scheduled_stops(&self) {
        self.lock().cancel_all_scheduled();
    }

    /// Arm a per-track auto-fade: after `after`, the track fades out over
    /// `fade` and is removed.
    pub fn schedule_fade(&self, id: TrackId, after: Duration, fade: Duration) {
        self.lock().sched.arm_fade(id, Instant::now() + after, fade);
        self.nudge();
    }

    /// Cancel an in-flight fade-out, restoring the pre-fade gain exactly.
    pub fn cancel_fade(&self, id: TrackId) {
        self.lock().cancel_fade(id);
    }

    pub fn set_safety_enabled(&self, enabled: bool) {
        let mut inner = self.lock();
        inner.safety.set_enabled(enabled);
        inner.reapply_all_gains();
    }

    /// Set the loudness ceiling (clamped to [0, 1]) and synchronously
    /// re-apply it to every live track.
    pub fn set_safety_level(&self, ceiling: f32) {
        let mut inner = self.lock();
        inner.safety.set_ceiling(ceiling);
        inner.reapply_all_gains();
    }

    /// Move a live track in the stereo field (clamped to [-1, 1]). No-op on
    /// stale ids.
    pub fn set_track_pan(&self, id: TrackId, pan: f32) {
        self.lock().set_pan(id, pan);
    }

    /// Exclude or include a track in automatic eviction.
    pub fn set_track_locked(&self, id: TrackId, locked: bool) {
        let mut inner = self.lock();
        if let Some(track) = inner.pool.get_mut(id) {
            track.locked = locked;
        }
    }

    /// React to a host audio-session lifecycle event.
    pub fn handle_session_event(&mut self, event: SessionEvent) {
        let directives = {
            let mut inner = self.lock();
            let directives = inner.session.handle(event);
            inner.run_session_directives(&directives);
            directives
        };
        self.run_output_directives(&directives);
    }

    /// Explicit user resume out of an interruption or route-safety pause.
    pub fn resume_playback(&mut self) {
        let directives = {
            let mut inner = self.lock();
            let directives = inner.session.resume_explicit();
            inner.run_session_directives(&directives);
            directives
        };
        self.run_output_directives(&directives);
    }

    fn run_output_directives(&mut self, directives: &[SessionDirective]) {
        for directive in directives {
            match directive {
                SessionDirective::StopOutput => self.output.stop(),
                SessionDirective::RestartOutput if self.output_requested => {
                    if let Err(e) = self.start() {
                        // Degraded until a later restart succeeds; play()
                        // surfaces ResourceUnavailable in the meantime.
                        log::error!("output restart failed: {e}");
                    }
                }
                SessionDirective::VerifyOutput if self.output_requested => {
                    if !self.output.is_running() {
                        log::warn!("output engine not running on foreground, restarting");
                        if let Err(e) = self.start() {
                            log::error!("output restart failed: {e}");
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.lock().session.state()
    }

    /// Subscribe to snapshot publications. The current snapshot is
    /// delivered immediately.
    pub fn subscribe(&self) -> Receiver<Arc<PlayingSnapshot>> {
        self.lock().publisher.subscribe()
    }

    pub fn current_snapshot(&self) -> Arc<PlayingSnapshot> {
        self.lock().publisher.current()
    }

    /// Register the best-effort now-playing-info refresh hook.
    pub fn set_now_playing_hook(&self, hook: NowPlayingHook) {
        self.lock().publisher.set_now_playing_hook(hook);
    }

    /// Effective linear gain currently applied to a voice. Diagnostic.
    pub fn effective_gain(&self, id: TrackId) -> Option<f32> {
        self.lock().mix.current_gain(id)
    }

    /// Render one block offline, exactly as the audio callback would.
    /// Useful for previews and for hosts that pull audio themselves.
    pub fn render(&self, buffer: &mut [f32]) {
        let (voices, channels) = {
            let inner = self.lock();
            (inner.mix.voice_table(), inner.config.channels)
        };
        for id in mix_voices(buffer, channels, &voices) {
            let _ = self.control_tx.send(ControlMsg::VoiceFinished(id));
        }
    }

    /// Tear down the control loop and output stream.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.control_loop.take() {
            let _ = self.control_tx.send(ControlMsg::Shutdown);
            let _ = handle.join();
        }
        self.output.stop();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Controller> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn nudge(&self) {
        let _ = self.control_tx.send(ControlMsg::Nudge);
    }
}

impl Drop for AmbientEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Control loop: waits for messages or the next scheduler deadline, then
/// executes everything due under the controller lock.
fn control_loop(
    inner: Arc<Mutex<Controller>>,
    control_rx: Receiver<ControlMsg>,
    safety_rx: Receiver<SafetyAdvisory>,
) {
    loop {
        let timeout = {
            let inner = inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .sched
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT)
        };

        crossbeam_channel::select! {
            recv(control_rx) -> msg => match msg {
                Ok(ControlMsg::VoiceFinished(id)) => {
                    inner.lock().unwrap_or_else(|e| e.into_inner()).on_voice_finished(id);
                }
                Ok(ControlMsg::Nudge) => {}
                Ok(ControlMsg::Shutdown) | Err(_) => break,
            },
            recv(safety_rx) -> advisory => {
                if let Ok(advisory) = advisory {
                    inner.lock().unwrap_or_else(|e| e.into_inner()).on_advisory(advisory);
                }
            }
            default(timeout) => {}
        }

        let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
        let due = inner.sched.due(Instant::now());
        for action in due {
            inner.apply_sched_action(action);
        }
    }
    log::debug!("control loop exited");
}
