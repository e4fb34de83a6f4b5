use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use repcount_lib::{
    session::{Clock, SessionUpdate},
    AbandonChoice, AbandonPrompt, CompletedSet, CueSettings, CuePlayer, Database, ExerciseKind,
    HapticPulse, Notifier, RestNotification, SessionConfig, SessionController, SessionError,
    SessionStage, SetForm, SettingsStore, SoundCue, TrackingRecord, TrackingStore,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn new() -> Self {
        Self(Mutex::new(Utc.with_ymd_and_hms(2024, 9, 1, 17, 0, 0).unwrap()))
    }

    fn advance(&self, secs: i64) {
        *self.0.lock().unwrap() += chrono::Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Wall clock that follows tokio's (pausable) clock.
struct TokioClock {
    base: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap();
        self.base + elapsed
    }
}

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn schedule(&self, notification: &RestNotification) -> Result<()> {
        self.calls.lock().unwrap().push(format!(
            "schedule:{}:{}",
            notification.id, notification.after_secs
        ));
        Ok(())
    }

    fn cancel(&self, id: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("cancel:{id}"));
        Ok(())
    }

    fn cancel_all(&self) -> Result<()> {
        self.calls.lock().unwrap().push("cancel_all".into());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingCues {
    sounds: Mutex<Vec<SoundCue>>,
    pulses: Mutex<Vec<HapticPulse>>,
}

impl CuePlayer for RecordingCues {
    fn play(&self, cue: SoundCue) -> Result<()> {
        self.sounds.lock().unwrap().push(cue);
        Ok(())
    }

    fn pulse(&self, pulse: HapticPulse) -> Result<()> {
        self.pulses.lock().unwrap().push(pulse);
        Ok(())
    }
}

#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<TrackingRecord>>,
}

impl TrackingStore for MemoryStore {
    async fn create_tracking_record(&self, record: TrackingRecord) -> Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

struct FailingStore;

impl TrackingStore for FailingStore {
    async fn create_tracking_record(&self, _record: TrackingRecord) -> Result<()> {
        Err(anyhow!("backend unavailable"))
    }
}

struct Harness<S: TrackingStore> {
    controller: SessionController<S>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    cues: Arc<RecordingCues>,
    updates: broadcast::Receiver<SessionUpdate>,
    settings_path: PathBuf,
    _dir: TempDir,
}

fn config(total_sets: usize) -> SessionConfig {
    SessionConfig {
        exercise_id: "squat".into(),
        exercise_name: "Back Squat".into(),
        total_sets,
        planned_reps: 5,
        rest_secs: 60,
        kind: ExerciseKind::Normal,
    }
}

fn harness<S: TrackingStore>(store: Arc<S>, config: SessionConfig) -> Harness<S> {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    let clock = Arc::new(ManualClock::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let cues = Arc::new(RecordingCues::default());

    let controller = SessionController::new(
        config,
        "user-42",
        store,
        notifier.clone(),
        cues.clone(),
        Arc::new(SettingsStore::new(settings_path.clone())),
    )
    .unwrap()
    .with_clock(clock.clone())
    // ticks are driven by hand in these tests
    .with_tick_interval(Duration::from_secs(3600));

    let updates = controller.subscribe();
    Harness {
        controller,
        clock,
        notifier,
        cues,
        updates,
        settings_path,
        _dir: dir,
    }
}

async fn wait_for(
    updates: &mut broadcast::Receiver<SessionUpdate>,
    pred: impl Fn(&SessionUpdate) -> bool,
) -> SessionUpdate {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match updates.recv().await {
                Ok(update) if pred(&update) => return update,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(err) => panic!("update channel closed: {err}"),
            }
        }
    })
    .await
    .expect("timed out waiting for session update")
}

fn good_set() -> SetForm {
    SetForm::new("5", "100")
}

#[tokio::test]
async fn full_session_is_saved_to_database() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let mut h = harness(db.clone(), config(2));

    h.controller.start().await.unwrap();
    h.controller.complete_set(&good_set()).await.unwrap();
    assert!(h.controller.is_ticking());
    assert_eq!(h.notifier.calls(), vec!["schedule:squat-rest-2:60"]);

    h.clock.advance(61);
    assert!(!h.controller.tick().await);
    assert!(!h.controller.is_ticking());
    assert_eq!(
        h.controller.snapshot().await.state.stage(),
        SessionStage::Working(1)
    );

    h.controller
        .complete_set(&SetForm::new("4", "102,5"))
        .await
        .unwrap();

    let completed = wait_for(&mut h.updates, |u| matches!(u, SessionUpdate::Completed { .. })).await;
    let SessionUpdate::Completed { sets } = completed else {
        unreachable!()
    };
    assert_eq!(
        sets,
        vec![
            CompletedSet {
                reps: 5,
                weight: Some(100.0)
            },
            CompletedSet {
                reps: 4,
                weight: Some(102.5)
            },
        ]
    );

    let persisted = wait_for(&mut h.updates, |u| matches!(u, SessionUpdate::Persisted { .. })).await;
    let SessionUpdate::Persisted { record_id } = persisted else {
        unreachable!()
    };

    let records = db.list_tracking_records("user-42").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, record_id);
    assert_eq!(records[0].exercise_id, "squat");
    assert_eq!(records[0].exercise_name, "Back Squat");
    assert_eq!(records[0].sets().unwrap(), sets);
    assert_eq!(records[0].date, h.clock.now());
}

#[tokio::test]
async fn persistence_failure_is_a_notice_not_a_rollback() {
    let mut h = harness(Arc::new(FailingStore), config(1));
    h.controller.start().await.unwrap();
    h.controller.complete_set(&good_set()).await.unwrap();

    wait_for(&mut h.updates, |u| matches!(u, SessionUpdate::Completed { .. })).await;
    let notice = wait_for(&mut h.updates, |u| matches!(u, SessionUpdate::Notice { .. })).await;
    let SessionUpdate::Notice { message } = notice else {
        unreachable!()
    };
    assert!(message.contains("backend unavailable"));
    assert_eq!(
        h.controller.snapshot().await.state.stage(),
        SessionStage::Finished
    );
}

#[tokio::test]
async fn invalid_set_keeps_working_phase() {
    let store = Arc::new(MemoryStore::default());
    let h = harness(store, config(2));
    h.controller.start().await.unwrap();

    let err = h
        .controller
        .complete_set(&SetForm::new("12a", "50,3"))
        .await
        .unwrap_err();
    let errors = match err {
        SessionError::Validation(errors) => errors,
        other => panic!("expected validation error, got {other:?}"),
    };
    assert!(errors.reps.is_some());
    assert!(errors.weight.is_some());
    assert!(!h.controller.is_ticking());
    assert!(h.notifier.calls().is_empty());
    assert_eq!(
        h.controller.snapshot().await.state.stage(),
        SessionStage::Working(0)
    );
}

#[tokio::test]
async fn warning_cues_follow_settings_toggles() {
    let store = Arc::new(MemoryStore::default());
    let h = harness(store, config(3));
    h.controller.start().await.unwrap();
    h.controller.complete_set(&good_set()).await.unwrap();

    h.clock.advance(57);
    assert!(h.controller.tick().await);
    assert_eq!(*h.cues.sounds.lock().unwrap(), vec![SoundCue::RestWarning]);
    assert_eq!(*h.cues.pulses.lock().unwrap(), vec![HapticPulse::Warning]);

    h.controller.set_sound_enabled(false).await.unwrap();
    h.clock.advance(1);
    assert!(h.controller.tick().await);
    assert_eq!(h.cues.sounds.lock().unwrap().len(), 1);
    assert_eq!(h.cues.pulses.lock().unwrap().len(), 2);

    // the preference is written in the background
    let mut saved = CueSettings::default();
    for _ in 0..100 {
        saved = SettingsStore::new(h.settings_path.clone())
            .load()
            .await
            .unwrap();
        if !saved.sound_enabled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!saved.sound_enabled);
    assert!(saved.haptics_enabled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rapid_toggles_are_saved_in_order() {
    let store = Arc::new(MemoryStore::default());
    let mut h = harness(store, config(3));
    h.controller.start().await.unwrap();

    for _ in 0..5 {
        h.controller.set_sound_enabled(false).await.unwrap();
        h.controller.set_haptics_enabled(false).await.unwrap();
        h.controller.set_sound_enabled(true).await.unwrap();
    }

    let mut last = None;
    for _ in 0..15 {
        let saved = wait_for(&mut h.updates, |u| {
            matches!(u, SessionUpdate::SettingsSaved { .. } | SessionUpdate::Notice { .. })
        })
        .await;
        let SessionUpdate::SettingsSaved { cues } = saved else {
            panic!("settings save failed: {saved:?}");
        };
        last = Some(cues);
    }

    let expected = CueSettings {
        sound_enabled: true,
        haptics_enabled: false,
    };
    assert_eq!(last, Some(expected));
    let on_disk = SettingsStore::new(h.settings_path.clone())
        .load()
        .await
        .unwrap();
    assert_eq!(on_disk, expected);
}

#[tokio::test]
async fn start_applies_persisted_settings() {
    let store = Arc::new(MemoryStore::default());
    let h = harness(store, config(2));
    SettingsStore::new(h.settings_path.clone())
        .save(CueSettings {
            sound_enabled: false,
            haptics_enabled: false,
        })
        .await
        .unwrap();

    h.controller.start().await.unwrap();
    h.controller.complete_set(&good_set()).await.unwrap();
    h.clock.advance(58);
    h.controller.tick().await;
    h.clock.advance(2);
    h.controller.tick().await;

    assert!(h.cues.sounds.lock().unwrap().is_empty());
    assert!(h.cues.pulses.lock().unwrap().is_empty());
}

#[tokio::test]
async fn skip_rest_cancels_notification_once() {
    let store = Arc::new(MemoryStore::default());
    let h = harness(store, config(3));
    h.controller.start().await.unwrap();
    h.controller.complete_set(&good_set()).await.unwrap();

    h.controller.skip_rest().await.unwrap();
    assert!(!h.controller.is_ticking());
    assert_eq!(
        h.notifier.calls(),
        vec!["schedule:squat-rest-2:60", "cancel:squat-rest-2"]
    );
    assert_eq!(*h.cues.sounds.lock().unwrap(), vec![SoundCue::RestComplete]);

    assert!(h.controller.skip_rest().await.is_err());
    assert_eq!(
        h.controller.snapshot().await.state.stage(),
        SessionStage::Working(1)
    );
}

#[tokio::test]
async fn foreground_after_suspension_catches_up() {
    let store = Arc::new(MemoryStore::default());
    let h = harness(store, config(2));
    h.controller.start().await.unwrap();
    h.controller.complete_set(&good_set()).await.unwrap();

    h.clock.advance(20);
    h.controller.app_backgrounded().await.unwrap();
    h.clock.advance(3600);
    h.controller.app_foregrounded().await.unwrap();

    assert_eq!(h.notifier.calls().last().unwrap(), "cancel_all");
    assert!(!h.controller.is_ticking());
    let snapshot = h.controller.snapshot().await;
    assert_eq!(snapshot.state.stage(), SessionStage::Working(1));
    assert_eq!(snapshot.remaining_rest_secs, 0);
}

#[tokio::test]
async fn abandon_and_save_keeps_complete_sets() {
    let store = Arc::new(MemoryStore::default());
    let mut h = harness(store.clone(), config(4));
    h.controller.start().await.unwrap();
    assert_eq!(
        h.controller.abandon().await.unwrap(),
        AbandonPrompt::ConfirmDiscard
    );

    h.controller.complete_set(&good_set()).await.unwrap();
    assert_eq!(
        h.controller.abandon().await.unwrap(),
        AbandonPrompt::SaveOrDiscard
    );
    h.controller
        .resolve_abandon(AbandonChoice::Save)
        .await
        .unwrap();
    assert!(!h.controller.is_ticking());

    let completed = wait_for(&mut h.updates, |u| matches!(u, SessionUpdate::Completed { .. })).await;
    let SessionUpdate::Completed { sets } = completed else {
        unreachable!()
    };
    assert_eq!(sets.len(), 1);

    wait_for(&mut h.updates, |u| matches!(u, SessionUpdate::Persisted { .. })).await;
    let records = store.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].user_id, "user-42");
    assert_eq!(records[0].sets_data, r#"[{"reps":5,"weight":100.0}]"#);
}

#[tokio::test]
async fn discard_and_pre_start_cancel_persist_nothing() {
    let store = Arc::new(MemoryStore::default());
    let mut h = harness(store.clone(), config(2));
    h.controller.cancel_pre_start().await.unwrap();
    wait_for(&mut h.updates, |u| matches!(u, SessionUpdate::Abandoned)).await;
    assert!(h.controller.start().await.is_err());

    let mut h = harness(store.clone(), config(2));
    h.controller.start().await.unwrap();
    h.controller.complete_set(&good_set()).await.unwrap();
    h.controller
        .resolve_abandon(AbandonChoice::Discard)
        .await
        .unwrap();
    wait_for(&mut h.updates, |u| matches!(u, SessionUpdate::Abandoned)).await;
    assert!(h.notifier.calls().contains(&"cancel:squat-rest-2".to_string()));
    assert!(!h.controller.is_ticking());
    assert!(store.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn set_editor_amends_previous_set() {
    let store = Arc::new(MemoryStore::default());
    let h = harness(store, config(3));
    h.controller.start().await.unwrap();
    h.controller.complete_set(&good_set()).await.unwrap();

    h.controller.open_set_editor(0).await.unwrap();
    h.controller
        .submit_set_editor(&SetForm::new("6", "97,75"))
        .await
        .unwrap();

    let snapshot = h.controller.snapshot().await;
    assert_eq!(snapshot.state.results[0].reps, Some(6));
    assert_eq!(snapshot.state.results[0].weight, Some(97.75));
    assert!(snapshot.state.is_resting());
    assert!(h.controller.is_ticking());

    h.controller.shutdown();
    assert!(!h.controller.is_ticking());
}

#[tokio::test(start_paused = true)]
async fn background_ticker_ends_rest() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(2);
    cfg.rest_secs = 5;
    let cues = Arc::new(RecordingCues::default());

    let controller = SessionController::new(
        cfg,
        "user-42",
        Arc::new(MemoryStore::default()),
        Arc::new(RecordingNotifier::default()),
        cues.clone(),
        Arc::new(SettingsStore::new(dir.path().join("settings.json"))),
    )
    .unwrap()
    .with_clock(Arc::new(TokioClock {
        base: Utc.with_ymd_and_hms(2024, 9, 1, 17, 0, 0).unwrap(),
        started: tokio::time::Instant::now(),
    }));
    let mut updates = controller.subscribe();

    controller.start().await.unwrap();
    controller.complete_set(&good_set()).await.unwrap();

    let first = wait_for(&mut updates, |u| matches!(u, SessionUpdate::RestTick { .. })).await;
    assert!(matches!(first, SessionUpdate::RestTick { remaining_secs: 4 }));

    wait_for(&mut updates, |u| match u {
        SessionUpdate::StateChanged { snapshot } => {
            snapshot.state.stage() == SessionStage::Working(1)
        }
        _ => false,
    })
    .await;

    assert!(!controller.is_ticking());
    assert_eq!(
        *cues.sounds.lock().unwrap(),
        vec![
            SoundCue::RestWarning,
            SoundCue::RestWarning,
            SoundCue::RestWarning,
            SoundCue::RestComplete,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn next_rest_keeps_its_ticker_when_previous_rest_ends_concurrently() {
    for _ in 0..50 {
        let store = Arc::new(MemoryStore::default());
        let h = harness(store, config(3));
        h.controller.start().await.unwrap();
        h.controller.complete_set(&good_set()).await.unwrap();
        h.clock.advance(60);

        let ticker = h.controller.clone();
        let ending = tokio::spawn(async move { ticker.tick().await });

        let next = h.controller.clone();
        let completing = tokio::spawn(async move {
            loop {
                match next.complete_set(&good_set()).await {
                    Ok(()) => break,
                    Err(SessionError::InvalidTransition { .. }) => tokio::task::yield_now().await,
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
        });

        assert!(!ending.await.unwrap());
        completing.await.unwrap();

        assert!(matches!(
            h.controller.snapshot().await.state.stage(),
            SessionStage::Resting(1, _)
        ));
        assert!(h.controller.is_ticking());
        h.controller.shutdown();
    }
}
