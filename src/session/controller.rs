use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    audio::CuePlayer,
    notifications::Notifier,
    settings::{CueSettings, SettingsStore},
    tracking::{TrackingRecord, TrackingStore},
};

use super::{
    engine::{AbandonChoice, AbandonPrompt, CompletedSession, SessionEffect, SessionOutcome},
    CompletedSet, SessionConfig, SessionEngine, SessionError, SessionSnapshot, SetForm,
};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Events for the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionUpdate {
    StateChanged { snapshot: SessionSnapshot },
    RestTick { remaining_secs: u64 },
    Completed { sets: Vec<CompletedSet> },
    Abandoned,
    Persisted { record_id: String },
    SettingsSaved { cues: CueSettings },
    Notice { message: String },
}

/// Drives a [`SessionEngine`]: owns the rest ticker and turns effect intents
/// into calls on the injected collaborators. Side effects never fail a
/// transition; their errors become [`SessionUpdate::Notice`].
///
/// Effects run while the engine lock is held, so they are applied in the
/// order the engine produced them.
pub struct SessionController<S: TrackingStore> {
    engine: Arc<Mutex<SessionEngine>>,
    ticker: Arc<StdMutex<Option<CancellationToken>>>,
    settings_writer: Arc<StdMutex<Option<mpsc::UnboundedSender<CueSettings>>>>,
    tick_interval: Duration,
    verbose_ticks: bool,
    user_id: Arc<str>,
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    cues: Arc<dyn CuePlayer>,
    settings: Arc<SettingsStore>,
    clock: Arc<dyn Clock>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl<S: TrackingStore> Clone for SessionController<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            ticker: self.ticker.clone(),
            settings_writer: self.settings_writer.clone(),
            tick_interval: self.tick_interval,
            verbose_ticks: self.verbose_ticks,
            user_id: self.user_id.clone(),
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            cues: self.cues.clone(),
            settings: self.settings.clone(),
            clock: self.clock.clone(),
            updates: self.updates.clone(),
        }
    }
}

impl<S: TrackingStore> SessionController<S> {
    pub fn new(
        config: SessionConfig,
        user_id: impl Into<String>,
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        cues: Arc<dyn CuePlayer>,
        settings: Arc<SettingsStore>,
    ) -> Result<Self> {
        let verbose_ticks = std::env::var("REPCOUNT_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let engine = SessionEngine::new(config, settings.cues())?;
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let user_id: String = user_id.into();

        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            ticker: Arc::new(StdMutex::new(None)),
            settings_writer: Arc::new(StdMutex::new(None)),
            tick_interval: Duration::from_secs(1),
            verbose_ticks,
            user_id: Arc::from(user_id),
            store,
            notifier,
            cues,
            settings,
            clock: Arc::new(SystemClock),
            updates,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let now = self.clock.now();
        self.engine.lock().await.snapshot(now)
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker_slot().is_some()
    }

    /// Loads the persisted cue preferences, then begins the first set.
    pub async fn start(&self) -> Result<(), SessionError> {
        match self.settings.load().await {
            Ok(cues) => self.engine.lock().await.apply_cue_settings(cues),
            Err(err) => warn!("Using default cue settings: {:#}", err),
        }
        self.apply(|engine, _| engine.start()).await?;
        info!("Workout session started for user {}", self.user_id);
        Ok(())
    }

    pub async fn complete_set(&self, form: &SetForm) -> Result<(), SessionError> {
        self.apply(|engine, now| engine.complete_set(form, now)).await
    }

    pub async fn skip_rest(&self) -> Result<(), SessionError> {
        self.apply(|engine, _| engine.skip_rest()).await
    }

    pub async fn abandon(&self) -> Result<AbandonPrompt, SessionError> {
        self.engine.lock().await.abandon()
    }

    pub async fn resolve_abandon(&self, choice: AbandonChoice) -> Result<(), SessionError> {
        self.apply(|engine, now| engine.resolve_abandon(choice, now))
            .await
    }

    pub async fn cancel_pre_start(&self) -> Result<(), SessionError> {
        self.apply(|engine, _| engine.cancel_pre_start()).await
    }

    pub async fn open_set_editor(&self, index: usize) -> Result<(), SessionError> {
        self.apply(|engine, _| engine.open_set_editor(index).map(|_| Vec::new()))
            .await
    }

    pub async fn close_set_editor(&self) -> Result<(), SessionError> {
        self.apply(|engine, _| {
            engine.close_set_editor();
            Ok(Vec::new())
        })
        .await
    }

    pub async fn submit_set_editor(&self, form: &SetForm) -> Result<(), SessionError> {
        self.apply(|engine, now| engine.submit_set_editor(form, now))
            .await
    }

    pub async fn set_sound_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.apply(|engine, _| Ok(engine.set_sound_enabled(enabled)))
            .await
    }

    pub async fn set_haptics_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.apply(|engine, _| Ok(engine.set_haptics_enabled(enabled)))
            .await
    }

    pub async fn app_foregrounded(&self) -> Result<(), SessionError> {
        self.apply(|engine, now| Ok(engine.app_foregrounded(now)))
            .await
    }

    pub async fn app_backgrounded(&self) -> Result<(), SessionError> {
        self.apply(|engine, now| Ok(engine.app_backgrounded(now)))
            .await
    }

    /// One countdown step. Returns `false` once the rest phase is over.
    pub async fn tick(&self) -> bool {
        let now = self.clock.now();
        let mut engine = self.engine.lock().await;
        let was_resting = engine.state().is_resting();
        let effects = engine.tick(now);
        let resting = engine.state().is_resting();
        let remaining = engine.state().remaining_rest_secs(now);

        if self.verbose_ticks {
            debug!("Rest tick: {}s remaining", remaining);
        }

        if resting {
            self.emit(SessionUpdate::RestTick {
                remaining_secs: remaining,
            });
        } else if was_resting {
            self.emit(SessionUpdate::StateChanged {
                snapshot: engine.snapshot(now),
            });
        }
        self.run_effects(effects);
        resting
    }

    /// Tears down timers and pending notifications when the screen goes away.
    pub fn shutdown(&self) {
        self.stop_ticker();
        if let Err(err) = self.notifier.cancel_all() {
            self.report("cancel notifications", err);
        }
    }

    async fn apply<F>(&self, action: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut SessionEngine, DateTime<Utc>) -> Result<Vec<SessionEffect>, SessionError>,
    {
        let now = self.clock.now();
        let mut engine = self.engine.lock().await;
        let effects = action(&mut *engine, now)?;

        self.emit(SessionUpdate::StateChanged {
            snapshot: engine.snapshot(now),
        });
        self.run_effects(effects);
        Ok(())
    }

    fn run_effects(&self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::PlaySound(cue) => {
                    if let Err(err) = self.cues.play(cue) {
                        self.report("play sound", err);
                    }
                }
                SessionEffect::Haptic(pulse) => {
                    if let Err(err) = self.cues.pulse(pulse) {
                        self.report("haptic pulse", err);
                    }
                }
                SessionEffect::ScheduleNotification(notification) => {
                    if let Err(err) = self.notifier.schedule(&notification) {
                        self.report("schedule rest notification", err);
                    }
                }
                SessionEffect::CancelNotification(id) => {
                    if let Err(err) = self.notifier.cancel(&id) {
                        self.report("cancel rest notification", err);
                    }
                }
                SessionEffect::CancelAllNotifications => {
                    if let Err(err) = self.notifier.cancel_all() {
                        self.report("cancel notifications", err);
                    }
                }
                SessionEffect::StartRestTicker => self.spawn_ticker(),
                SessionEffect::StopRestTicker => self.stop_ticker(),
                SessionEffect::PersistSession(session) => self.persist(session),
                SessionEffect::SaveSettings(cues) => self.queue_settings_save(cues),
                SessionEffect::SessionEnded(SessionOutcome::Finished(sets)) => {
                    info!("Workout session finished with {} sets", sets.len());
                    self.emit(SessionUpdate::Completed { sets });
                }
                SessionEffect::SessionEnded(SessionOutcome::Abandoned) => {
                    info!("Workout session abandoned");
                    self.emit(SessionUpdate::Abandoned);
                }
            }
        }
    }

    /// Best effort: the session has already ended locally.
    fn persist(&self, session: CompletedSession) {
        let record = match TrackingRecord::from_session(&self.user_id, &session) {
            Ok(record) => record,
            Err(err) => {
                self.report("prepare tracking record", err);
                return;
            }
        };

        let store = self.store.clone();
        let updates = self.updates.clone();
        tokio::spawn(async move {
            let record_id = record.id.clone();
            match store.create_tracking_record(record).await {
                Ok(()) => {
                    info!("Saved tracking record {}", record_id);
                    let _ = updates.send(SessionUpdate::Persisted { record_id });
                }
                Err(err) => {
                    error!("Failed to save tracking record {}: {:#}", record_id, err);
                    let _ = updates.send(SessionUpdate::Notice {
                        message: format!("Could not save your workout: {err}"),
                    });
                }
            }
        });
    }

    /// Saves go through a single writer task so they land on disk in the
    /// order they were made.
    fn queue_settings_save(&self, cues: CueSettings) {
        let mut writer = self
            .settings_writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(tx) = writer.as_ref() {
            if tx.send(cues).is_ok() {
                return;
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<CueSettings>();
        let settings = self.settings.clone();
        let updates = self.updates.clone();
        tokio::spawn(async move {
            while let Some(cues) = rx.recv().await {
                match settings.save(cues).await {
                    Ok(()) => {
                        let _ = updates.send(SessionUpdate::SettingsSaved { cues });
                    }
                    Err(err) => {
                        error!("Failed to save cue settings: {:#}", err);
                        let _ = updates.send(SessionUpdate::Notice {
                            message: "Could not save your sound settings.".into(),
                        });
                    }
                }
            }
        });

        if tx.send(cues).is_err() {
            warn!("Settings writer stopped before the save was queued");
        }
        *writer = Some(tx);
    }

    fn spawn_ticker(&self) {
        let mut slot = self.ticker_slot();
        if let Some(previous) = slot.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let controller = self.clone();
        let tick_interval = self.tick_interval;

        tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            // the first tick resolves immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        if !controller.tick().await {
                            break;
                        }
                    }
                }
            }
        });

        *slot = Some(token);
    }

    fn stop_ticker(&self) {
        if let Some(token) = self.ticker_slot().take() {
            token.cancel();
        }
    }

    fn ticker_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.ticker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report(&self, action: &str, err: anyhow::Error) {
        error!("Failed to {}: {:#}", action, err);
        self.emit(SessionUpdate::Notice {
            message: format!("Could not {action}."),
        });
    }

    fn emit(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }
}
