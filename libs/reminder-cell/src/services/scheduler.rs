//! Periodic driver for the reminder dispatcher.
//!
//! The timer spawns each tick as its own task so a slow pass never delays the
//! clock; a tick that finds another one still running is dropped and counted.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use shared_utils::Clock;

use crate::error::ReminderError;
use crate::models::{DispatchSummary, SchedulerConfig, SchedulerStatus};
use crate::services::dispatcher::ReminderDispatcher;

#[derive(Debug, Default)]
struct RunStats {
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    total_runs: u64,
    total_sent: u64,
    total_errors: u64,
    skipped_ticks: u64,
    last_error: Option<String>,
}

pub struct ReminderScheduler {
    dispatcher: Arc<ReminderDispatcher>,
    clock: Arc<dyn Clock>,
    config: RwLock<SchedulerConfig>,
    stats: Mutex<RunStats>,
    tick_guard: Mutex<()>,
    timer: StdMutex<Option<JoinHandle<()>>>,
}

impl ReminderScheduler {
    pub fn new(
        dispatcher: Arc<ReminderDispatcher>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            dispatcher,
            clock,
            config: RwLock::new(config),
            stats: Mutex::new(RunStats::default()),
            tick_guard: Mutex::new(()),
            timer: StdMutex::new(None),
        }
    }

    fn timer_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.timer_slot().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Starts the timer; the first tick fires immediately. Returns `false` when
    /// the scheduler is disabled, misconfigured or already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let config = self.config.read().await.clone();
        if !config.enabled {
            info!("Reminder scheduler disabled, not starting");
            return false;
        }
        if let Err(e) = config.validate() {
            error!("Reminder scheduler not started: {}", e);
            return false;
        }

        let mut slot = self.timer_slot();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("Reminder scheduler already running");
            return false;
        }

        let period = StdDuration::from_secs(config.interval_minutes.saturating_mul(60));
        let scheduler = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let scheduler = Arc::clone(&scheduler);
                tokio::spawn(async move {
                    scheduler.tick().await;
                });
            }
        }));

        info!("Reminder scheduler started, every {} minutes", config.interval_minutes);
        true
    }

    pub fn stop(&self) -> bool {
        match self.timer_slot().take() {
            Some(handle) => {
                handle.abort();
                info!("Reminder scheduler stopped");
                true
            }
            None => false,
        }
    }

    /// Runs one pass outside the timer. `None` when a pass is already in
    /// flight.
    pub async fn run_now(&self) -> Option<DispatchSummary> {
        self.tick().await
    }

    #[instrument(skip(self))]
    async fn tick(&self) -> Option<DispatchSummary> {
        let Ok(_running) = self.tick_guard.try_lock() else {
            warn!("Previous reminder pass still running, skipping this tick");
            self.stats.lock().await.skipped_ticks += 1;
            return None;
        };

        let config = self.config.read().await.clone();
        let started = self.clock.now();
        let result = self
            .dispatcher
            .dispatch(StdDuration::from_millis(config.send_delay_ms))
            .await;

        let mut stats = self.stats.lock().await;
        stats.total_runs += 1;
        stats.last_run = Some(started);
        stats.next_run = self
            .is_running()
            .then(|| self.clock.now() + Duration::minutes(config.interval_minutes as i64));

        let summary = match result {
            Ok(summary) => {
                stats.last_error = None;
                summary
            }
            Err(e) => {
                error!("Reminder pass failed: {}", e);
                stats.last_error = Some(e.to_string());
                DispatchSummary {
                    errors: 1,
                    ..Default::default()
                }
            }
        };
        stats.total_sent += summary.sent;
        stats.total_errors += summary.errors;

        Some(summary)
    }

    /// Swaps the configuration. A running timer is restarted on the new
    /// interval; counters are kept.
    pub async fn update_config(
        self: &Arc<Self>,
        config: SchedulerConfig,
    ) -> Result<SchedulerStatus, ReminderError> {
        config.validate()?;

        let was_enabled = {
            let mut current = self.config.write().await;
            let was_enabled = current.enabled;
            *current = config.clone();
            was_enabled
        };

        let was_running = self.stop();
        if config.enabled && (was_running || !was_enabled) {
            self.start().await;
        }
        if !config.enabled {
            self.stats.lock().await.next_run = None;
        }

        info!(
            "Reminder scheduler reconfigured: enabled={}, interval={}m, delay={}ms",
            config.enabled, config.interval_minutes, config.send_delay_ms
        );
        Ok(self.status().await)
    }

    pub async fn config(&self) -> SchedulerConfig {
        self.config.read().await.clone()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let config = self.config.read().await.clone();
        let stats = self.stats.lock().await;
        SchedulerStatus {
            enabled: config.enabled,
            is_running: self.is_running(),
            interval_minutes: config.interval_minutes,
            send_delay_ms: config.send_delay_ms,
            last_run: stats.last_run,
            next_run: stats.next_run,
            total_runs: stats.total_runs,
            total_sent: stats.total_sent,
            total_errors: stats.total_errors,
            skipped_ticks: stats.skipped_ticks,
            last_error: stats.last_error.clone(),
        }
    }
}
