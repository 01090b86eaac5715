//! Background cadence for the transition scans.
//!
//! Each enabled scan gets its own task that sleeps until the next cadence
//! instant and then runs the scan to completion. A per-scan guard in the
//! runner and a per-scan lock in the store keep runs of the same scan from
//! overlapping, whether they start here, from a manual trigger or from
//! another process. A run that finds either taken is skipped, never queued.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{RulesConfig, ScanCadence, SchedulerConfig};
use crate::database::store::HierarchyStore;
use crate::hierarchy::{Clock, DemotionEngine, PromotionEngine, ScanKind, ScanReport, TransitionRules};

/// Runs scans behind per-scan re-entrancy guards.
pub struct ScanRunner {
    store: Arc<dyn HierarchyStore>,
    promotion: PromotionEngine,
    demotion: DemotionEngine,
    am_guard: Mutex<()>,
    dm_guard: Mutex<()>,
    demotion_guard: Mutex<()>,
}

impl ScanRunner {
    pub fn new(store: Arc<dyn HierarchyStore>, promotion: PromotionEngine, demotion: DemotionEngine) -> Self {
        Self {
            store,
            promotion,
            demotion,
            am_guard: Mutex::new(()),
            dm_guard: Mutex::new(()),
            demotion_guard: Mutex::new(()),
        }
    }

    pub fn from_config(
        store: Arc<dyn HierarchyStore>,
        clock: Arc<dyn Clock>,
        rules: &RulesConfig,
        scheduler: &SchedulerConfig,
    ) -> Self {
        let rules = TransitionRules::from_config(rules);
        let promotion = PromotionEngine::new(store.clone(), clock.clone(), rules.clone());
        let demotion = DemotionEngine::new(store.clone(), clock, rules)
            .with_recovery_cancellation(scheduler.recovery_cancels_demotion);
        Self::new(store, promotion, demotion)
    }

    /// Runs `kind` unless a run of the same scan is still in progress here
    /// or elsewhere, in which case it returns `None`. `None` is also returned
    /// when the store lock cannot be checked; that case is logged as an error.
    pub async fn run(&self, kind: ScanKind) -> Option<ScanReport> {
        let guard = match kind {
            ScanKind::AmPromotion => &self.am_guard,
            ScanKind::DmPromotion => &self.dm_guard,
            ScanKind::Demotion => &self.demotion_guard,
        };
        let Ok(_running) = guard.try_lock() else {
            warn!(scan = %kind, "Previous run still in progress, skipping");
            return None;
        };

        let lock = match self.store.try_scan_lock(kind).await {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                warn!(scan = %kind, "Scan is running in another process, skipping");
                return None;
            }
            Err(err) => {
                error!(scan = %kind, "Could not claim scan lock: {}", err);
                return None;
            }
        };

        let report = match kind {
            ScanKind::AmPromotion => self.promotion.run_am_scan().await,
            ScanKind::DmPromotion => self.promotion.run_dm_scan().await,
            ScanKind::Demotion => self.demotion.run_scan().await,
        };

        if let Err(err) = lock.release().await {
            warn!(scan = %kind, "Releasing scan lock failed: {}", err);
        }
        Some(report)
    }

    pub async fn run_am_promotion(&self) -> Option<ScanReport> {
        self.run(ScanKind::AmPromotion).await
    }

    pub async fn run_dm_promotion(&self) -> Option<ScanReport> {
        self.run(ScanKind::DmPromotion).await
    }

    pub async fn run_demotion(&self) -> Option<ScanReport> {
        self.run(ScanKind::Demotion).await
    }

    /// AM promotion, then DM promotion, then demotion.
    pub async fn run_all(&self) -> Vec<ScanReport> {
        let mut reports = Vec::new();
        for kind in [ScanKind::AmPromotion, ScanKind::DmPromotion, ScanKind::Demotion] {
            if let Some(report) = self.run(kind).await {
                reports.push(report);
            }
        }
        reports
    }
}

pub struct Scheduler {
    runner: Arc<ScanRunner>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(runner: ScanRunner, config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner: Arc::new(runner),
            config,
            clock,
        }
    }

    pub fn start(self) -> SchedulerHandle {
        let (stop, stop_rx) = watch::channel(false);
        let scans = [
            (ScanKind::AmPromotion, self.config.am_promotion),
            (ScanKind::DmPromotion, self.config.dm_promotion),
            (ScanKind::Demotion, self.config.demotion),
        ];

        let mut tasks = Vec::new();
        for (kind, cadence) in scans {
            if !cadence.is_enabled() {
                info!(scan = %kind, "Scan disabled");
                continue;
            }
            info!(scan = %kind, %cadence, "Scheduling scan");
            tasks.push(tokio::spawn(scan_loop(
                self.runner.clone(),
                self.clock.clone(),
                kind,
                cadence,
                stop_rx.clone(),
            )));
        }

        SchedulerHandle {
            runner: self.runner,
            stop,
            tasks,
        }
    }
}

async fn scan_loop(
    runner: Arc<ScanRunner>,
    clock: Arc<dyn Clock>,
    kind: ScanKind,
    cadence: ScanCadence,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        let Some(delay) = cadence.delay_from(clock.now()) else {
            error!(scan = %kind, %cadence, "Cadence has no next run time");
            break;
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => break,
        }

        // Fire-and-forget: the report is already logged by the engine.
        let _ = runner.run(kind).await;
    }
    info!(scan = %kind, "Scan loop stopped");
}

/// Running scheduler. Manual triggers go through the same guards as the
/// scheduled runs.
pub struct SchedulerHandle {
    runner: Arc<ScanRunner>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn runner(&self) -> Arc<ScanRunner> {
        self.runner.clone()
    }

    /// Signals every loop to stop and waits for them. A scan already in
    /// progress finishes first.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        for result in join_all(self.tasks).await {
            if let Err(err) = result {
                error!("Scan task ended abnormally: {}", err);
            }
        }
        info!("Scheduler stopped");
    }
}
