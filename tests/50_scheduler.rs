mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::Fixture;

use mlm_hierarchy::config::{ScanCadence, SchedulerConfig};
use mlm_hierarchy::database::models::AmParent;
use mlm_hierarchy::database::HierarchyStore;
use mlm_hierarchy::hierarchy::ScanKind;
use mlm_hierarchy::scheduler::Scheduler;

fn only_am_promotion(cadence: ScanCadence) -> SchedulerConfig {
    SchedulerConfig {
        am_promotion: cadence,
        dm_promotion: ScanCadence::Disabled,
        demotion: ScanCadence::Disabled,
        ..SchedulerConfig::default()
    }
}

async fn promotable_am(fx: &Fixture) -> Result<()> {
    let am = fx.am(AmParent::Root).await?;
    fx.ams(AmParent::Am(am), 10).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn interval_cadence_runs_the_scan() -> Result<()> {
    let fx = Fixture::new();
    promotable_am(&fx).await?;

    let handle = Scheduler::new(fx.runner(), only_am_promotion(ScanCadence::Every(60)), fx.clock.clone()).start();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fx.directory().counts().await?.dm, 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(fx.directory().counts().await?.dm, 1);

    handle.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn daily_cadence_waits_for_its_time_of_day() -> Result<()> {
    let fx = Fixture::new();
    promotable_am(&fx).await?;

    // The fixture clock sits at midnight, so the next 00:00 is a day away.
    let handle = Scheduler::new(fx.runner(), only_am_promotion(ScanCadence::daily(0, 0)), fx.clock.clone()).start();

    tokio::time::sleep(Duration::from_secs(23 * 3600)).await;
    assert_eq!(fx.directory().counts().await?.dm, 0);

    tokio::time::sleep(Duration::from_secs(3600 + 1)).await;
    assert_eq!(fx.directory().counts().await?.dm, 1);

    handle.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn disabled_scans_never_run() -> Result<()> {
    let fx = Fixture::new();
    promotable_am(&fx).await?;

    let handle = Scheduler::new(fx.runner(), only_am_promotion(ScanCadence::Disabled), fx.clock.clone()).start();
    tokio::time::sleep(Duration::from_secs(7 * 24 * 3600)).await;
    assert_eq!(fx.directory().counts().await?.dm, 0);

    handle.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unreachable_period_ends_the_loop_without_panicking() -> Result<()> {
    let fx = Fixture::new();
    promotable_am(&fx).await?;

    // Built in code, so the parser's bound never saw it.
    let handle = Scheduler::new(fx.runner(), only_am_promotion(ScanCadence::Every(u64::MAX)), fx.clock.clone()).start();
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(fx.directory().counts().await?.dm, 0);

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn overlapping_run_of_the_same_scan_is_skipped() -> Result<()> {
    let fx = Fixture::new();
    promotable_am(&fx).await?;
    let runner = Arc::new(fx.runner());

    // An open transaction keeps the in-flight scan parked on the store.
    let held = fx.tx().await?;
    let in_flight = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run(ScanKind::AmPromotion).await }
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(runner.run(ScanKind::AmPromotion).await.is_none());

    drop(held);
    let report = in_flight.await?.expect("first run holds the guard");
    assert_eq!(report.transitions.len(), 1);

    // Guard released: the next run is admitted and finds nothing to do.
    let report = runner.run_am_promotion().await.expect("guard free again");
    assert!(report.transitions.is_empty());
    Ok(())
}

#[tokio::test]
async fn separate_runners_on_one_store_do_not_overlap() -> Result<()> {
    let fx = Fixture::new();
    promotable_am(&fx).await?;
    let daemon = Arc::new(fx.runner());
    let cli = fx.runner();

    let held = fx.tx().await?;
    let in_flight = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run(ScanKind::AmPromotion).await }
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(cli.run(ScanKind::AmPromotion).await.is_none());
    drop(held);
    let report = in_flight.await?.expect("first runner holds the lock");
    assert_eq!(report.transitions.len(), 1);

    let report = cli.run(ScanKind::AmPromotion).await.expect("lock released");
    assert!(report.transitions.is_empty());
    Ok(())
}

#[tokio::test]
async fn scan_lock_is_per_kind() -> Result<()> {
    let fx = Fixture::new();
    let lock = fx.store.try_scan_lock(ScanKind::DmPromotion).await?.expect("free");

    let runner = fx.runner();
    assert!(runner.run_dm_promotion().await.is_none());
    assert!(runner.run_am_promotion().await.is_some());

    lock.release().await?;
    assert!(runner.run_dm_promotion().await.is_some());
    Ok(())
}

#[tokio::test]
async fn manual_trigger_goes_through_the_running_scheduler() -> Result<()> {
    let fx = Fixture::new();
    promotable_am(&fx).await?;

    let handle = Scheduler::new(fx.runner(), SchedulerConfig::default(), fx.clock.clone()).start();
    let report = handle.runner().run_am_promotion().await.expect("no scheduled run in flight");
    assert_eq!(report.transitions.len(), 1);

    handle.stop().await;
    Ok(())
}
