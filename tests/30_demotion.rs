mod common;

use anyhow::Result;
use chrono::Duration;
use common::Fixture;

use mlm_hierarchy::database::models::{CcmId, DmParent, NodeRef};
use mlm_hierarchy::database::HierarchyStore;
use mlm_hierarchy::hierarchy::{Clock, SkipReason, TransitionKind};

/// CCM with `dms` direct DMs and a tracker started now.
async fn tracked_ccm(fx: &Fixture, dms: usize) -> Result<CcmId> {
    let ccm = fx.ccm().await?;
    fx.dms(DmParent::Ccm(ccm), dms).await?;
    let mut tx = fx.tx().await?;
    tx.insert_tracker(ccm, fx.clock.now()).await?;
    tx.commit().await?;
    Ok(ccm)
}

#[tokio::test]
async fn demotion_waits_fifteen_days() -> Result<()> {
    let fx = Fixture::new();
    let ccm = tracked_ccm(&fx, 1).await?;

    fx.clock.advance(Duration::days(14));
    let report = fx.demotion().run_scan().await;
    assert!(report.transitions.is_empty());
    assert_eq!(report.skipped[0].reason, SkipReason::NotDue);
    assert!(fx.tx().await?.ccm(ccm).await?.is_some());

    fx.clock.advance(Duration::days(1));
    let report = fx.demotion().run_scan().await;
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].kind, TransitionKind::CcmToDm);
    assert!(fx.store.trackers().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn demoted_ccm_becomes_a_root_dm_over_its_dms() -> Result<()> {
    let fx = Fixture::new();
    let ccm = tracked_ccm(&fx, 1).await?;
    let original = fx.tx().await?.ccm(ccm).await?.expect("seeded CCM");
    let dms = fx.tx().await?.dm_ids_under_ccm(ccm).await?;

    fx.clock.advance(Duration::days(15));
    let report = fx.demotion().run_scan().await;
    let NodeRef::Dm(new_dm) = report.transitions[0].to else {
        panic!("demotion produced {}", report.transitions[0].to);
    };

    let mut tx = fx.tx().await?;
    assert!(tx.ccm(ccm).await?.is_none());
    let demoted = tx.dm(new_dm).await?.expect("demoted DM");
    assert_eq!(demoted.parent, DmParent::Root);
    assert_eq!(demoted.profile, original.profile);
    assert_eq!(tx.sub_dm_ids(new_dm).await?, dms);
    Ok(())
}

#[tokio::test]
async fn recovered_ccm_cancels_its_tracker() -> Result<()> {
    let fx = Fixture::new();
    let ccm = tracked_ccm(&fx, 1).await?;
    fx.dms(DmParent::Ccm(ccm), 9).await?;

    fx.clock.advance(Duration::days(2));
    let report = fx.demotion().run_scan().await;
    assert_eq!(report.skipped[0].reason, SkipReason::Recovered);
    assert!(fx.store.trackers().await?.is_empty());

    fx.clock.advance(Duration::days(30));
    let report = fx.demotion().run_scan().await;
    assert_eq!(report.examined, 0);
    assert!(fx.tx().await?.ccm(ccm).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn without_recovery_cancellation_the_tracker_waits() -> Result<()> {
    let fx = Fixture::new();
    let ccm = tracked_ccm(&fx, 10).await?;
    let engine = fx.demotion().with_recovery_cancellation(false);

    fx.clock.advance(Duration::days(20));
    let report = engine.run_scan().await;
    assert_eq!(report.skipped[0].reason, SkipReason::NotDue);
    assert_eq!(fx.store.trackers().await?.len(), 1);
    assert!(fx.tx().await?.ccm(ccm).await?.is_some());

    // Losing DMs again lets the pending tracker fire.
    let extra = fx.tx().await?.dm_ids_under_ccm(ccm).await?;
    fx.registry().delete_node(NodeRef::Dm(extra[0])).await?;
    let report = engine.run_scan().await;
    assert_eq!(report.transitions.len(), 1);
    Ok(())
}

#[tokio::test]
async fn tracker_for_a_deleted_ccm_is_cleaned_up() -> Result<()> {
    let fx = Fixture::new();
    let ccm = tracked_ccm(&fx, 1).await?;
    fx.registry().delete_node(NodeRef::Ccm(ccm)).await?;

    fx.clock.advance(Duration::days(15));
    let report = fx.demotion().run_scan().await;
    assert!(report.transitions.is_empty());
    assert_eq!(report.skipped[0].reason, SkipReason::StaleTracker);
    assert!(fx.store.trackers().await?.is_empty());
    assert_eq!(fx.directory().counts().await?.dm, 1);
    Ok(())
}

#[tokio::test]
async fn failed_demotion_leaves_ccm_and_tracker_intact() -> Result<()> {
    let fx = Fixture::new();
    let failing = tracked_ccm(&fx, 1).await?;
    let healthy = tracked_ccm(&fx, 1).await?;
    let dms = fx.tx().await?.dm_ids_under_ccm(failing).await?;

    fx.clock.advance(Duration::days(15));
    // New DM and the DM move succeed; deleting the CCM fails.
    fx.store.fail_after_writes(2).await;
    let report = fx.demotion().run_scan().await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].node, Some(NodeRef::Ccm(failing)));
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].from, NodeRef::Ccm(healthy));

    let trackers = fx.store.trackers().await?;
    assert_eq!(trackers.len(), 1);
    assert_eq!(trackers[0].ccm_id, failing);
    let mut tx = fx.tx().await?;
    assert!(tx.ccm(failing).await?.is_some());
    assert_eq!(tx.dm_ids_under_ccm(failing).await?, dms);
    assert_eq!(tx.dms().await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn promotion_then_demotion_round_trip() -> Result<()> {
    let fx = Fixture::new();
    let ccm = fx.ccm().await?;
    let dm = fx.dm(DmParent::Ccm(ccm)).await?;
    fx.dms(DmParent::Dm(dm), 2).await?;

    let runner = fx.runner();
    let reports = runner.run_all().await;
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[1].transitions[0].tracked, Some(ccm));

    fx.clock.advance(Duration::days(15));
    let report = runner.run_demotion().await.expect("no demotion scan in flight");
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].from, NodeRef::Ccm(ccm));

    let counts = fx.directory().counts().await?;
    assert_eq!((counts.ccm, counts.dm), (1, 3));
    Ok(())
}
