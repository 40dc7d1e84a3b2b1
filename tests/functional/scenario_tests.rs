//! End-to-end stage-sequence scenarios for the Migration lifecycle.

use migration_operator::crd::{MigrationStage, MigrationState};

use crate::mock_collaborators::{MockDriver, volume};
use crate::mock_state::{MockMigrationState, resource};

use std::sync::atomic::Ordering;

/// Happy path: volumes and resources, two polls until both volumes settle.
#[test]
fn happy_path_volumes_and_resources() {
    crate::init_tracing();
    let driver = MockDriver::new(
        vec![
            volume("vol-1", MigrationState::InProgress),
            volume("vol-2", MigrationState::InProgress),
        ],
        vec![
            vec![
                volume("vol-1", MigrationState::Successful),
                volume("vol-2", MigrationState::InProgress),
            ],
            vec![
                volume("vol-1", MigrationState::Successful),
                volume("vol-2", MigrationState::Successful),
            ],
        ],
    );
    let mut state = MockMigrationState::new("team-a", &["team-a"], driver);
    state.apply_outcomes = vec![
        resource("Deployment", "web", MigrationState::Successful),
        resource("Service", "frontend", MigrationState::Successful),
        resource("PersistentVolumeClaim", "data", MigrationState::Successful),
    ];

    // First pass starts the driver and sees one volume still copying.
    state.step();
    assert_eq!(state.stage(), MigrationStage::Volumes);
    assert_eq!(state.state(), MigrationState::InProgress);
    assert_eq!(state.driver.starts.load(Ordering::SeqCst), 1);

    // Second pass settles the volumes and runs the resource phase.
    state.step();
    assert_eq!(state.stage(), MigrationStage::Final);
    assert_eq!(state.state(), MigrationState::Successful);

    // The driver is started exactly once across the whole lifecycle.
    assert_eq!(state.driver.starts.load(Ordering::SeqCst), 1);
}

/// A Migration outside the admin namespace may only list its own namespace.
#[test]
fn namespace_restriction_rejects_without_status_writes() {
    let driver = MockDriver::new(vec![], vec![]);
    let mut state = MockMigrationState::new("team-a", &["team-b"], driver);

    state.step();
    assert_eq!(state.rejections, 1);
    assert_eq!(state.stage(), MigrationStage::Initial);
    assert!(state.migration.status.is_none());
    assert_eq!(state.driver.starts.load(Ordering::SeqCst), 0);
}

/// The admin namespace may migrate arbitrary namespaces.
#[test]
fn admin_namespace_is_unrestricted() {
    let driver = MockDriver::new(vec![], vec![]);
    let mut state = MockMigrationState::new("kube-system", &["team-a", "team-b"], driver);

    state.step();
    assert_eq!(state.rejections, 0);
    assert_ne!(state.stage(), MigrationStage::Initial);
}

/// Storage readiness failure regresses the stage so the pre-rule reruns.
#[test]
fn pre_rule_regression_relaunches_rule() {
    let driver = MockDriver::new(
        vec![volume("vol-1", MigrationState::InProgress)],
        vec![vec![volume("vol-1", MigrationState::InProgress)]],
    );
    let mut state = MockMigrationState::new("team-a", &["team-a"], driver);
    state.migration.spec.pre_exec_rule = Some("quiesce".to_string());
    state.storage_ready = false;

    state.step();
    assert_eq!(state.stage(), MigrationStage::Initial);
    assert_eq!(state.rule_launches, 1);

    // Next resync launches the pre-rule again and reaches the volume stage.
    state.storage_ready = true;
    state.step();
    assert_eq!(state.rule_launches, 2);
    assert_eq!(state.stage(), MigrationStage::Volumes);
}

/// One failed volume fails the Migration terminally.
#[test]
fn failed_volume_finishes_failed() {
    let driver = MockDriver::new(
        vec![
            volume("vol-1", MigrationState::InProgress),
            volume("vol-2", MigrationState::InProgress),
        ],
        vec![vec![
            volume("vol-1", MigrationState::Successful),
            volume("vol-2", MigrationState::Failed),
        ]],
    );
    let mut state = MockMigrationState::new("team-a", &["team-a"], driver);

    state.step();
    assert_eq!(state.stage(), MigrationStage::Final);
    assert_eq!(state.state(), MigrationState::Failed);

    // Terminal: further passes change nothing.
    state.step();
    assert_eq!(state.stage(), MigrationStage::Final);
    assert_eq!(state.state(), MigrationState::Failed);
}

/// A single failed resource downgrades the result to PartialSuccess.
#[test]
fn partial_success_on_one_failed_resource() {
    let driver = MockDriver::new(vec![], vec![]);
    let mut state = MockMigrationState::new("team-a", &["team-a"], driver);
    state.apply_outcomes = (0..10)
        .map(|i| {
            let status = if i == 6 {
                MigrationState::Failed
            } else {
                MigrationState::Successful
            };
            resource("ConfigMap", &format!("cm-{i}"), status)
        })
        .collect();

    let visited = state.run_to_settled(5);
    assert_eq!(state.stage(), MigrationStage::Final);
    assert_eq!(state.state(), MigrationState::PartialSuccess);
    assert!(visited.iter().any(|(stage, _)| *stage == MigrationStage::Final));

    let failed: Vec<_> = state
        .migration
        .status
        .as_ref()
        .unwrap()
        .resources
        .iter()
        .filter(|r| r.status == MigrationState::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "cm-6");
}

/// Volumes excluded: the volume list stays empty through the lifecycle.
#[test]
fn include_volumes_false_skips_volume_stage() {
    let driver = MockDriver::new(vec![volume("vol-1", MigrationState::InProgress)], vec![]);
    let mut state = MockMigrationState::new("team-a", &["team-a"], driver);
    state.migration.spec.include_volumes = Some(false);
    state.apply_outcomes = vec![resource("ConfigMap", "settings", MigrationState::Successful)];

    // First pass skips to Applications, second finishes.
    state.step();
    assert_eq!(state.stage(), MigrationStage::Applications);
    assert_eq!(state.state(), MigrationState::Initial);
    state.step();
    assert_eq!(state.stage(), MigrationStage::Final);
    assert_eq!(state.state(), MigrationState::Successful);

    assert!(state.migration.status.as_ref().unwrap().volumes.is_none());
    assert_eq!(state.driver.starts.load(Ordering::SeqCst), 0);
}

/// Resources excluded: the Migration finishes after the volume stage.
#[test]
fn include_resources_false_finishes_after_volumes() {
    let driver = MockDriver::new(
        vec![volume("vol-1", MigrationState::InProgress)],
        vec![vec![volume("vol-1", MigrationState::Successful)]],
    );
    let mut state = MockMigrationState::new("team-a", &["team-a"], driver);
    state.migration.spec.include_resources = Some(false);

    state.run_to_settled(5);
    assert_eq!(state.stage(), MigrationStage::Final);
    assert_eq!(state.state(), MigrationState::Successful);
    assert!(state.migration.status.as_ref().unwrap().resources.is_empty());
}

/// A namespace that does not exist fails the Migration terminally.
#[test]
fn missing_namespace_fails_terminally() {
    let driver = MockDriver::new(vec![], vec![]);
    let mut state = MockMigrationState::new("team-a", &["team-a"], driver);
    state.missing_namespace = true;

    state.step();
    assert_eq!(state.stage(), MigrationStage::Final);
    assert_eq!(state.state(), MigrationState::Failed);
}

/// The driver cancel is invoked exactly once per deletion, guarded by the
/// finalizer: once the finalizer is gone no further cancel happens.
#[tokio::test]
async fn deletion_cancels_driver_work_once() {
    use migration_operator::controller::reconciler::FINALIZER;

    let driver = MockDriver::new(vec![volume("vol-1", MigrationState::InProgress)], vec![]);
    let mut state = MockMigrationState::new("team-a", &["team-a"], driver);
    state.migration.metadata.finalizers = Some(vec![FINALIZER.to_string()]);

    // First deletion event: finalizer present, cancel runs and the
    // finalizer is released.
    state.delete().await;
    assert_eq!(state.driver.cancels.load(Ordering::SeqCst), 1);
    assert!(state.migration.metadata.finalizers.is_none());

    // Redelivered deletion event: finalizer gone, no cancel.
    state.delete().await;
    assert_eq!(state.driver.cancels.load(Ordering::SeqCst), 1);
}
