//! Mock collaborators for functional tests.
//!
//! `MockDriver` and `MockRuleExecutor` implement the production traits with
//! scripted responses, so tests exercise the same dyn-safe surface the
//! controller is wired with.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::DynamicObject;
use tokio::sync::oneshot;

use migration_operator::controller::error::{Error, Result};
use migration_operator::crd::{Migration, VolumeInfo};
use migration_operator::driver::VolumeDriver;
use migration_operator::rules::{Rule, RuleExecutor, RulePhase, TerminationSignal};

/// Volume driver with a scripted poll sequence and a cancel counter.
pub struct MockDriver {
    /// Status list returned by `start_migration`.
    pub initial: Vec<VolumeInfo>,
    /// Status lists returned by successive `get_migration_status` calls;
    /// the last entry repeats once exhausted.
    polls: Mutex<VecDeque<Vec<VolumeInfo>>>,
    pub cancels: AtomicUsize,
    pub starts: AtomicUsize,
}

impl MockDriver {
    pub fn new(initial: Vec<VolumeInfo>, polls: Vec<Vec<VolumeInfo>>) -> Self {
        Self {
            initial,
            polls: Mutex::new(polls.into()),
            cancels: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
        }
    }

    pub fn next_poll(&self) -> Vec<VolumeInfo> {
        let mut polls = self.polls.lock().unwrap();
        if polls.len() > 1 {
            polls.pop_front().unwrap()
        } else {
            polls.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl VolumeDriver for MockDriver {
    async fn start_migration(&self, _migration: &Migration) -> Result<Vec<VolumeInfo>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(self.initial.clone())
    }

    async fn get_migration_status(&self, _migration: &Migration) -> Result<Vec<VolumeInfo>> {
        Ok(self.next_poll())
    }

    async fn cancel_migration(&self, _migration: &Migration) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn owns_pvc(&self, _pvc: &PersistentVolumeClaim) -> bool {
        true
    }

    async fn update_migrated_persistent_volume_spec(
        &self,
        object: DynamicObject,
    ) -> Result<DynamicObject> {
        Ok(object)
    }
}

/// Rule executor that hands out termination signals and can be scripted to
/// fail in a specific namespace.
pub struct MockRuleExecutor {
    /// Namespace whose rule execution fails, if any.
    pub fail_in_namespace: Option<String>,
    /// Receivers for every signal handed out, in execution order.
    pub receivers: Mutex<Vec<oneshot::Receiver<()>>>,
    pub executions: AtomicUsize,
    pub recoveries: AtomicUsize,
}

impl MockRuleExecutor {
    pub fn new() -> Self {
        Self {
            fail_in_namespace: None,
            receivers: Mutex::new(Vec::new()),
            executions: AtomicUsize::new(0),
            recoveries: AtomicUsize::new(0),
        }
    }

    pub fn failing_in(namespace: &str) -> Self {
        Self {
            fail_in_namespace: Some(namespace.to_string()),
            ..Self::new()
        }
    }

    /// Whether every handed-out signal has fired.
    pub fn all_signals_fired(&self) -> bool {
        self.receivers
            .lock()
            .unwrap()
            .iter_mut()
            .all(|rx| rx.try_recv().is_ok())
    }
}

#[async_trait]
impl RuleExecutor for MockRuleExecutor {
    async fn get_rule(&self, name: &str, namespace: &str) -> Result<Rule> {
        Ok(Rule {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }

    async fn execute_rule(
        &self,
        _rule: &Rule,
        _phase: RulePhase,
        _migration: &Migration,
        namespace: &str,
    ) -> Result<Option<TerminationSignal>> {
        if self.fail_in_namespace.as_deref() == Some(namespace) {
            return Err(Error::Rule(format!("rule pod failed in {namespace}")));
        }
        self.executions.fetch_add(1, Ordering::SeqCst);
        let (signal, rx) = TerminationSignal::new();
        self.receivers.lock().unwrap().push(rx);
        Ok(Some(signal))
    }

    async fn perform_rule_recovery(&self, _migration: &Migration) -> Result<()> {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Build a VolumeInfo with the given status.
pub fn volume(name: &str, status: migration_operator::crd::MigrationState) -> VolumeInfo {
    VolumeInfo {
        volume: name.to_string(),
        namespace: "team-a".to_string(),
        pvc: format!("{name}-claim"),
        status,
        reason: String::new(),
    }
}
