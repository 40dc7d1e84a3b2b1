//! Rule engine contract and termination signalling.
//!
//! Pre/post-exec rules are user-defined hooks run inside the target
//! namespaces around the volume cutover. Executing a rule may fork a
//! long-lived background helper; the engine then hands back a
//! [`TerminationSignal`] that bounds the helper's lifetime. The controller
//! owns every signal it receives and fires them all once volume migration
//! has been accepted by the driver, and again on any failure unwind.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::controller::error::Result;
use crate::crd::Migration;

/// Whether a rule runs before or after the volume cutover.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RulePhase {
    Pre,
    Post,
}

/// Handle to a rule resolved in a specific namespace. The engine re-reads
/// the rule's body at execution time; the controller only needs identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rule {
    pub name: String,
    pub namespace: String,
}

/// One-shot stop capability for a background helper started by a rule.
///
/// `fire` is idempotent: the sender is consumed on first use and later
/// fires are no-ops, so every exit path may fire unconditionally.
#[derive(Debug)]
pub struct TerminationSignal {
    tx: Option<oneshot::Sender<()>>,
}

impl TerminationSignal {
    /// Create a signal and the receiver the background helper waits on.
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Stop the helper. Safe to call any number of times.
    pub fn fire(&mut self) {
        if let Some(tx) = self.tx.take() {
            // The helper may already be gone; a dead receiver is fine.
            let _ = tx.send(());
        }
    }

    pub fn is_fired(&self) -> bool {
        self.tx.is_none()
    }
}

/// The set of termination signals collected while launching pre-exec rules.
///
/// Dropping the set fires every remaining signal, so helpers cannot outlive
/// the volume stage no matter which path unwinds it.
#[derive(Debug, Default)]
pub struct TerminationChannels {
    signals: Vec<TerminationSignal>,
}

impl TerminationChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, signal: TerminationSignal) {
        self.signals.push(signal);
    }

    /// Fire every held signal and forget them.
    pub fn fire_all(&mut self) {
        for signal in &mut self.signals {
            signal.fire();
        }
        self.signals.clear();
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

impl Drop for TerminationChannels {
    fn drop(&mut self) {
        self.fire_all();
    }
}

/// Rule engine capability set.
#[async_trait]
pub trait RuleExecutor: Send + Sync {
    /// Resolve a named rule in a namespace.
    async fn get_rule(&self, name: &str, namespace: &str) -> Result<Rule>;

    /// Execute a rule for one namespace of a Migration. A background
    /// execution returns the signal that terminates it.
    async fn execute_rule(
        &self,
        rule: &Rule,
        phase: RulePhase,
        migration: &Migration,
        namespace: &str,
    ) -> Result<Option<TerminationSignal>>;

    /// Clean up rule state orphaned by a controller restart.
    async fn perform_rule_recovery(&self, migration: &Migration) -> Result<()>;
}
