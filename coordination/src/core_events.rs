//! The core's event stream: a sealed tagged union over a broadcast channel.
//!
//! Grounded on `events/bus.rs`'s `EventBus` (a `tokio::sync::broadcast::Sender`
//! wrapper with filtered subscription); generalized here to the event
//! vocabulary this orchestration core emits.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum CoreEvent {
    AgentSpawn {
        agent_name: String,
        task: String,
    },
    AgentComplete {
        agent_name: String,
        success: bool,
    },
    AgentError {
        agent_name: String,
        message: String,
    },
    AgentPendingPlan {
        agent_name: String,
        change_count: usize,
    },
    PolicyProfileResolved {
        profile_name: String,
        source: String,
    },
    PolicyLegacyFallbackUsed {
        field: String,
    },
    SubagentWrapupStarted {
        agent_name: String,
    },
    SubagentWrapupCompleted {
        agent_name: String,
    },
    SubagentTimeoutHardKill {
        agent_name: String,
    },
    ParallelSpawnStart {
        count: usize,
    },
    ParallelSpawnComplete {
        count: usize,
    },
    BudgetWarning {
        budget_type: String,
        percent: f64,
    },
    BudgetExceeded {
        budget_type: String,
    },
    ExtensionRequested {
        reason: String,
    },
    ExtensionGranted {
        reason: String,
    },
    ExtensionDenied {
        reason: String,
    },
    PhaseTransition {
        from: String,
        to: String,
    },
    ExplorationSaturation {
        unique_files_read: usize,
    },
    ProgressStuck {
        reason: String,
    },
    ProgressMade,
    SwarmOrchestratorDecision {
        decision: String,
        detail: String,
    },
    SwarmTaskSkipped {
        task_id: String,
        reason: String,
    },
    PlanCreated {
        plan_id: String,
    },
    PlanChangeAdded {
        plan_id: String,
        order: u64,
    },
    PlanApproved {
        plan_id: String,
    },
    PlanRejected {
        plan_id: String,
    },
    PlanCleared {
        plan_id: String,
    },
    CycleDetected {
        task_ids: Vec<String>,
    },
    DecomposeUnknownDependency {
        task_id: String,
        dependency_id: String,
    },
    PersistenceWarning {
        message: String,
    },
}

/// The core's event bus. Cloning is cheap (it clones the broadcast sender).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emits an event to all current subscribers. A send with zero
    /// subscribers is not an error; the event is simply dropped.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(CoreEvent::ProgressMade);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(CoreEvent::ProgressMade);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, CoreEvent::ProgressMade));
    }
}
