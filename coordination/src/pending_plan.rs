//! Component E: queues an agent's write-intent tool calls for approval
//! before they touch the workspace.
//!
//! Grounded on `state/store.rs`'s single-active-record pattern (one active
//! session, replaced wholesale on `startPlan`-equivalent calls) and
//! `harness/session.rs`'s monotonic-order event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_events::{CoreEvent, EventBus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Approved,
    Rejected,
    PartiallyApproved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedChange {
    pub id: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub reason: String,
    pub order: u64,
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPlan {
    pub id: String,
    pub task: String,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub proposed_changes: Vec<ProposedChange>,
    pub exploration_summary: Option<String>,
    pub status: PlanStatus,
}

/// Result of `approve`: the changes released for application, and whether
/// every queued change was released.
pub struct ApprovalResult {
    pub released: Vec<ProposedChange>,
    pub all_approved: bool,
}

/// Owns at most one active plan. Grounded on the teacher's single-active-
/// session stores: starting a new plan clears whatever was active.
pub struct PendingPlanManager {
    active: Option<PendingPlan>,
    events: EventBus,
}

impl PendingPlanManager {
    pub fn new(events: EventBus) -> Self {
        Self { active: None, events }
    }

    pub fn active_plan(&self) -> Option<&PendingPlan> {
        self.active.as_ref()
    }

    /// Clears any active plan and starts a fresh one with status `pending`.
    pub fn start_plan(&mut self, task: impl Into<String>, session_id: Option<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        self.active = Some(PendingPlan {
            id: id.clone(),
            task: task.into(),
            session_id,
            created_at: now,
            updated_at: now,
            proposed_changes: Vec::new(),
            exploration_summary: None,
            status: PlanStatus::Pending,
        });
        self.events.publish(CoreEvent::PlanCreated { plan_id: id.clone() });
        id
    }

    /// Appends a proposed change with a monotonically increasing `order`.
    /// No-op (returns `None`) if there is no active plan.
    pub fn add_proposed_change(
        &mut self,
        tool: impl Into<String>,
        args: serde_json::Value,
        reason: impl Into<String>,
        tool_call_id: Option<String>,
    ) -> Option<String> {
        let plan = self.active.as_mut()?;
        let order = plan.proposed_changes.len() as u64;
        let id = uuid::Uuid::new_v4().to_string();
        plan.proposed_changes.push(ProposedChange {
            id: id.clone(),
            tool: tool.into(),
            args,
            reason: reason.into(),
            order,
            tool_call_id,
        });
        plan.updated_at = Utc::now();
        self.events.publish(CoreEvent::PlanChangeAdded { plan_id: plan.id.clone(), order });
        Some(id)
    }

    /// Returns the first `count` changes (or all, if `None`), clears the
    /// active plan, and marks it `approved` or `partially_approved`.
    pub fn approve(&mut self, count: Option<usize>) -> Option<ApprovalResult> {
        let mut plan = self.active.take()?;
        let total = plan.proposed_changes.len();
        let take = count.unwrap_or(total).min(total);
        let released: Vec<ProposedChange> = plan.proposed_changes.drain(..take).collect();
        let all_approved = released.len() == total;
        plan.status = if all_approved { PlanStatus::Approved } else { PlanStatus::PartiallyApproved };
        self.events.publish(CoreEvent::PlanApproved { plan_id: plan.id.clone() });
        self.events.publish(CoreEvent::PlanCleared { plan_id: plan.id });
        Some(ApprovalResult { released, all_approved })
    }

    /// Clears the active plan with status `rejected`.
    pub fn reject(&mut self) -> Option<PendingPlan> {
        let mut plan = self.active.take()?;
        plan.status = PlanStatus::Rejected;
        self.events.publish(CoreEvent::PlanRejected { plan_id: plan.id.clone() });
        self.events.publish(CoreEvent::PlanCleared { plan_id: plan.id.clone() });
        Some(plan)
    }

    /// Reinstalls a plan loaded from persistence, resuming change numbering
    /// from its current length. Replaces any currently active plan.
    pub fn restore_plan(&mut self, plan: PendingPlan) {
        self.active = Some(plan);
    }

    pub fn set_exploration_summary(&mut self, summary: impl Into<String>) {
        if let Some(plan) = self.active.as_mut() {
            plan.exploration_summary = Some(summary.into());
            plan.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> PendingPlanManager {
        PendingPlanManager::new(EventBus::new())
    }

    #[test]
    fn only_one_plan_is_active_at_a_time() {
        let mut mgr = manager();
        let first = mgr.start_plan("task a", None);
        let second = mgr.start_plan("task b", None);
        assert_ne!(first, second);
        assert_eq!(mgr.active_plan().unwrap().id, second);
    }

    #[test]
    fn add_proposed_change_orders_monotonically() {
        let mut mgr = manager();
        mgr.start_plan("task", None);
        mgr.add_proposed_change("edit_file", json!({"path": "a.rs"}), "fix bug", None);
        mgr.add_proposed_change("edit_file", json!({"path": "b.rs"}), "fix bug 2", None);
        let plan = mgr.active_plan().unwrap();
        assert_eq!(plan.proposed_changes[0].order, 0);
        assert_eq!(plan.proposed_changes[1].order, 1);
    }

    #[test]
    fn approve_all_clears_plan_and_marks_approved() {
        let mut mgr = manager();
        mgr.start_plan("task", None);
        mgr.add_proposed_change("edit_file", json!({}), "r", None);
        let result = mgr.approve(None).unwrap();
        assert!(result.all_approved);
        assert_eq!(result.released.len(), 1);
        assert!(mgr.active_plan().is_none());
    }

    #[test]
    fn partial_approve_releases_only_the_requested_count() {
        let mut mgr = manager();
        mgr.start_plan("task", None);
        mgr.add_proposed_change("edit_file", json!({}), "r1", None);
        mgr.add_proposed_change("edit_file", json!({}), "r2", None);
        let result = mgr.approve(Some(1)).unwrap();
        assert!(!result.all_approved);
        assert_eq!(result.released.len(), 1);
    }

    #[test]
    fn reject_clears_the_plan() {
        let mut mgr = manager();
        mgr.start_plan("task", None);
        let rejected = mgr.reject().unwrap();
        assert_eq!(rejected.status, PlanStatus::Rejected);
        assert!(mgr.active_plan().is_none());
    }

    #[test]
    fn restore_plan_resumes_change_numbering() {
        let mut mgr = manager();
        let plan = PendingPlan {
            id: "restored".to_string(),
            task: "task".to_string(),
            session_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            proposed_changes: vec![ProposedChange {
                id: "c1".to_string(),
                tool: "edit_file".to_string(),
                args: json!({}),
                reason: "r".to_string(),
                order: 0,
                tool_call_id: None,
            }],
            exploration_summary: None,
            status: PlanStatus::Pending,
        };
        mgr.restore_plan(plan);
        mgr.add_proposed_change("edit_file", json!({}), "r2", None);
        let active = mgr.active_plan().unwrap();
        assert_eq!(active.proposed_changes[1].order, 1);
    }
}
