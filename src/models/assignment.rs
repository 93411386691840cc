use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Requested,
    Accepted,
    Rejected,
    PickedUp,
    Delivered,
    Cancelled,
    Expired,
}

impl AssignmentStatus {
    /// Requested, accepted and picked-up offers block a second offer for the
    /// same order.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AssignmentStatus::Requested | AssignmentStatus::Accepted | AssignmentStatus::PickedUp
        )
    }

    /// Counted against the courier's concurrent delivery cap.
    pub fn is_active_delivery(self) -> bool {
        matches!(self, AssignmentStatus::Accepted | AssignmentStatus::PickedUp)
    }

    /// Ended without the food arriving; the order needs another courier.
    pub fn ended_without_delivery(self) -> bool {
        matches!(
            self,
            AssignmentStatus::Rejected | AssignmentStatus::Cancelled | AssignmentStatus::Expired
        )
    }

    pub fn can_transition_to(self, next: AssignmentStatus) -> bool {
        use AssignmentStatus::*;

        matches!(
            (self, next),
            (Requested, Accepted)
                | (Requested, Rejected)
                | (Requested, Expired)
                | (Requested, Cancelled)
                | (Accepted, PickedUp)
                | (Accepted, Cancelled)
                | (PickedUp, Delivered)
                | (PickedUp, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Requested => "REQUESTED",
            AssignmentStatus::Accepted => "ACCEPTED",
            AssignmentStatus::Rejected => "REJECTED",
            AssignmentStatus::PickedUp => "PICKED_UP",
            AssignmentStatus::Delivered => "DELIVERED",
            AssignmentStatus::Cancelled => "CANCELLED",
            AssignmentStatus::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Courier or restaurant driven changes to an assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAction {
    Accept,
    Reject,
    Pickup,
    Deliver,
    Cancel,
}

impl AssignmentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentAction::Accept => "accept",
            AssignmentAction::Reject => "reject",
            AssignmentAction::Pickup => "pickup",
            AssignmentAction::Deliver => "deliver",
            AssignmentAction::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub restaurant_id: Uuid,
    pub status: AssignmentStatus,
    pub version: u64,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}
