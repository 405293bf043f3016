//! Closed enumerations shared across the query pipeline, the access gate,
//! and the activity engine. All of them have a stable wire form (lowercase
//! strings or small integers) and an explicit ordering where one exists.

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
    None,
}

impl Priority {
    /// Display order, most urgent first. `priority` ordering walks this
    /// enumeration; `-priority` walks it reversed.
    pub const ORDERED: [Priority; 5] = [
        Priority::Urgent,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::None,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "urgent" => Some(Priority::Urgent),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            "none" => Some(Priority::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::None => "none",
        }
    }

    pub fn rank(self) -> usize {
        Self::ORDERED.iter().position(|p| *p == self).unwrap_or(4)
    }

    pub fn rank_of(value: &str) -> usize {
        Priority::parse(value).map(Priority::rank).unwrap_or(4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateGroup {
    Backlog,
    Unstarted,
    Started,
    Completed,
    Cancelled,
    Triage,
}

impl StateGroup {
    /// Display order for grouped views. Triage states never appear in
    /// default listings, so the enumeration stops at cancelled.
    pub const ORDERED: [StateGroup; 5] = [
        StateGroup::Backlog,
        StateGroup::Unstarted,
        StateGroup::Started,
        StateGroup::Completed,
        StateGroup::Cancelled,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "backlog" => Some(StateGroup::Backlog),
            "unstarted" => Some(StateGroup::Unstarted),
            "started" => Some(StateGroup::Started),
            "completed" => Some(StateGroup::Completed),
            "cancelled" => Some(StateGroup::Cancelled),
            "triage" => Some(StateGroup::Triage),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StateGroup::Backlog => "backlog",
            StateGroup::Unstarted => "unstarted",
            StateGroup::Started => "started",
            StateGroup::Completed => "completed",
            StateGroup::Cancelled => "cancelled",
            StateGroup::Triage => "triage",
        }
    }

    pub fn rank_of(value: &str) -> usize {
        Self::ORDERED
            .iter()
            .position(|g| g.as_str() == value)
            .unwrap_or(Self::ORDERED.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Guest,
    Viewer,
    Member,
    Admin,
}

impl Role {
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            5 => Some(Role::Guest),
            10 => Some(Role::Viewer),
            15 => Some(Role::Member),
            20 => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        match self {
            Role::Guest => 5,
            Role::Viewer => 10,
            Role::Member => 15,
            Role::Admin => 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationType {
    Blocks,
    BlockedBy,
    RelatesTo,
    Duplicate,
}

impl RelationType {
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "blocks" => Ok(RelationType::Blocks),
            "blocked_by" => Ok(RelationType::BlockedBy),
            "relates_to" => Ok(RelationType::RelatesTo),
            "duplicate" => Ok(RelationType::Duplicate),
            other => Err(AppError::invalid_payload(format!(
                "unknown relation type '{other}'"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelationType::Blocks => "blocks",
            RelationType::BlockedBy => "blocked_by",
            RelationType::RelatesTo => "relates_to",
            RelationType::Duplicate => "duplicate",
        }
    }

    /// The relation type stored on the mirror row. `blocks`/`blocked_by`
    /// are maintained pairwise; the symmetric types mirror to themselves.
    pub fn inverse(self) -> Self {
        match self {
            RelationType::Blocks => RelationType::BlockedBy,
            RelationType::BlockedBy => RelationType::Blocks,
            RelationType::RelatesTo => RelationType::RelatesTo,
            RelationType::Duplicate => RelationType::Duplicate,
        }
    }

    /// Field name used on activity records for a row carrying this type.
    /// An item that blocks another reads as "blocking" in its timeline.
    pub fn activity_field(self) -> &'static str {
        match self {
            RelationType::Blocks => "blocking",
            RelationType::BlockedBy => "blocked_by",
            RelationType::RelatesTo => "relates_to",
            RelationType::Duplicate => "duplicate",
        }
    }
}

pub const COMMENT_ACCESS_INTERNAL: &str = "INTERNAL";
pub const COMMENT_ACCESS_EXTERNAL: &str = "EXTERNAL";

pub const ENTITY_WORK_ITEM: &str = "work_item";
pub const ENTITY_COMMENT: &str = "comment";
pub const ENTITY_ISSUE_ATTACHMENT: &str = "ISSUE_ATTACHMENT";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ranks_follow_display_order() {
        assert!(Priority::Urgent.rank() < Priority::High.rank());
        assert!(Priority::Low.rank() < Priority::None.rank());
        assert_eq!(Priority::rank_of("bogus"), Priority::None.rank());
    }

    #[test]
    fn role_round_trips_numeric_form() {
        for role in [Role::Guest, Role::Viewer, Role::Member, Role::Admin] {
            assert_eq!(Role::from_i16(role.as_i16()), Some(role));
        }
        assert_eq!(Role::from_i16(7), None);
    }

    #[test]
    fn blocked_by_and_blocks_are_mutual_inverses() {
        assert_eq!(RelationType::Blocks.inverse(), RelationType::BlockedBy);
        assert_eq!(RelationType::BlockedBy.inverse(), RelationType::Blocks);
        assert_eq!(RelationType::RelatesTo.inverse(), RelationType::RelatesTo);
    }
}
