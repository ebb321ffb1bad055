// Modlog domain models.
//
// Pure domain types with no Discord dependencies. The Discord layer posts
// these to the configured modlog channel and performs the platform-side
// unwinding when a timed case expires.

use crate::core::schedule::TimedItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Moderation actions a case can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseAction {
    Kick,
    Ban,
    Unban,
    BulkDelete,
    Mute,
    Unmute,
}

impl CaseAction {
    /// Stable integer used in storage.
    pub fn code(self) -> i64 {
        match self {
            CaseAction::Kick => 0,
            CaseAction::Ban => 1,
            CaseAction::Unban => 2,
            CaseAction::BulkDelete => 3,
            CaseAction::Mute => 4,
            CaseAction::Unmute => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<CaseAction> {
        match code {
            0 => Some(CaseAction::Kick),
            1 => Some(CaseAction::Ban),
            2 => Some(CaseAction::Unban),
            3 => Some(CaseAction::BulkDelete),
            4 => Some(CaseAction::Mute),
            5 => Some(CaseAction::Unmute),
            _ => None,
        }
    }
}

impl std::fmt::Display for CaseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaseAction::Kick => write!(f, "Kick"),
            CaseAction::Ban => write!(f, "Ban"),
            CaseAction::Unban => write!(f, "Unban"),
            CaseAction::BulkDelete => write!(f, "Bulk Delete"),
            CaseAction::Mute => write!(f, "Mute"),
            CaseAction::Unmute => write!(f, "Unmute"),
        }
    }
}

/// A moderation-log case. `expires_at` is set only for timed actions;
/// cases without one never enter the scheduler and are stored inactive
/// from the start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModlogCase {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub guild_id: u64,
    pub action: CaseAction,
    /// The moderator who took the action.
    pub user_id: u64,
    /// The member the action was taken against.
    pub target_id: u64,
    pub reason: Option<String>,
    /// Legacy projection: true once a timed case has been deactivated.
    /// Kept in storage for external readers.
    pub expired: bool,
}

impl TimedItem for ModlogCase {
    fn id(&self) -> i64 {
        self.id
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

/// Events published by the modlog subsystem.
#[derive(Debug, Clone)]
pub enum CaseEvent {
    Opened(ModlogCase),
    Edited(ModlogCase),
    Expired(ModlogCase),
}

// A fire from the scheduler always means the case's timer ran out.
impl From<ModlogCase> for CaseEvent {
    fn from(mut case: ModlogCase) -> Self {
        case.active = false;
        case.expired = true;
        CaseEvent::Expired(case)
    }
}

/// Per-guild modlog channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModlogConfig {
    pub guild_id: u64,
    pub enabled: bool,
    pub channel_id: Option<u64>,
}
