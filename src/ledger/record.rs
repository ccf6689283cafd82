//! Moderation ledger records
//!
//! Cases are immutable once written. Warnings are not stored separately: a
//! [`Warning`] is a view over a [`Case`] whose action is [`CaseAction::Warn`].

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::StoreError;

/// Reason recorded when the moderator did not give one
pub const NO_REASON: &str = "No reason provided";

/// Kind of moderation action a case records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseAction {
    Kick,
    Ban,
    Softban,
    Hardban,
    Unban,
    Timeout,
    Warn,
}

impl CaseAction {
    pub const ALL: [Self; 7] = [
        Self::Kick,
        Self::Ban,
        Self::Softban,
        Self::Hardban,
        Self::Unban,
        Self::Timeout,
        Self::Warn,
    ];

    /// Stable name used as the stored column value and for display
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kick => "kick",
            Self::Ban => "ban",
            Self::Softban => "softban",
            Self::Hardban => "hardban",
            Self::Unban => "unban",
            Self::Timeout => "timeout",
            Self::Warn => "warn",
        }
    }
}

impl fmt::Display for CaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseAction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown case action `{s}`")))
    }
}

/// A case that has not been written yet
#[derive(Debug, Clone)]
pub struct NewCase {
    pub guild_id: u64,
    pub user_id: u64,
    pub moderator_id: u64,
    pub action: CaseAction,
    pub reason: String,
}

impl NewCase {
    /// Build a case, substituting [`NO_REASON`] for a missing or blank reason
    pub fn new(
        guild_id: u64,
        user_id: u64,
        moderator_id: u64,
        action: CaseAction,
        reason: Option<&str>,
    ) -> Self {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(NO_REASON)
            .to_string();
        Self {
            guild_id,
            user_id,
            moderator_id,
            action,
            reason,
        }
    }
}

/// One immutable audit record of a moderation action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub case_id: i64,
    pub guild_id: u64,
    pub user_id: u64,
    pub moderator_id: u64,
    pub action: CaseAction,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// A warning, projected from a warn case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub case_id: i64,
    pub guild_id: u64,
    pub user_id: u64,
    pub moderator_id: u64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<Case> for Warning {
    type Error = StoreError;

    fn try_from(case: Case) -> Result<Self, Self::Error> {
        if case.action != CaseAction::Warn {
            return Err(StoreError::Corrupt(format!(
                "case #{} is a {} case, not a warning",
                case.case_id, case.action
            )));
        }
        Ok(Self {
            case_id: case.case_id,
            guild_id: case.guild_id,
            user_id: case.user_id,
            moderator_id: case.moderator_id,
            reason: case.reason,
            timestamp: case.timestamp,
        })
    }
}

/// A ban that the unban command must refuse to lift
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardbanEntry {
    pub guild_id: u64,
    pub user_id: u64,
    pub moderator_id: u64,
    pub reason: String,
}

/// Outcome of toggling a member's protection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProtectionToggle {
    #[display("added")]
    Added,
    #[display("removed")]
    Removed,
}
