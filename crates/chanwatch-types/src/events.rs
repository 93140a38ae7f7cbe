use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{AccountId, ProcessingId, ReviewDecision};

/// Inline actions attached to outbound messages.
///
/// Encoded as the short `verb:id` strings carried in Bot API callback data,
/// which is limited to 64 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewAction {
    /// Reviewer marks the work item processed.
    Processed(ProcessingId),
    /// Reviewer postpones the work item.
    Postponed(ProcessingId),
    /// Reviewer asks for the untruncated post text.
    ShowFull(ProcessingId),
    /// Admin starts re-authorization of a failed worker account.
    RepairAccount(AccountId),
}

impl ReviewAction {
    /// The reviewer decision carried by this action, if it is one.
    pub fn decision(&self) -> Option<(ProcessingId, ReviewDecision)> {
        match *self {
            Self::Processed(id) => Some((id, ReviewDecision::Processed)),
            Self::Postponed(id) => Some((id, ReviewDecision::Postponed)),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processed(id) => write!(f, "processed:{id}"),
            Self::Postponed(id) => write!(f, "postponed:{id}"),
            Self::ShowFull(id) => write!(f, "show_full:{id}"),
            Self::RepairAccount(id) => write!(f, "repair_account:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed callback data: {0}")]
pub struct MalformedAction(pub String);

impl FromStr for ReviewAction {
    type Err = MalformedAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (verb, id) = s.split_once(':').ok_or_else(|| MalformedAction(s.to_string()))?;
        let id: i64 = id.parse().map_err(|_| MalformedAction(s.to_string()))?;
        match verb {
            "processed" => Ok(Self::Processed(id)),
            "postponed" => Ok(Self::Postponed(id)),
            "show_full" => Ok(Self::ShowFull(id)),
            "repair_account" => Ok(Self::RepairAccount(id)),
            _ => Err(MalformedAction(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_callback_payloads() {
        assert_eq!("processed:42".parse(), Ok(ReviewAction::Processed(42)));
        assert_eq!("show_full:7".parse(), Ok(ReviewAction::ShowFull(7)));
        assert_eq!(ReviewAction::RepairAccount(3).to_string(), "repair_account:3");
    }

    #[test]
    fn rejects_garbage() {
        assert!("processed".parse::<ReviewAction>().is_err());
        assert!("processed:abc".parse::<ReviewAction>().is_err());
        assert!("approve:1".parse::<ReviewAction>().is_err());
    }

    #[test]
    fn only_review_verbs_carry_decisions() {
        assert_eq!(
            ReviewAction::Postponed(9).decision(),
            Some((9, ReviewDecision::Postponed))
        );
        assert_eq!(ReviewAction::ShowFull(9).decision(), None);
    }
}
