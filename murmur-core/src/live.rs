//! Live aggregates derived from presence records.

use crate::{Address, LiveActionRecord, SubjectId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// A presence action a viewer performs on a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveAction {
    View,
    TypingStart,
    TypingStop,
}

impl LiveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveAction::View => "view",
            LiveAction::TypingStart => "typing_start",
            LiveAction::TypingStop => "typing_stop",
        }
    }

    /// Typing actions take part in the last-action-wins typing fold.
    pub fn is_typing(&self) -> bool {
        matches!(self, LiveAction::TypingStart | LiveAction::TypingStop)
    }
}

impl fmt::Display for LiveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LiveAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(LiveAction::View),
            "typing_start" => Ok(LiveAction::TypingStart),
            "typing_stop" => Ok(LiveAction::TypingStop),
            other => Err(other.to_string()),
        }
    }
}

/// Viewer and typing sets for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerState {
    pub subject_id: SubjectId,
    pub viewers: BTreeSet<Address>,
    pub typing: BTreeSet<Address>,
    pub last_update: Timestamp,
}

impl ViewerState {
    /// An empty aggregate.
    pub fn empty(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            viewers: BTreeSet::new(),
            typing: BTreeSet::new(),
            last_update: Utc::now(),
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn typing_count(&self) -> usize {
        self.typing.len()
    }

    /// Apply one local action in place.
    pub fn apply(&mut self, actor: Address, action: LiveAction) {
        match action {
            LiveAction::View => {
                self.viewers.insert(actor);
            }
            LiveAction::TypingStart => {
                self.typing.insert(actor);
            }
            LiveAction::TypingStop => {
                self.typing.remove(&actor);
            }
        }
        self.last_update = Utc::now();
    }

    /// Derive the aggregate from scratch.
    ///
    /// The viewer set is every distinct actor with a `view` record. The typing
    /// set is every actor whose latest typing record is `typing_start`; on a
    /// timestamp tie the record that appears later in `records` wins. Records
    /// for other subjects are ignored.
    pub fn fold<'a, I>(subject_id: SubjectId, records: I) -> Self
    where
        I: IntoIterator<Item = &'a LiveActionRecord>,
    {
        let mut viewers = BTreeSet::new();
        let mut last_typing: HashMap<Address, (u64, LiveAction)> = HashMap::new();

        for record in records {
            if record.subject_id != subject_id {
                continue;
            }
            match record.action {
                LiveAction::View => {
                    viewers.insert(record.actor);
                }
                action => {
                    let entry = last_typing
                        .entry(record.actor)
                        .or_insert((record.timestamp, action));
                    if record.timestamp >= entry.0 {
                        *entry = (record.timestamp, action);
                    }
                }
            }
        }

        let typing = last_typing
            .into_iter()
            .filter(|(_, (_, action))| *action == LiveAction::TypingStart)
            .map(|(actor, _)| actor)
            .collect();

        Self {
            subject_id,
            viewers,
            typing,
            last_update: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    fn rec(subject: &str, actor: u8, action: LiveAction, ts: u64) -> LiveActionRecord {
        LiveActionRecord {
            subject_id: SubjectId::from(subject),
            action,
            actor: addr(actor),
            timestamp: ts,
            publisher: Address::ZERO,
            ledger_ref: None,
        }
    }

    #[test]
    fn test_fold_dedups_viewers() {
        let records = vec![
            rec("post-42", 1, LiveAction::View, 10),
            rec("post-42", 1, LiveAction::View, 20),
            rec("post-42", 2, LiveAction::View, 15),
        ];
        let state = ViewerState::fold(SubjectId::from("post-42"), &records);
        assert_eq!(state.viewer_count(), 2);
    }

    #[test]
    fn test_fold_typing_last_action_wins() {
        let records = vec![
            rec("s", 1, LiveAction::TypingStart, 10),
            rec("s", 1, LiveAction::TypingStop, 20),
            rec("s", 2, LiveAction::TypingStop, 5),
            rec("s", 2, LiveAction::TypingStart, 30),
            // out of order delivery: older start must not override newer stop
            rec("s", 3, LiveAction::TypingStop, 50),
            rec("s", 3, LiveAction::TypingStart, 40),
        ];
        let state = ViewerState::fold(SubjectId::from("s"), &records);
        assert_eq!(state.typing, BTreeSet::from([addr(2)]));
    }

    #[test]
    fn test_fold_ignores_other_subjects() {
        let records = vec![
            rec("a", 1, LiveAction::View, 1),
            rec("b", 2, LiveAction::View, 1),
        ];
        let state = ViewerState::fold(SubjectId::from("a"), &records);
        assert_eq!(state.viewers, BTreeSet::from([addr(1)]));
    }

    #[test]
    fn test_apply_local_actions() {
        let mut state = ViewerState::empty(SubjectId::from("s"));
        state.apply(addr(1), LiveAction::View);
        state.apply(addr(1), LiveAction::TypingStart);
        assert_eq!(state.typing_count(), 1);
        state.apply(addr(1), LiveAction::TypingStop);
        assert_eq!(state.typing_count(), 0);
        assert_eq!(state.viewer_count(), 1);
    }

    #[test]
    fn test_live_action_parse() {
        assert_eq!("typing_start".parse::<LiveAction>(), Ok(LiveAction::TypingStart));
        assert!("typing".parse::<LiveAction>().is_err());
        assert!(LiveAction::TypingStop.is_typing());
        assert!(!LiveAction::View.is_typing());
    }
}
