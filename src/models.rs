//! Domain types shared by the store, ledger and notifier.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type PollId = i32;
pub type OptionId = i32;
pub type VoteId = i32;
pub type UserId = i32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: OptionId,
    pub poll_id: PollId,
    pub text: String,
}

/// A poll with its options in insertion order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub title: String,
    pub owner_id: UserId,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub options: Vec<PollOption>,
}

impl Poll {
    pub fn option(&self, option_id: OptionId) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub poll_id: PollId,
    pub option_id: OptionId,
    pub voter_id: UserId,
}

/// Input to `PollRepository::insert_poll`. Texts are already validated.
#[derive(Clone, Debug)]
pub struct NewPoll {
    pub owner_id: UserId,
    pub title: String,
    pub options: Vec<String>,
}

/// One entry of an option edit. `id: None` is a new option.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionEdit {
    #[serde(default)]
    pub id: Option<OptionId>,
    pub text: String,
}

/// Reconciled difference between the stored options and an edit list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionChanges {
    pub update: Vec<(OptionId, String)>,
    pub insert: Vec<String>,
    pub remove: Vec<OptionId>,
}

/// Partial update of a poll. Absent fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PollPatch {
    pub title: Option<String>,
    pub options: Option<Vec<OptionEdit>>,
    #[serde(alias = "isActive")]
    pub is_active: Option<bool>,
}

impl PollPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.options.is_none() && self.is_active.is_none()
    }
}

/// Listing filter. `owner_id: None` means every owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollFilter {
    pub active_only: bool,
    pub owner_id: Option<UserId>,
}

/// Vote counts for one poll, zero-filled for options without votes.
///
/// Votes pointing at removed options are not counted, so `total` always
/// equals the sum of `per_option`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub per_option: BTreeMap<OptionId, u64>,
    pub total: u64,
}

impl Tally {
    pub fn from_counts(options: &[PollOption], counts: &[(OptionId, u64)]) -> Self {
        let mut per_option: BTreeMap<OptionId, u64> =
            options.iter().map(|o| (o.id, 0)).collect();

        for (option_id, count) in counts {
            if let Some(slot) = per_option.get_mut(option_id) {
                *slot += count;
            }
        }

        let total = per_option.values().sum();
        Self { per_option, total }
    }

    pub fn count(&self, option_id: OptionId) -> u64 {
        self.per_option.get(&option_id).copied().unwrap_or(0)
    }

    /// One more vote for `option_id`. Options not in the tally are ignored.
    pub fn with_vote(mut self, option_id: OptionId) -> Self {
        if let Some(slot) = self.per_option.get_mut(&option_id) {
            *slot += 1;
            self.total += 1;
        }
        self
    }
}

/// Current state of one poll as seen by a subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollState {
    pub poll: Poll,
    pub tally: Tally,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(id: OptionId, text: &str) -> PollOption {
        PollOption {
            id,
            poll_id: 1,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_tally_zero_fills_options() {
        let options = vec![option(1, "Red"), option(2, "Blue")];
        let tally = Tally::from_counts(&options, &[(1, 3)]);

        assert_eq!(tally.count(1), 3);
        assert_eq!(tally.count(2), 0);
        assert_eq!(tally.per_option.len(), 2);
        assert_eq!(tally.total, 3);
    }

    #[test]
    fn test_tally_skips_orphaned_votes() {
        let options = vec![option(1, "Red"), option(3, "Green")];
        let tally = Tally::from_counts(&options, &[(1, 1), (2, 2)]);

        assert!(!tally.per_option.contains_key(&2));
        assert_eq!(tally.total, 1);
        assert_eq!(tally.per_option.values().sum::<u64>(), tally.total);
    }

    #[test]
    fn test_with_vote_ignores_unknown_options() {
        let options = vec![option(1, "Red"), option(2, "Blue")];
        let tally = Tally::from_counts(&options, &[(1, 1)]).with_vote(2).with_vote(9);

        assert_eq!(tally.count(2), 1);
        assert_eq!(tally.total, 2);
        assert!(!tally.per_option.contains_key(&9));
    }
}
