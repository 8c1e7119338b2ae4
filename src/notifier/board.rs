//! Client-side view of the polls in one scope.

use super::{PollEvent, Scope};
use crate::models::{PollId, PollState, Tally};
use std::collections::BTreeMap;

/// Reducer over a subscription's events.
///
/// Applying the same event twice leaves the board unchanged: snapshots replace
/// everything and vote deltas carry the full tally.
#[derive(Clone, Debug, Default)]
pub struct PollBoard {
    scope: Option<Scope>,
    polls: BTreeMap<PollId, PollState>,
}

impl PollBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &PollEvent) {
        match event {
            PollEvent::Snapshot { scope, polls } => {
                self.scope = Some(*scope);
                self.polls = polls.iter().map(|s| (s.poll.id, s.clone())).collect();
            }
            PollEvent::PollCreated { poll } => {
                self.polls
                    .entry(poll.id)
                    .and_modify(|s| s.poll = poll.clone())
                    .or_insert_with(|| PollState {
                        poll: poll.clone(),
                        tally: Tally::from_counts(&poll.options, &[]),
                    });
            }
            PollEvent::PollActivated { state } => {
                self.polls.insert(state.poll.id, state.clone());
            }
            PollEvent::PollDeactivated { poll_id, .. } => {
                if self.scope == Some(Scope::Global) {
                    self.polls.remove(poll_id);
                } else if let Some(state) = self.polls.get_mut(poll_id) {
                    state.poll.is_active = false;
                }
            }
            PollEvent::PollDeleted { poll_id, .. } => {
                self.polls.remove(poll_id);
            }
            PollEvent::PollUpdated { poll } => {
                // Unknown polls wait for the next snapshot.
                if let Some(state) = self.polls.get_mut(&poll.id) {
                    let counts: Vec<_> = state
                        .tally
                        .per_option
                        .iter()
                        .map(|(id, n)| (*id, *n))
                        .collect();
                    state.tally = Tally::from_counts(&poll.options, &counts);
                    state.poll = poll.clone();
                }
            }
            PollEvent::VoteCast { poll_id, tally, .. } => {
                if let Some(state) = self.polls.get_mut(poll_id) {
                    state.tally = tally.clone();
                }
            }
        }
    }

    pub fn get(&self, poll_id: PollId) -> Option<&PollState> {
        self.polls.get(&poll_id)
    }

    /// Newest first, like the store's listings.
    pub fn polls(&self) -> Vec<&PollState> {
        let mut polls: Vec<&PollState> = self.polls.values().collect();
        polls.sort_by(|a, b| {
            b.poll
                .created_at
                .cmp(&a.poll.created_at)
                .then(b.poll.id.cmp(&a.poll.id))
        });
        polls
    }

    pub fn len(&self) -> usize {
        self.polls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Poll, PollOption};
    use chrono::Utc;

    fn state(id: PollId, votes: &[(i32, u64)]) -> PollState {
        let now = Utc::now().naive_utc();
        let options = vec![
            PollOption { id: 1, poll_id: id, text: "Red".into() },
            PollOption { id: 2, poll_id: id, text: "Blue".into() },
        ];
        let tally = Tally::from_counts(&options, votes);
        PollState {
            poll: Poll {
                id,
                title: "T".into(),
                owner_id: 7,
                is_active: true,
                created_at: now,
                updated_at: now,
                options,
            },
            tally,
        }
    }

    #[test]
    fn test_vote_delta_is_idempotent() {
        let mut board = PollBoard::new();
        board.apply(&PollEvent::Snapshot {
            scope: Scope::Poll(1),
            polls: vec![state(1, &[])],
        });

        let vote = PollEvent::VoteCast {
            poll_id: 1,
            owner_id: 7,
            option_id: 1,
            tally: state(1, &[(1, 1)]).tally,
        };
        board.apply(&vote);
        board.apply(&vote);

        let tally = &board.get(1).unwrap().tally;
        assert_eq!(tally.count(1), 1);
        assert_eq!(tally.total, 1);
    }

    #[test]
    fn test_deactivation_hides_from_global_only() {
        let deactivated = PollEvent::PollDeactivated { poll_id: 1, owner_id: 7 };

        let mut global = PollBoard::new();
        global.apply(&PollEvent::Snapshot {
            scope: Scope::Global,
            polls: vec![state(1, &[])],
        });
        global.apply(&deactivated);
        assert!(global.is_empty());

        let mut owner = PollBoard::new();
        owner.apply(&PollEvent::Snapshot {
            scope: Scope::Owner(7),
            polls: vec![state(1, &[(2, 3)])],
        });
        owner.apply(&deactivated);
        let kept = owner.get(1).unwrap();
        assert!(!kept.poll.is_active);
        assert_eq!(kept.tally.count(2), 3);
    }

    #[test]
    fn test_option_edit_drops_removed_counts() {
        let mut board = PollBoard::new();
        board.apply(&PollEvent::Snapshot {
            scope: Scope::Poll(1),
            polls: vec![state(1, &[(1, 1), (2, 2)])],
        });

        let mut poll = state(1, &[]).poll;
        poll.options.retain(|o| o.id == 1);
        poll.options.push(PollOption { id: 3, poll_id: 1, text: "Green".into() });
        board.apply(&PollEvent::PollUpdated { poll });

        let tally = &board.get(1).unwrap().tally;
        assert_eq!(tally.count(1), 1);
        assert_eq!(tally.count(3), 0);
        assert!(!tally.per_option.contains_key(&2));
        assert_eq!(tally.total, 1);
    }
}
