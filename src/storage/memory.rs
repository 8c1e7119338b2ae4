//! In-memory storage backend.
//!
//! All state sits behind one mutex, so every trait method is atomic. No lock is
//! held across an await point.

use super::{PollRepository, VoteInsert};
use crate::error::PollError;
use crate::models::{
    NewPoll, OptionChanges, OptionId, Poll, PollFilter, PollId, PollOption, UserId, Vote,
    VoteId,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    next_poll_id: PollId,
    next_option_id: OptionId,
    next_vote_id: VoteId,
    polls: BTreeMap<PollId, Poll>,
    /// Keyed like the `(poll_id, voter_id)` unique constraint.
    votes: HashMap<(PollId, UserId), Vote>,
}

impl Inner {
    fn option_id(&mut self) -> OptionId {
        self.next_option_id += 1;
        self.next_option_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored vote rows for a poll, orphaned ones included.
    pub fn vote_rows(&self, poll_id: PollId) -> usize {
        self.lock()
            .votes
            .values()
            .filter(|v| v.poll_id == poll_id)
            .count()
    }

    /// Vote rows for one voter on one poll. At most one by construction.
    pub fn vote_rows_for(&self, poll_id: PollId, voter_id: UserId) -> usize {
        self.lock()
            .votes
            .values()
            .filter(|v| v.poll_id == poll_id && v.voter_id == voter_id)
            .count()
    }
}

#[async_trait]
impl PollRepository for MemoryStore {
    async fn insert_poll(&self, new: NewPoll) -> Result<Poll, PollError> {
        let mut inner = self.lock();
        inner.next_poll_id += 1;
        let id = inner.next_poll_id;
        let now = Utc::now().naive_utc();

        let options = new
            .options
            .into_iter()
            .map(|text| PollOption {
                id: inner.option_id(),
                poll_id: id,
                text,
            })
            .collect();

        let poll = Poll {
            id,
            title: new.title,
            owner_id: new.owner_id,
            is_active: false,
            created_at: now,
            updated_at: now,
            options,
        };
        inner.polls.insert(id, poll.clone());
        Ok(poll)
    }

    async fn find_poll(&self, id: PollId) -> Result<Option<Poll>, PollError> {
        Ok(self.lock().polls.get(&id).cloned())
    }

    async fn list_polls(&self, filter: PollFilter) -> Result<Vec<Poll>, PollError> {
        let inner = self.lock();
        let mut polls: Vec<Poll> = inner
            .polls
            .values()
            .filter(|p| !filter.active_only || p.is_active)
            .filter(|p| filter.owner_id.map_or(true, |owner| p.owner_id == owner))
            .cloned()
            .collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(polls)
    }

    async fn set_active(&self, id: PollId, active: bool) -> Result<Option<Poll>, PollError> {
        let mut inner = self.lock();
        Ok(inner.polls.get_mut(&id).map(|poll| {
            poll.is_active = active;
            poll.updated_at = Utc::now().naive_utc();
            poll.clone()
        }))
    }

    async fn update_title(&self, id: PollId, title: String) -> Result<Option<Poll>, PollError> {
        let mut inner = self.lock();
        Ok(inner.polls.get_mut(&id).map(|poll| {
            poll.title = title;
            poll.updated_at = Utc::now().naive_utc();
            poll.clone()
        }))
    }

    async fn apply_option_changes(
        &self,
        id: PollId,
        changes: OptionChanges,
    ) -> Result<Option<Poll>, PollError> {
        let mut inner = self.lock();
        if !inner.polls.contains_key(&id) {
            return Ok(None);
        }

        let new_ids: Vec<OptionId> = changes.insert.iter().map(|_| inner.option_id()).collect();

        let poll = match inner.polls.get_mut(&id) {
            Some(poll) => poll,
            None => return Ok(None),
        };
        poll.options.retain(|o| !changes.remove.contains(&o.id));
        for (option_id, text) in changes.update {
            if let Some(option) = poll.options.iter_mut().find(|o| o.id == option_id) {
                option.text = text;
            }
        }
        for (option_id, text) in new_ids.into_iter().zip(changes.insert) {
            poll.options.push(PollOption {
                id: option_id,
                poll_id: id,
                text,
            });
        }
        poll.updated_at = Utc::now().naive_utc();
        Ok(Some(poll.clone()))
    }

    async fn delete_poll(&self, id: PollId) -> Result<bool, PollError> {
        let mut inner = self.lock();
        let existed = inner.polls.remove(&id).is_some();
        inner.votes.retain(|(poll_id, _), _| *poll_id != id);
        Ok(existed)
    }

    async fn insert_vote(
        &self,
        poll_id: PollId,
        option_id: OptionId,
        voter_id: UserId,
    ) -> Result<VoteInsert, PollError> {
        let mut inner = self.lock();
        match inner.polls.get(&poll_id) {
            None => return Ok(VoteInsert::PollMissing),
            Some(poll) if !poll.is_active => return Ok(VoteInsert::PollInactive),
            Some(poll) if poll.option(option_id).is_none() => {
                return Ok(VoteInsert::OptionMissing)
            }
            Some(_) => {}
        }

        if let Some(prior) = inner.votes.get(&(poll_id, voter_id)) {
            return Ok(VoteInsert::Duplicate {
                prior_option_id: prior.option_id,
            });
        }

        inner.next_vote_id += 1;
        let vote = Vote {
            id: inner.next_vote_id,
            poll_id,
            option_id,
            voter_id,
        };
        inner.votes.insert((poll_id, voter_id), vote.clone());
        Ok(VoteInsert::Inserted(vote))
    }

    async fn find_vote(
        &self,
        poll_id: PollId,
        voter_id: UserId,
    ) -> Result<Option<Vote>, PollError> {
        Ok(self.lock().votes.get(&(poll_id, voter_id)).cloned())
    }

    async fn count_votes(&self, poll_id: PollId) -> Result<Vec<(OptionId, u64)>, PollError> {
        let inner = self.lock();
        let mut counts: BTreeMap<OptionId, u64> = BTreeMap::new();
        for vote in inner.votes.values().filter(|v| v.poll_id == poll_id) {
            *counts.entry(vote.option_id).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_poll(owner_id: UserId, title: &str, options: &[&str]) -> NewPoll {
        NewPoll {
            owner_id,
            title: title.to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[actix_rt::test]
    async fn test_insert_poll_starts_inactive() {
        let store = MemoryStore::new();
        let poll = store.insert_poll(new_poll(1, "T", &["A", "B"])).await.unwrap();

        assert!(!poll.is_active);
        assert_eq!(poll.options.len(), 2);
        assert_eq!(poll.options[0].text, "A");
        assert_eq!(poll.options[1].text, "B");
        assert_eq!(store.find_poll(poll.id).await.unwrap(), Some(poll));
    }

    #[actix_rt::test]
    async fn test_vote_unique_per_poll_and_voter() {
        let store = MemoryStore::new();
        let poll = store.insert_poll(new_poll(1, "T", &["A", "B"])).await.unwrap();
        let (a, b) = (poll.options[0].id, poll.options[1].id);

        assert_eq!(
            store.insert_vote(poll.id, a, 5).await.unwrap(),
            VoteInsert::PollInactive
        );

        store.set_active(poll.id, true).await.unwrap();
        assert!(matches!(
            store.insert_vote(poll.id, a, 5).await.unwrap(),
            VoteInsert::Inserted(_)
        ));
        assert_eq!(
            store.insert_vote(poll.id, b, 5).await.unwrap(),
            VoteInsert::Duplicate { prior_option_id: a }
        );
        assert_eq!(store.vote_rows_for(poll.id, 5), 1);
        assert_eq!(
            store.insert_vote(999, a, 5).await.unwrap(),
            VoteInsert::PollMissing
        );
    }

    #[actix_rt::test]
    async fn test_vote_for_removed_option_is_refused() {
        let store = MemoryStore::new();
        let poll = store.insert_poll(new_poll(1, "T", &["Red", "Blue"])).await.unwrap();
        let (red, blue) = (poll.options[0].id, poll.options[1].id);
        store.set_active(poll.id, true).await.unwrap();
        store
            .apply_option_changes(
                poll.id,
                OptionChanges {
                    update: vec![],
                    insert: vec!["Green".to_string()],
                    remove: vec![blue],
                },
            )
            .await
            .unwrap();

        assert_eq!(
            store.insert_vote(poll.id, blue, 5).await.unwrap(),
            VoteInsert::OptionMissing
        );
        assert_eq!(store.vote_rows_for(poll.id, 5), 0);
        assert!(matches!(
            store.insert_vote(poll.id, red, 5).await.unwrap(),
            VoteInsert::Inserted(_)
        ));
    }

    #[actix_rt::test]
    async fn test_option_changes_keep_votes() {
        let store = MemoryStore::new();
        let poll = store.insert_poll(new_poll(1, "T", &["Red", "Blue"])).await.unwrap();
        let (red, blue) = (poll.options[0].id, poll.options[1].id);
        store.set_active(poll.id, true).await.unwrap();
        store.insert_vote(poll.id, blue, 2).await.unwrap();

        let updated = store
            .apply_option_changes(
                poll.id,
                OptionChanges {
                    update: vec![(red, "Crimson".to_string())],
                    insert: vec!["Green".to_string()],
                    remove: vec![blue],
                },
            )
            .await
            .unwrap()
            .unwrap();

        let texts: Vec<&str> = updated.options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["Crimson", "Green"]);
        assert_eq!(store.vote_rows(poll.id), 1);
        assert_eq!(store.count_votes(poll.id).await.unwrap(), vec![(blue, 1)]);
    }

    #[actix_rt::test]
    async fn test_delete_cascades_votes() {
        let store = MemoryStore::new();
        let poll = store.insert_poll(new_poll(1, "T", &["A", "B"])).await.unwrap();
        store.set_active(poll.id, true).await.unwrap();
        store.insert_vote(poll.id, poll.options[0].id, 3).await.unwrap();

        assert!(store.delete_poll(poll.id).await.unwrap());
        assert!(!store.delete_poll(poll.id).await.unwrap());
        assert_eq!(store.vote_rows(poll.id), 0);
        assert_eq!(store.find_poll(poll.id).await.unwrap(), None);
    }

    #[actix_rt::test]
    async fn test_list_newest_first_with_filters() {
        let store = MemoryStore::new();
        let first = store.insert_poll(new_poll(1, "first", &["A", "B"])).await.unwrap();
        let second = store.insert_poll(new_poll(2, "second", &["A", "B"])).await.unwrap();
        let third = store.insert_poll(new_poll(1, "third", &["A", "B"])).await.unwrap();
        store.set_active(first.id, true).await.unwrap();
        store.set_active(third.id, true).await.unwrap();

        let all: Vec<PollId> = store
            .list_polls(PollFilter::default())
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(all, vec![third.id, second.id, first.id]);

        let active_mine: Vec<PollId> = store
            .list_polls(PollFilter {
                active_only: true,
                owner_id: Some(1),
            })
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(active_mine, vec![third.id, first.id]);
    }
}
