//! Vote Ledger: the vote-once rule and tallies.
//!
//! The pre-insert reads pick the right error for the common cases. The
//! repository's atomic insert has the final word on activity, option
//! membership and uniqueness.

use crate::error::PollError;
use crate::models::{OptionId, Poll, PollId, Tally, UserId, Vote};
use crate::notifier::{ChangeNotifier, PollEvent};
use crate::retry::RetryPolicy;
use crate::storage::{PollRepository, VoteInsert};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of a successful vote: the stored row and the tally right after it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub vote: Vote,
    pub tally: Tally,
}

#[derive(Clone)]
pub struct VoteLedger {
    repo: Arc<dyn PollRepository>,
    notifier: ChangeNotifier,
    retry: RetryPolicy,
}

impl VoteLedger {
    pub fn new(repo: Arc<dyn PollRepository>, notifier: ChangeNotifier, retry: RetryPolicy) -> Self {
        Self {
            repo,
            notifier,
            retry,
        }
    }

    /// Checks, in order: the poll exists, it is active, the option is one of
    /// its options, and the voter has not voted in it yet.
    ///
    /// Runs under the poll's sequencer lock, so an option edit or deactivation
    /// cannot slip in between the checks and the insert.
    pub async fn cast_vote(
        &self,
        poll_id: PollId,
        option_id: OptionId,
        voter_id: UserId,
    ) -> Result<VoteReceipt, PollError> {
        let _guard = self.notifier.sequencer().lock(poll_id).await;

        let poll = self.load(poll_id).await?;
        if !poll.is_active {
            return Err(PollError::Inactive);
        }
        if poll.option(option_id).is_none() {
            return Err(PollError::InvalidOption);
        }
        let before = self.tally_of(&poll).await?;

        // Single attempt: the unique constraint decides, and a retry after an
        // unacknowledged commit would report the voter's own vote as a duplicate.
        let vote = match self.repo.insert_vote(poll_id, option_id, voter_id).await? {
            VoteInsert::Inserted(vote) => vote,
            VoteInsert::Duplicate { prior_option_id } => {
                return Err(already_voted(&poll, prior_option_id));
            }
            VoteInsert::PollInactive => return Err(PollError::Inactive),
            VoteInsert::PollMissing => return Err(PollError::NotFound("poll")),
            VoteInsert::OptionMissing => return Err(PollError::InvalidOption),
        };

        // The vote is stored. From here on a failed read costs accuracy only.
        let tally = match self.tally_of(&poll).await {
            Ok(tally) => tally,
            Err(err) => {
                log::warn!(
                    "Recount of poll {} after a vote failed, using the previous tally plus one: {}",
                    poll_id,
                    err
                );
                before.with_vote(option_id)
            }
        };

        self.notifier
            .publish(PollEvent::VoteCast {
                poll_id,
                owner_id: poll.owner_id,
                option_id,
                tally: tally.clone(),
            })
            .await;

        log::debug!("User {} voted in poll {}", voter_id, poll_id);
        Ok(VoteReceipt { vote, tally })
    }

    /// Counts per current option, zero-filled.
    pub async fn tally(&self, poll_id: PollId) -> Result<Tally, PollError> {
        let poll = self.load(poll_id).await?;
        self.tally_of(&poll).await
    }

    /// The option the voter chose, even if it has since been removed.
    pub async fn vote_of(
        &self,
        poll_id: PollId,
        voter_id: UserId,
    ) -> Result<Option<OptionId>, PollError> {
        let repo = &self.repo;
        let vote = self
            .retry
            .run("find vote", || repo.find_vote(poll_id, voter_id))
            .await?;
        Ok(vote.map(|v| v.option_id))
    }

    async fn load(&self, poll_id: PollId) -> Result<Poll, PollError> {
        let repo = &self.repo;
        self.retry
            .run("load poll", || repo.find_poll(poll_id))
            .await?
            .ok_or(PollError::NotFound("poll"))
    }

    async fn tally_of(&self, poll: &Poll) -> Result<Tally, PollError> {
        let repo = &self.repo;
        let counts = self
            .retry
            .run("count votes", || repo.count_votes(poll.id))
            .await?;
        Ok(Tally::from_counts(&poll.options, &counts))
    }
}

fn already_voted(poll: &Poll, prior_option_id: OptionId) -> PollError {
    PollError::AlreadyVoted {
        prior_option_id,
        prior_option_text: poll.option(prior_option_id).map(|o| o.text.clone()),
    }
}
