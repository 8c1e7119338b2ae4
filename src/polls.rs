//! Poll Store: lifecycle of polls and their options.
//!
//! Every mutation takes the poll's sequencer lock, writes through the
//! repository and publishes the matching event before releasing the lock.

use crate::app_config::LimitsConfig;
use crate::auth::{self, Identity};
use crate::error::PollError;
use crate::models::{
    NewPoll, OptionChanges, OptionEdit, OptionId, Poll, PollFilter, PollId, PollPatch, PollState,
    Tally, UserId,
};
use crate::notifier::{ChangeNotifier, PollEvent};
use crate::retry::RetryPolicy;
use crate::storage::PollRepository;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct PollStore {
    repo: Arc<dyn PollRepository>,
    notifier: ChangeNotifier,
    retry: RetryPolicy,
    limits: LimitsConfig,
}

impl PollStore {
    pub fn new(
        repo: Arc<dyn PollRepository>,
        notifier: ChangeNotifier,
        retry: RetryPolicy,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            repo,
            notifier,
            retry,
            limits,
        }
    }

    /// Creates an inactive poll owned by the caller.
    pub async fn create_poll(
        &self,
        caller: &Identity,
        title: &str,
        options: Vec<String>,
    ) -> Result<Poll, PollError> {
        let title = normalize_title(title, &self.limits)?;
        let options = normalize_options(options, &self.limits)?;

        // Not retried: a lost acknowledgement would create the poll twice.
        let poll = self
            .repo
            .insert_poll(NewPoll {
                owner_id: caller.user_id,
                title,
                options,
            })
            .await?;

        let _guard = self.notifier.sequencer().lock(poll.id).await;
        self.notifier
            .publish(PollEvent::PollCreated { poll: poll.clone() })
            .await;

        log::info!("Poll {} created by user {}", poll.id, caller.user_id);
        Ok(poll)
    }

    /// Activating an active poll (or deactivating an inactive one) changes
    /// nothing and publishes nothing.
    pub async fn set_active(
        &self,
        poll_id: PollId,
        caller: &Identity,
        active: bool,
    ) -> Result<Poll, PollError> {
        let patch = PollPatch {
            is_active: Some(active),
            ..PollPatch::default()
        };
        self.update_poll(poll_id, caller, patch).await
    }

    pub async fn update_title(
        &self,
        poll_id: PollId,
        caller: &Identity,
        title: &str,
    ) -> Result<Poll, PollError> {
        let patch = PollPatch {
            title: Some(title.to_string()),
            ..PollPatch::default()
        };
        self.update_poll(poll_id, caller, patch).await
    }

    /// Reconciles the poll's options against `edits`: entries with an id
    /// rename that option, entries without one are added, and stored options
    /// missing from the list are removed. Votes for removed options stay in
    /// the store but no longer count.
    pub async fn update_options(
        &self,
        poll_id: PollId,
        caller: &Identity,
        edits: Vec<OptionEdit>,
    ) -> Result<Poll, PollError> {
        let patch = PollPatch {
            options: Some(edits),
            ..PollPatch::default()
        };
        self.update_poll(poll_id, caller, patch).await
    }

    /// Applies a title, option and activity change as one unit.
    ///
    /// Everything is validated and authorized before the first write, so a
    /// rejected patch leaves the poll untouched and publishes nothing. Title
    /// and option edits publish one `PollUpdated`, followed by the activation
    /// event if the flag changed.
    pub async fn update_poll(
        &self,
        poll_id: PollId,
        caller: &Identity,
        patch: PollPatch,
    ) -> Result<Poll, PollError> {
        if patch.is_empty() {
            return Err(PollError::Validation("nothing to update".to_string()));
        }
        let title = match patch.title.as_deref() {
            Some(title) => Some(normalize_title(title, &self.limits)?),
            None => None,
        };

        let _guard = self.notifier.sequencer().lock(poll_id).await;
        let mut poll = self.load(poll_id).await?;
        authorize_mutation(caller, &poll)?;

        let title = title.filter(|title| *title != poll.title);
        let changes = match patch.options {
            Some(edits) => reconcile_options(&poll, edits, &self.limits)?,
            None => OptionChanges::default(),
        };
        let active = patch.is_active.filter(|active| *active != poll.is_active);

        let (edited, written) = self.apply_edits(&mut poll, title, changes).await;
        if edited {
            self.notifier
                .publish(PollEvent::PollUpdated { poll: poll.clone() })
                .await;
        }
        written?;

        if let Some(active) = active {
            poll = self.apply_active(poll, active).await?;
            log::info!(
                "Poll {} {} by user {}",
                poll_id,
                if active { "activated" } else { "deactivated" },
                caller.user_id
            );
        }
        Ok(poll)
    }

    /// Deletes the poll with its options and votes.
    pub async fn delete_poll(&self, poll_id: PollId, caller: &Identity) -> Result<(), PollError> {
        let guard = self.notifier.sequencer().lock(poll_id).await;
        let poll = self.load(poll_id).await?;
        authorize_mutation(caller, &poll)?;

        let repo = &self.repo;
        if !self
            .retry
            .run("delete poll", || repo.delete_poll(poll_id))
            .await?
        {
            return Err(PollError::NotFound("poll"));
        }

        self.notifier
            .publish(PollEvent::PollDeleted {
                poll_id,
                owner_id: poll.owner_id,
                was_active: poll.is_active,
            })
            .await;
        drop(guard);
        self.notifier.sequencer().forget(poll_id);

        log::info!("Poll {} deleted by user {}", poll_id, caller.user_id);
        Ok(())
    }

    /// Inactive polls are only visible to those who may manage them.
    pub async fn get_poll(
        &self,
        poll_id: PollId,
        viewer: Option<&Identity>,
    ) -> Result<Poll, PollError> {
        let poll = self.load(poll_id).await?;
        if poll.is_active || auth::can_view_hidden(viewer, &poll) {
            Ok(poll)
        } else {
            Err(PollError::NotFound("poll"))
        }
    }

    /// Active polls, newest first.
    pub async fn list_active_polls(&self, owner_id: Option<UserId>) -> Result<Vec<Poll>, PollError> {
        let filter = PollFilter {
            active_only: true,
            owner_id,
        };
        let repo = &self.repo;
        self.retry.run("list polls", || repo.list_polls(filter)).await
    }

    /// Every poll of one owner, inactive ones included. Owner or admin only.
    pub async fn list_polls_for(
        &self,
        caller: &Identity,
        owner_id: UserId,
    ) -> Result<Vec<Poll>, PollError> {
        if !caller.is_admin() && caller.user_id != owner_id {
            return Err(PollError::Authorization);
        }
        let filter = PollFilter {
            active_only: false,
            owner_id: Some(owner_id),
        };
        let repo = &self.repo;
        self.retry.run("list polls", || repo.list_polls(filter)).await
    }

    /// Writes the title and option edits. The flag tells whether anything was
    /// written, which can be true even when the result is an error; `poll`
    /// always reflects what was written.
    async fn apply_edits(
        &self,
        poll: &mut Poll,
        title: Option<String>,
        changes: OptionChanges,
    ) -> (bool, Result<(), PollError>) {
        let poll_id = poll.id;
        let mut edited = false;

        if let Some(title) = title {
            let repo = &self.repo;
            let updated = self
                .retry
                .run("update poll title", || repo.update_title(poll_id, title.clone()))
                .await;
            match updated {
                Ok(Some(updated)) => *poll = updated,
                Ok(None) => return (edited, Err(PollError::NotFound("poll"))),
                Err(err) => return (edited, Err(err)),
            }
            edited = true;
        }

        if changes != OptionChanges::default() {
            // Not retried: inserted options would be duplicated.
            match self.repo.apply_option_changes(poll_id, changes).await {
                Ok(Some(updated)) => *poll = updated,
                Ok(None) => return (edited, Err(PollError::NotFound("poll"))),
                Err(err) => {
                    if edited {
                        log::warn!("Poll {} kept its new title but not its options: {}", poll_id, err);
                    }
                    return (edited, Err(err));
                }
            }
            edited = true;
        }

        (edited, Ok(()))
    }

    async fn apply_active(&self, poll: Poll, active: bool) -> Result<Poll, PollError> {
        let poll_id = poll.id;
        // Counted first so nothing can fail between the write and the publish.
        let tally = if active {
            Some(self.tally_of(&poll).await?)
        } else {
            None
        };

        let repo = &self.repo;
        let poll = self
            .retry
            .run("set poll active", || repo.set_active(poll_id, active))
            .await?
            .ok_or(PollError::NotFound("poll"))?;

        let event = match tally {
            Some(tally) => PollEvent::PollActivated {
                state: PollState {
                    poll: poll.clone(),
                    tally,
                },
            },
            None => PollEvent::PollDeactivated {
                poll_id,
                owner_id: poll.owner_id,
            },
        };
        self.notifier.publish(event).await;
        Ok(poll)
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

/// Managers pass. Others learn nothing about a hidden poll.
fn authorize_mutation(caller: &Identity, poll: &Poll) -> Result<(), PollError> {
    if auth::can_manage(caller, poll) {
        Ok(())
    } else if poll.is_active {
        Err(PollError::Authorization)
    } else {
        Err(PollError::NotFound("poll"))
    }
}

pub fn normalize_title(title: &str, limits: &LimitsConfig) -> Result<String, PollError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PollError::Validation("title must not be empty".to_string()));
    }
    if title.chars().count() > limits.max_title_length {
        return Err(PollError::Validation(format!(
            "title must be at most {} characters",
            limits.max_title_length
        )));
    }
    Ok(title.to_string())
}

fn check_option_text(text: &str, limits: &LimitsConfig) -> Result<(), PollError> {
    if text.chars().count() > limits.max_option_length {
        return Err(PollError::Validation(format!(
            "options must be at most {} characters",
            limits.max_option_length
        )));
    }
    Ok(())
}

fn check_option_count(count: usize, limits: &LimitsConfig) -> Result<(), PollError> {
    if count < 2 {
        return Err(PollError::Validation(
            "a poll needs at least two options".to_string(),
        ));
    }
    if count > limits.max_options {
        return Err(PollError::Validation(format!(
            "a poll can have at most {} options",
            limits.max_options
        )));
    }
    Ok(())
}

/// Case-insensitive duplicate check over trimmed texts.
fn check_unique<'a>(texts: impl IntoIterator<Item = &'a str>) -> Result<(), PollError> {
    let mut seen = HashSet::new();
    for text in texts {
        if !seen.insert(text.to_lowercase()) {
            return Err(PollError::Validation(format!(
                "duplicate option \"{}\"",
                text
            )));
        }
    }
    Ok(())
}

/// Trims texts and drops blank ones.
pub fn normalize_options(
    options: Vec<String>,
    limits: &LimitsConfig,
) -> Result<Vec<String>, PollError> {
    let options: Vec<String> = options
        .iter()
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .collect();

    for text in &options {
        check_option_text(text, limits)?;
    }
    check_unique(options.iter().map(String::as_str))?;
    check_option_count(options.len(), limits)?;
    Ok(options)
}

/// Diff an edit list against the stored options. Blank entries are dropped,
/// so blanking an existing option removes it.
pub fn reconcile_options(
    poll: &Poll,
    edits: Vec<OptionEdit>,
    limits: &LimitsConfig,
) -> Result<OptionChanges, PollError> {
    let edits: Vec<OptionEdit> = edits
        .into_iter()
        .map(|edit| OptionEdit {
            id: edit.id,
            text: edit.text.trim().to_string(),
        })
        .filter(|edit| !edit.text.is_empty())
        .collect();

    for edit in &edits {
        check_option_text(&edit.text, limits)?;
    }
    check_unique(edits.iter().map(|e| e.text.as_str()))?;
    check_option_count(edits.len(), limits)?;

    let mut changes = OptionChanges::default();
    let mut kept: HashSet<OptionId> = HashSet::new();

    for edit in edits {
        match edit.id {
            Some(id) => {
                let current = poll.option(id).ok_or(PollError::InvalidOption)?;
                if !kept.insert(id) {
                    return Err(PollError::Validation(format!(
                        "option {} listed twice",
                        id
                    )));
                }
                if current.text != edit.text {
                    changes.update.push((id, edit.text));
                }
            }
            None => changes.insert.push(edit.text),
        }
    }

    changes.remove = poll
        .options
        .iter()
        .map(|o| o.id)
        .filter(|id| !kept.contains(id))
        .collect();

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PollOption;
    use chrono::Utc;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            max_title_length: 10,
            max_option_length: 5,
            max_options: 3,
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn poll_with(options: &[(OptionId, &str)]) -> Poll {
        let now = Utc::now().naive_utc();
        Poll {
            id: 1,
            title: "T".into(),
            owner_id: 1,
            is_active: true,
            created_at: now,
            updated_at: now,
            options: options
                .iter()
                .map(|(id, text)| PollOption {
                    id: *id,
                    poll_id: 1,
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    fn edit(id: Option<OptionId>, text: &str) -> OptionEdit {
        OptionEdit {
            id,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_title_is_trimmed_and_bounded() {
        assert_eq!(normalize_title("  Lunch ", &limits()).unwrap(), "Lunch");
        assert!(matches!(
            normalize_title("   ", &limits()),
            Err(PollError::Validation(_))
        ));
        assert!(matches!(
            normalize_title("far too long title", &limits()),
            Err(PollError::Validation(_))
        ));
    }

    #[test]
    fn test_options_need_two_distinct_texts() {
        assert_eq!(
            normalize_options(texts(&[" A ", "", "B"]), &limits()).unwrap(),
            texts(&["A", "B"])
        );
        assert!(matches!(
            normalize_options(texts(&["A", "  "]), &limits()),
            Err(PollError::Validation(_))
        ));
        assert!(matches!(
            normalize_options(texts(&["Red", "red"]), &limits()),
            Err(PollError::Validation(_))
        ));
        assert!(matches!(
            normalize_options(texts(&["A", "B", "C", "D"]), &limits()),
            Err(PollError::Validation(_))
        ));
    }

    #[test]
    fn test_reconcile_update_insert_remove() {
        let poll = poll_with(&[(1, "Red"), (2, "Blue"), (3, "Cyan")]);
        let changes = reconcile_options(
            &poll,
            vec![edit(Some(1), "Red"), edit(Some(3), "Teal"), edit(None, "Green")],
            &limits(),
        )
        .unwrap();

        assert_eq!(
            changes,
            OptionChanges {
                update: vec![(3, "Teal".to_string())],
                insert: vec!["Green".to_string()],
                remove: vec![2],
            }
        );
    }

    #[test]
    fn test_reconcile_rejects_foreign_ids_and_shrinking_below_two() {
        let poll = poll_with(&[(1, "Red"), (2, "Blue")]);

        assert_eq!(
            reconcile_options(&poll, vec![edit(Some(9), "X"), edit(None, "Y")], &limits()),
            Err(PollError::InvalidOption)
        );
        assert!(matches!(
            reconcile_options(&poll, vec![edit(Some(1), "Red"), edit(Some(2), " ")], &limits()),
            Err(PollError::Validation(_))
        ));
        assert!(matches!(
            reconcile_options(&poll, vec![edit(Some(1), "A"), edit(Some(1), "B")], &limits()),
            Err(PollError::Validation(_))
        ));
    }

    #[test]
    fn test_non_manager_cannot_tell_hidden_poll_exists() {
        let mut poll = poll_with(&[(1, "Red"), (2, "Blue")]);
        let stranger = Identity::member(99);

        assert_eq!(
            authorize_mutation(&stranger, &poll),
            Err(PollError::Authorization)
        );
        poll.is_active = false;
        assert_eq!(
            authorize_mutation(&stranger, &poll),
            Err(PollError::NotFound("poll"))
        );
        assert_eq!(authorize_mutation(&Identity::admin(5), &poll), Ok(()));
    }
}
