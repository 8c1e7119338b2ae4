//! Concurrent voting against the one-vote-per-voter rule

mod common;

use common::fixtures::*;
use futures::future::join_all;
use livepoll::auth::Identity;
use livepoll::models::OptionEdit;
use livepoll::PollError;

#[actix_rt::test]
async fn test_same_voter_racing_records_one_vote() {
    let (service, store) = memory_service();
    let owner = Identity::member(1);
    let poll = create_test_poll(&service, &owner, "Race", &["A", "B"], true).await;
    let (a, b) = (option_id(&poll, "A"), option_id(&poll, "B"));

    let attempts = (0..20).map(|i| {
        let option = if i % 2 == 0 { a } else { b };
        service.votes.cast_vote(poll.id, option, 42)
    });
    let results = join_all(attempts).await;

    let accepted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(accepted.len(), 1);
    let winner = accepted[0].vote.option_id;

    for result in results.iter().filter(|r| r.is_err()) {
        assert_eq!(
            result.as_ref().unwrap_err(),
            &PollError::AlreadyVoted {
                prior_option_id: winner,
                prior_option_text: Some(if winner == a { "A" } else { "B" }.to_string()),
            }
        );
    }
    assert_eq!(store.vote_rows_for(poll.id, 42), 1);
}

#[actix_rt::test]
async fn test_many_voters_tally_matches_rows() {
    let (service, store) = memory_service();
    let owner = Identity::member(1);
    let poll = create_test_poll(&service, &owner, "Crowd", &["A", "B", "C"], true).await;
    let options: Vec<_> = poll.options.iter().map(|o| o.id).collect();

    // Voters 100..150, every one of them trying twice.
    let attempts = (0..100).map(|i| {
        let voter = 100 + (i % 50);
        service
            .votes
            .cast_vote(poll.id, options[i as usize % options.len()], voter)
    });
    let results = join_all(attempts).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 50);
    let tally = service.votes.tally(poll.id).await.unwrap();
    assert_eq!(tally.total, 50);
    assert_eq!(tally.per_option.values().sum::<u64>(), tally.total);
    assert_eq!(store.vote_rows(poll.id) as u64, tally.total);
    for voter in 100..150 {
        assert_eq!(store.vote_rows_for(poll.id, voter), 1);
    }
}

#[actix_rt::test]
async fn test_votes_racing_deactivation_never_land_after_it() {
    let (service, _) = memory_service();
    let owner = Identity::member(1);
    let poll = create_test_poll(&service, &owner, "Closing", &["A", "B"], true).await;
    let a = option_id(&poll, "A");

    let votes = join_all((0..10).map(|voter| service.votes.cast_vote(poll.id, a, 200 + voter)));
    let close = service.polls.set_active(poll.id, &owner, false);
    let (results, closed) = futures::future::join(votes, close).await;
    closed.unwrap();

    let accepted = results.iter().filter(|r| r.is_ok()).count() as u64;
    for result in &results {
        if let Err(err) = result {
            assert_eq!(err, &PollError::Inactive);
        }
    }
    // Whatever got in before the close is exactly what is counted.
    assert_eq!(service.votes.tally(poll.id).await.unwrap().total, accepted);
    assert_eq!(
        service.votes.cast_vote(poll.id, a, 999).await,
        Err(PollError::Inactive)
    );
}

#[actix_rt::test]
async fn test_vote_queued_behind_option_removal_is_refused() {
    let (service, store) = memory_service();
    let owner = Identity::member(1);
    let poll = create_test_poll(&service, &owner, "Colour", &["Red", "Blue"], true).await;
    let (red, blue) = (option_id(&poll, "Red"), option_id(&poll, "Blue"));

    // The rename holds the poll's lock while it publishes, so the option
    // edit and then the vote queue up behind it in that order.
    let rename = service.polls.update_title(poll.id, &owner, "Colours");
    let edit = service.polls.update_options(
        poll.id,
        &owner,
        vec![
            OptionEdit { id: Some(red), text: "Red".into() },
            OptionEdit { id: None, text: "Green".into() },
        ],
    );
    let vote = service.votes.cast_vote(poll.id, blue, 77);
    let (renamed, edited, voted) = futures::future::join3(rename, edit, vote).await;

    renamed.unwrap();
    let edited = edited.unwrap();
    assert!(edited.option(blue).is_none());
    assert_eq!(voted, Err(PollError::InvalidOption));
    assert_eq!(store.vote_rows_for(poll.id, 77), 0);

    // The voter is not locked out.
    let green = option_id(&edited, "Green");
    let receipt = service.votes.cast_vote(poll.id, green, 77).await.unwrap();
    assert_eq!(receipt.tally.count(green), 1);
    assert_eq!(receipt.tally.total, 1);
}
