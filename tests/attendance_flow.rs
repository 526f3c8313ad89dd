//! End-to-end ceremony flows: enroll a passkey, check in to a session,
//! and the failure paths that must leave no attendance trace.

mod common;

use common::{context, harness, Authenticator};
use rollcall::credentials::CredentialRepository;
use rollcall::CeremonyError;

#[tokio::test]
async fn register_then_check_in() {
    let h = harness();
    let passkey = Authenticator::new(b"cid1");

    let options = h
        .coordinator
        .begin_registration("alice", &context())
        .await
        .unwrap();
    let outcome = h
        .coordinator
        .finish_registration(&passkey.register(&options.challenge), &context())
        .await
        .unwrap();
    assert_eq!(outcome.username, "alice");
    assert_eq!(outcome.credential_id, b"cid1");

    let stored = h.credentials.find_by_id(b"cid1").await.unwrap();
    assert_eq!(stored.sign_count, 0);
    assert_eq!(stored.owner_id, outcome.user_id);

    // Check in to a session with the new passkey
    let options = h
        .coordinator
        .begin_authentication(Some("alice"), &context())
        .await
        .unwrap();
    let auth = h
        .coordinator
        .finish_authentication(&passkey.authenticate(&options.challenge, 5), &context(), "lecture-1")
        .await
        .unwrap();

    assert_eq!(auth.user_id, outcome.user_id);
    assert_eq!(h.credentials.find_by_id(b"cid1").await.unwrap().sign_count, 5);

    let records = h.attendance.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].user_id, outcome.user_id);
    assert_eq!(records[0].session_id, "lecture-1");
}

#[tokio::test]
async fn stalled_counter_is_flagged_and_leaves_no_record() {
    let h = harness();
    let passkey = Authenticator::new(b"cid1");

    let options = h
        .coordinator
        .begin_registration("alice", &context())
        .await
        .unwrap();
    h.coordinator
        .finish_registration(&passkey.register(&options.challenge), &context())
        .await
        .unwrap();

    let options = h
        .coordinator
        .begin_authentication(Some("alice"), &context())
        .await
        .unwrap();
    h.coordinator
        .finish_authentication(&passkey.authenticate(&options.challenge, 5), &context(), "lecture-1")
        .await
        .unwrap();

    // A second authenticator reporting the same counter looks cloned
    let options = h
        .coordinator
        .begin_authentication(Some("alice"), &context())
        .await
        .unwrap();
    let result = h
        .coordinator
        .finish_authentication(&passkey.authenticate(&options.challenge, 5), &context(), "lecture-2")
        .await;

    assert!(matches!(result, Err(CeremonyError::PossibleCloneDetected)));
    // Counter untouched, no second attendance record
    assert_eq!(h.credentials.find_by_id(b"cid1").await.unwrap().sign_count, 5);
    assert_eq!(h.attendance.records().len(), 1);
}

#[tokio::test]
async fn replayed_response_cannot_check_in_twice() {
    let h = harness();
    let passkey = Authenticator::new(b"cid1");

    let options = h
        .coordinator
        .begin_registration("alice", &context())
        .await
        .unwrap();
    h.coordinator
        .finish_registration(&passkey.register(&options.challenge), &context())
        .await
        .unwrap();

    let options = h
        .coordinator
        .begin_authentication(Some("alice"), &context())
        .await
        .unwrap();
    let response = passkey.authenticate(&options.challenge, 5);
    h.coordinator
        .finish_authentication(&response, &context(), "lecture-1")
        .await
        .unwrap();

    // The identical response again: its challenge is gone
    let replay = h
        .coordinator
        .finish_authentication(&response, &context(), "lecture-1")
        .await;
    assert!(matches!(replay, Err(CeremonyError::ChallengeNotFound)));
    assert_eq!(h.attendance.records().len(), 1);
}

#[tokio::test]
async fn one_credential_cannot_serve_two_users() {
    let h = harness();
    let passkey = Authenticator::new(b"cid1");

    let options = h
        .coordinator
        .begin_registration("alice", &context())
        .await
        .unwrap();
    h.coordinator
        .finish_registration(&passkey.register(&options.challenge), &context())
        .await
        .unwrap();

    // Same physical key presented for a different username
    let options = h
        .coordinator
        .begin_registration("bob", &context())
        .await
        .unwrap();
    let result = h
        .coordinator
        .finish_registration(&passkey.register(&options.challenge), &context())
        .await;

    assert!(matches!(
        result,
        Err(CeremonyError::CredentialAlreadyRegistered)
    ));
}

#[tokio::test]
async fn counterless_authenticator_checks_in_without_update() {
    let h = harness();
    let passkey = Authenticator::new(b"cid1");

    let options = h
        .coordinator
        .begin_registration("alice", &context())
        .await
        .unwrap();
    h.coordinator
        .finish_registration(&passkey.register(&options.challenge), &context())
        .await
        .unwrap();

    // Stored and reported counters both zero: accepted, never updated
    for session in ["lecture-1", "lecture-2"] {
        let options = h
            .coordinator
            .begin_authentication(Some("alice"), &context())
            .await
            .unwrap();
        h.coordinator
            .finish_authentication(&passkey.authenticate(&options.challenge, 0), &context(), session)
            .await
            .unwrap();
    }

    assert_eq!(h.credentials.find_by_id(b"cid1").await.unwrap().sign_count, 0);
    assert_eq!(h.attendance.records().len(), 2);
}

#[tokio::test]
async fn discoverable_flow_finds_the_owner() {
    let h = harness();
    let passkey = Authenticator::new(b"cid1");

    let options = h
        .coordinator
        .begin_registration("alice", &context())
        .await
        .unwrap();
    let registered = h
        .coordinator
        .finish_registration(&passkey.register(&options.challenge), &context())
        .await
        .unwrap();

    // No username up front: the credential id identifies the user
    let options = h
        .coordinator
        .begin_authentication(None, &context())
        .await
        .unwrap();
    assert!(options.allow_credentials.is_empty());

    let auth = h
        .coordinator
        .finish_authentication(&passkey.authenticate(&options.challenge, 1), &context(), "lecture-1")
        .await
        .unwrap();
    assert_eq!(auth.user_id, registered.user_id);
}
