/// Unlock engine behaviour against the in-memory store
/// Covers idempotence, the quota ceiling under concurrency, and rollback paths
use std::time::Duration;

use hr_talent_api::deadline::Deadline;
use hr_talent_api::errors::AppError;
use hr_talent_api::memory_store::{MemoryStorage, NewCandidate};
use hr_talent_api::models::{CandidateContact, UnlockOutcome};
use hr_talent_api::store::{CandidateStore, UnlockTx};
use hr_talent_api::unlock::UnlockEngine;
use std::sync::Arc;

const COMPANY: i64 = 1;
const HR_USER: i64 = 10;

fn contact(handle: &str) -> CandidateContact {
    CandidateContact {
        tg_username: Some(handle.to_string()),
        email: Some(format!("{}@example.com", handle)),
        phone: None,
    }
}

fn setup() -> (MemoryStorage, UnlockEngine) {
    let store = MemoryStorage::new();
    let engine = UnlockEngine::new(Arc::new(store.clone()));
    (store, engine)
}

fn add_candidates(store: &MemoryStorage, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let slug = format!("cand-{}", i);
            store.add_candidate(
                NewCandidate::named(&slug, &format!("Candidate {}", i))
                    .with_contact(contact(&format!("cand{}", i))),
            );
            slug
        })
        .collect()
}

fn used(store: &MemoryStorage) -> i32 {
    store.quota(COMPANY).map(|q| q.unlock_quota_used).unwrap_or(-1)
}

#[tokio::test]
async fn test_first_unlock_charges_and_returns_contact() {
    let (store, engine) = setup();
    let id = store.add_candidate(NewCandidate::named("alice", "Alice").with_contact(contact("alice")));
    store.set_quota(COMPANY, 3, 0);

    let receipt = engine
        .unlock_contact(COMPANY, HR_USER, "alice", Deadline::none())
        .await
        .unwrap();

    assert_eq!(receipt.candidate_id, id);
    assert_eq!(receipt.outcome, UnlockOutcome::Charged);
    assert_eq!(receipt.contact, contact("alice"));
    assert_eq!(used(&store), 1);
    assert_eq!(store.unlocked_by(COMPANY, id), Some(HR_USER));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_unlocks_charge_once() {
    let (store, engine) = setup();
    store.add_candidate(NewCandidate::named("alice", "Alice").with_contact(contact("alice")));
    store.set_quota(COMPANY, 5, 0);

    let first = engine
        .unlock_contact(COMPANY, HR_USER, "alice", Deadline::none())
        .await
        .unwrap();
    assert_eq!(first.outcome, UnlockOutcome::Charged);

    let mut handles = Vec::new();
    for i in 0..9 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .unlock_contact(COMPANY, HR_USER + i, "alice", Deadline::none())
                .await
        }));
    }

    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        assert_eq!(receipt.outcome, UnlockOutcome::AlreadyUnlocked);
        assert_eq!(receipt.contact, first.contact);
    }

    assert_eq!(used(&store), 1);
    assert_eq!(store.unlock_count(COMPANY), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_unlocks_charge_exactly_once() {
    let (store, engine) = setup();
    store.add_candidate(NewCandidate::named("alice", "Alice").with_contact(contact("alice")));
    store.set_quota(COMPANY, 5, 0);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .unlock_contact(COMPANY, HR_USER, "alice", Deadline::none())
                .await
        }));
    }

    let mut charged = 0;
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        if receipt.outcome == UnlockOutcome::Charged {
            charged += 1;
        }
        assert_eq!(receipt.contact, contact("alice"));
    }

    assert_eq!(charged, 1);
    assert_eq!(used(&store), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_quota_ceiling_holds_under_concurrency() {
    let (store, engine) = setup();
    let slugs = add_candidates(&store, 8);
    store.set_quota(COMPANY, 5, 0);

    let mut handles = Vec::new();
    for slug in slugs {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .unlock_contact(COMPANY, HR_USER, &slug, Deadline::none())
                .await
        }));
    }

    let mut ok = 0;
    let mut exceeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => {
                assert_eq!(receipt.outcome, UnlockOutcome::Charged);
                ok += 1;
            }
            Err(AppError::QuotaExceeded(company)) => {
                assert_eq!(company, COMPANY);
                exceeded += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(ok, 5);
    assert_eq!(exceeded, 3);
    assert_eq!(used(&store), 5);
    assert_eq!(store.unlock_count(COMPANY), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_unit_race_then_idempotent_rerun() {
    let (store, engine) = setup();
    let a = store.add_candidate(NewCandidate::named("a", "A").with_contact(contact("a")));
    let b = store.add_candidate(NewCandidate::named("b", "B").with_contact(contact("b")));
    store.set_quota(COMPANY, 1, 0);

    let (ra, rb) = tokio::join!(
        engine.unlock_contact(COMPANY, HR_USER, "a", Deadline::none()),
        engine.unlock_contact(COMPANY, HR_USER, "b", Deadline::none()),
    );

    let (winner, loser) = match (&ra, &rb) {
        (Ok(_), Err(AppError::QuotaExceeded(_))) => ("a", "b"),
        (Err(AppError::QuotaExceeded(_)), Ok(_)) => ("b", "a"),
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    assert_eq!(used(&store), 1);
    assert_ne!(store.is_unlocked(COMPANY, a), store.is_unlocked(COMPANY, b));

    let again = engine
        .unlock_contact(COMPANY, HR_USER, winner, Deadline::none())
        .await
        .unwrap();
    assert_eq!(again.outcome, UnlockOutcome::AlreadyUnlocked);
    assert_eq!(used(&store), 1);

    let err = engine
        .unlock_contact(COMPANY, HR_USER, loser, Deadline::none())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::QuotaExceeded(_)));
    assert_eq!(store.unlock_count(COMPANY), 1);
}

#[tokio::test]
async fn test_existing_unlock_is_honoured_when_quota_exhausted() {
    let (store, engine) = setup();
    store.add_candidate(NewCandidate::named("alice", "Alice").with_contact(contact("alice")));
    store.set_quota(COMPANY, 1, 0);

    engine
        .unlock_contact(COMPANY, HR_USER, "alice", Deadline::none())
        .await
        .unwrap();
    // Quota lowered below usage by an operator.
    store.set_quota(COMPANY, 0, 1);

    let receipt = engine
        .unlock_contact(COMPANY, HR_USER, "alice", Deadline::none())
        .await
        .unwrap();
    assert_eq!(receipt.outcome, UnlockOutcome::AlreadyUnlocked);
    assert_eq!(used(&store), 1);
}

#[tokio::test]
async fn test_unknown_slug_fails_before_quota_is_touched() {
    let (store, engine) = setup();
    store.set_quota(COMPANY, 2, 0);

    let err = engine
        .unlock_contact(COMPANY, HR_USER, "ghost", Deadline::none())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(used(&store), 0);

    // Slug resolution also precedes the quota row check.
    let err = engine
        .unlock_contact(99, HR_USER, "ghost", Deadline::none())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_inactive_candidate_cannot_be_unlocked() {
    let (store, engine) = setup();
    let mut hidden = NewCandidate::named("hidden", "Hidden").with_contact(contact("hidden"));
    hidden.active = false;
    store.add_candidate(hidden);
    store.set_quota(COMPANY, 2, 0);

    let err = engine
        .unlock_contact(COMPANY, HR_USER, "hidden", Deadline::none())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(used(&store), 0);
}

#[tokio::test]
async fn test_missing_quota_row_is_not_configured() {
    let (store, engine) = setup();
    let id = store.add_candidate(NewCandidate::named("alice", "Alice"));

    let err = engine
        .unlock_contact(COMPANY, HR_USER, "alice", Deadline::none())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::QuotaNotConfigured(COMPANY)));
    assert!(!store.is_unlocked(COMPANY, id));
}

#[tokio::test]
async fn test_failed_increment_rolls_back_the_insert() {
    let (store, engine) = setup();
    let id = store.add_candidate(NewCandidate::named("alice", "Alice").with_contact(contact("alice")));
    store.set_quota(COMPANY, 2, 0);
    store.fail_increments(true);

    let err = engine
        .unlock_contact(COMPANY, HR_USER, "alice", Deadline::none())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(!store.is_unlocked(COMPANY, id));
    assert_eq!(used(&store), 0);

    store.fail_increments(false);
    let receipt = engine
        .unlock_contact(COMPANY, HR_USER, "alice", Deadline::none())
        .await
        .unwrap();
    assert_eq!(receipt.outcome, UnlockOutcome::Charged);
    assert_eq!(used(&store), 1);
}

#[tokio::test]
async fn test_failed_commit_leaves_no_trace() {
    let (store, engine) = setup();
    let id = store.add_candidate(NewCandidate::named("alice", "Alice"));
    store.set_quota(COMPANY, 2, 0);
    store.fail_commits(true);

    assert!(engine
        .unlock_contact(COMPANY, HR_USER, "alice", Deadline::none())
        .await
        .is_err());
    assert!(!store.is_unlocked(COMPANY, id));
    assert_eq!(used(&store), 0);
}

#[tokio::test]
async fn test_missing_contact_row_yields_empty_contact() {
    let (store, engine) = setup();
    store.add_candidate(NewCandidate::named("nocontact", "No Contact"));
    store.set_quota(COMPANY, 1, 0);

    let receipt = engine
        .unlock_contact(COMPANY, HR_USER, "nocontact", Deadline::none())
        .await
        .unwrap();
    assert_eq!(receipt.outcome, UnlockOutcome::Charged);
    assert_eq!(receipt.contact, CandidateContact::default());
    assert_eq!(used(&store), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expires_while_waiting_for_quota_lock() {
    let (store, engine) = setup();
    let id = store.add_candidate(NewCandidate::named("alice", "Alice"));
    store.set_quota(COMPANY, 2, 0);

    // Another transaction holds the company's quota row.
    let mut holder = store.begin_unlock().await.unwrap();
    holder.lock_quota_row(COMPANY).await.unwrap();

    let err = engine
        .unlock_contact(
            COMPANY,
            HR_USER,
            "alice",
            Deadline::after(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Timeout(_)));
    assert!(!store.is_unlocked(COMPANY, id));

    holder.rollback().await.unwrap();
    drop(holder);

    let receipt = engine
        .unlock_contact(
            COMPANY,
            HR_USER,
            "alice",
            Deadline::after(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    assert_eq!(receipt.outcome, UnlockOutcome::Charged);
    assert_eq!(used(&store), 1);
}

#[tokio::test]
async fn test_quota_is_per_company() {
    let (store, engine) = setup();
    let id = store.add_candidate(NewCandidate::named("alice", "Alice"));
    store.set_quota(COMPANY, 1, 0);
    store.set_quota(2, 1, 0);

    engine
        .unlock_contact(COMPANY, HR_USER, "alice", Deadline::none())
        .await
        .unwrap();
    let other = engine
        .unlock_contact(2, 20, "alice", Deadline::none())
        .await
        .unwrap();

    assert_eq!(other.outcome, UnlockOutcome::Charged);
    assert!(store.is_unlocked(2, id));
    assert_eq!(store.quota(2).unwrap().unlock_quota_used, 1);
    assert_eq!(used(&store), 1);
}
