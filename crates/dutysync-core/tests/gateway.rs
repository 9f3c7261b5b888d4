mod common;

use common::FakeDirectory;
use dutysync_core::classify::{ClassifiedOutcome, ErrorVocabulary, ExpectedKind};
use dutysync_core::gateway::{RetryPolicy, SyncGateway};
use dutysync_core::model::{DutyStatusValue, ReconciledUpdate};
use dutysync_core::remote::RemoteError;

fn updates(usernames: &[&str]) -> Vec<ReconciledUpdate> {
    usernames
        .iter()
        .map(|u| ReconciledUpdate {
            username: u.to_string(),
            value: DutyStatusValue::Since(common::at(17, 14, 30, 0)),
        })
        .collect()
}

fn server_error() -> RemoteError {
    RemoteError::Status {
        status: 503,
        body: "Service Unavailable".into(),
    }
}

#[tokio::test]
async fn empty_batch_makes_no_call() {
    let fake = FakeDirectory::new();
    let vocabulary = ErrorVocabulary::default();
    let retry = RetryPolicy::immediate(3);
    let gateway = SyncGateway::new(&fake, "On-Duty-DTG", &vocabulary, &retry);

    let report = gateway.sync_batch(&[]).await;

    assert!(report.records.is_empty());
    assert_eq!(fake.submit_calls(), 0);
}

#[tokio::test]
async fn classifies_each_record() {
    let fake = FakeDirectory::new()
        .rejecting("a", "User: a does not exists in the Organization")
        .rejecting("b", "Operator does not have permission to update user")
        .rejecting("c", "Internal Server Error");
    let vocabulary = ErrorVocabulary::default();
    let retry = RetryPolicy::immediate(3);
    let gateway = SyncGateway::new(&fake, "On-Duty-DTG", &vocabulary, &retry);

    let report = gateway.sync_batch(&updates(&["a", "b", "c", "d"])).await;

    assert_eq!(report.records.len(), 4);
    assert_eq!(
        report.get("a").unwrap().class,
        ClassifiedOutcome::Expected(ExpectedKind::UnknownIdentity)
    );
    assert_eq!(
        report.get("b").unwrap().class,
        ClassifiedOutcome::Expected(ExpectedKind::PermissionDenied)
    );
    assert_eq!(report.get("c").unwrap().class, ClassifiedOutcome::Real);
    assert_eq!(report.get("d").unwrap().class, ClassifiedOutcome::Ok);
    assert_eq!(report.real_error_usernames().len(), 1);
    assert_eq!(report.attempts, 1);
}

#[tokio::test]
async fn missing_outcome_counts_as_real_error() {
    let fake = FakeDirectory::new().omitting("b");
    let vocabulary = ErrorVocabulary::default();
    let retry = RetryPolicy::immediate(3);
    let gateway = SyncGateway::new(&fake, "On-Duty-DTG", &vocabulary, &retry);

    let report = gateway.sync_batch(&updates(&["a", "b"])).await;

    assert_eq!(report.get("a").unwrap().class, ClassifiedOutcome::Ok);
    assert_eq!(report.get("b").unwrap().class, ClassifiedOutcome::Real);
}

#[tokio::test]
async fn transient_failure_resends_the_same_batch() {
    let fake = FakeDirectory::new().failing_submissions(vec![
        RemoteError::Transport("connection reset".into()),
        server_error(),
    ]);
    let vocabulary = ErrorVocabulary::default();
    let retry = RetryPolicy::immediate(3);
    let gateway = SyncGateway::new(&fake, "On-Duty-DTG", &vocabulary, &retry);

    let batch = updates(&["a", "b"]);
    let report = gateway.sync_batch(&batch).await;

    assert_eq!(fake.submit_calls(), 3);
    assert_eq!(fake.submissions(), vec![batch]);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.ok_count(), 2);
    assert!(report.transport_error.is_none());
}

#[tokio::test]
async fn exhausted_retries_mark_every_record_real() {
    let fake = FakeDirectory::new()
        .failing_submissions(vec![server_error(), server_error(), server_error()]);
    let vocabulary = ErrorVocabulary::default();
    let retry = RetryPolicy::immediate(3);
    let gateway = SyncGateway::new(&fake, "On-Duty-DTG", &vocabulary, &retry);

    let report = gateway.sync_batch(&updates(&["a", "b"])).await;

    assert_eq!(fake.submit_calls(), 3);
    assert_eq!(report.real_count(), 2);
    assert!(report.transport_error.is_some());
}

#[tokio::test]
async fn non_transient_failure_is_not_retried() {
    let fake = FakeDirectory::new().failing_submissions(vec![RemoteError::Status {
        status: 400,
        body: "bad request".into(),
    }]);
    let vocabulary = ErrorVocabulary::default();
    let retry = RetryPolicy::immediate(3);
    let gateway = SyncGateway::new(&fake, "On-Duty-DTG", &vocabulary, &retry);

    let report = gateway.sync_batch(&updates(&["a"])).await;

    assert_eq!(fake.submit_calls(), 1);
    assert_eq!(report.real_count(), 1);
}

#[tokio::test]
async fn echoed_login_case_does_not_hide_real_errors() {
    let fake = FakeDirectory::new()
        .echoing_uppercase()
        .rejecting("jdoe", "Internal Server Error");
    let vocabulary = ErrorVocabulary::default();
    let retry = RetryPolicy::immediate(3);
    let gateway = SyncGateway::new(&fake, "On-Duty-DTG", &vocabulary, &retry);

    let report = gateway.sync_batch(&updates(&["jdoe", "asmith"])).await;

    assert_eq!(report.get("jdoe").unwrap().class, ClassifiedOutcome::Real);
    assert_eq!(report.get("jdoe").unwrap().outcome.username, "jdoe");
    assert_eq!(report.get("asmith").unwrap().class, ClassifiedOutcome::Ok);
    assert!(report.real_error_usernames().contains("jdoe"));
}

#[tokio::test]
async fn resubmitting_a_successful_batch_gives_the_same_outcomes() {
    let fake = FakeDirectory::new();
    let vocabulary = ErrorVocabulary::default();
    let retry = RetryPolicy::immediate(3);
    let gateway = SyncGateway::new(&fake, "On-Duty-DTG", &vocabulary, &retry);

    let batch = updates(&["a", "b", "c"]);
    let first = gateway.sync_batch(&batch).await;
    let second = gateway.sync_batch(&batch).await;

    let outcomes = |report: &dutysync_core::gateway::SyncReport| {
        report
            .records
            .iter()
            .map(|r| (r.outcome.clone(), r.class))
            .collect::<Vec<_>>()
    };
    assert_eq!(first.ok_count(), 3);
    assert_eq!(second.ok_count(), 3);
    assert_eq!(outcomes(&first), outcomes(&second));
    assert_eq!(fake.submissions(), vec![batch.clone(), batch]);
}
