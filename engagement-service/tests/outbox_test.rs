mod common;

use common::faulty::FaultyRepository;
use common::{TestApp, CLIENT_EMAIL};
use engagement_service::models::JobStatus;
use engagement_service::services::InMemoryRepository;
use reqwest::StatusCode;
use std::sync::Arc;

#[tokio::test]
async fn bookkeeping_failure_does_not_stop_the_batch() {
    let inner = Arc::new(InMemoryRepository::new());
    let faulty = Arc::new(FaultyRepository::new(inner.clone()));
    let app = TestApp::spawn_with_repository(faulty.clone(), inner).await;

    let (inquiry, _) = app.seed_quoted_inquiry().await;
    let token = app.accept_token(inquiry.id);
    assert_eq!(app.accept_quote(inquiry.id, &token).await.status(), StatusCode::OK);
    let confirmations = app.email.sent_to(CLIENT_EMAIL).len();

    faulty.fail_completions(1);
    assert_eq!(app.run_outbox().await, 2);

    // Both jobs ran; only the one that could not be recorded keeps its lease.
    assert_eq!(app.email.sent_to(CLIENT_EMAIL).len(), confirmations + 2);
    let mut statuses: Vec<JobStatus> = app.repo.jobs().await.iter().map(|j| j.status).collect();
    statuses.sort_by_key(|s| format!("{:?}", s));
    assert_eq!(statuses, vec![JobStatus::Completed, JobStatus::Processing]);

    // The leased job is not handed out again before its lease expires.
    assert_eq!(app.run_outbox().await, 0);
    assert_eq!(app.email.sent_to(CLIENT_EMAIL).len(), confirmations + 2);
}
