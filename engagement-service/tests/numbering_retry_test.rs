mod common;

use common::faulty::FaultyRepository;
use common::{TestApp, CLIENT_EMAIL};
use engagement_service::models::InquiryStatus;
use engagement_service::services::InMemoryRepository;
use reqwest::StatusCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

async fn spawn_faulty() -> (TestApp, Arc<FaultyRepository>) {
    let inner = Arc::new(InMemoryRepository::new());
    let faulty = Arc::new(FaultyRepository::new(inner.clone()));
    let app = TestApp::spawn_with_repository(faulty.clone(), inner).await;
    (app, faulty)
}

#[tokio::test]
async fn acceptance_retries_once_after_number_collision() {
    let (app, faulty) = spawn_faulty().await;
    let (inquiry, _) = app.seed_quoted_inquiry().await;
    faulty.collide_acceptances(1);

    let response = app
        .accept_quote(inquiry.id, &app.accept_token(inquiry.id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(faulty.acceptance_attempts.load(Ordering::SeqCst), 2);

    assert_eq!(app.inquiry(inquiry.id).await.status, InquiryStatus::Accepted);
    let documents = app.repo.documents().await;
    assert_eq!(documents.len(), 1);
    assert!(documents[0].document_number.ends_with("-001"));
    assert_eq!(app.repo.invoices().await.len(), 1);
    assert_eq!(app.repo.jobs().await.len(), 2);
    assert_eq!(app.email.sent_to(CLIENT_EMAIL).len(), 1);
}

#[tokio::test]
async fn second_collision_fails_acceptance_without_partial_writes() {
    let (app, faulty) = spawn_faulty().await;
    let (inquiry, _) = app.seed_quoted_inquiry().await;
    faulty.collide_acceptances(2);

    let response = app
        .accept_quote(inquiry.id, &app.accept_token(inquiry.id))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("Could not assign a document number"));
    assert_eq!(faulty.acceptance_attempts.load(Ordering::SeqCst), 2);

    assert_eq!(app.inquiry(inquiry.id).await.status, InquiryStatus::Quoted);
    assert!(app.repo.documents().await.is_empty());
    assert!(app.repo.invoices().await.is_empty());
    assert!(app.repo.jobs().await.is_empty());
    assert!(app.email.sent_to(CLIENT_EMAIL).is_empty());

    // The quote can still be accepted once numbering recovers.
    let retry = app
        .accept_quote(inquiry.id, &app.accept_token(inquiry.id))
        .await;
    assert_eq!(retry.status(), StatusCode::OK);
}

#[tokio::test]
async fn standalone_agreement_retries_once_then_conflicts() {
    let (app, faulty) = spawn_faulty().await;
    let (_, client) = app.seed_quoted_inquiry().await;
    let body = serde_json::json!({ "client_id": client.id, "scope": "Site audit" });

    faulty.collide_agreements(1);
    let created = app.admin_post("/admin/legal-documents", body.clone()).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(faulty.agreement_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(app.repo.documents().await.len(), 1);

    faulty.collide_agreements(2);
    let conflicted = app.admin_post("/admin/legal-documents", body).await;
    assert_eq!(conflicted.status(), StatusCode::CONFLICT);
    assert_eq!(faulty.agreement_attempts.load(Ordering::SeqCst), 4);
    assert_eq!(app.repo.documents().await.len(), 1);
}
