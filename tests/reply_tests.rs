//! Selection and batch reply dispatch end to end

mod common;

use common::*;
use gmail_autoreply::dispatcher::{DispatchOutcome, ReplyDispatcher};
use gmail_autoreply::error::AutoReplyError;
use gmail_autoreply::models::{ProcessingState, ReplyStatus};
use gmail_autoreply::session::Session;
use mockall::predicate::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Run one cycle over the fixture inbox and return the analyzed session
async fn analyzed_session() -> Arc<Session> {
    let (session, scheduler) = build_scheduler(
        FixedProvider::new(inbox_fixture()),
        TrackingClassifier::new(None),
        test_config(),
    );
    scheduler.refresh_now().await.unwrap();
    session
}

#[tokio::test]
async fn test_partial_batch_failure() {
    let session = analyzed_session().await;
    assert!(session.toggle_selection("a").await);
    assert!(session.toggle_selection("b").await);

    let mut provider = MockMailProvider::new();
    provider
        .expect_reply()
        .withf(|job| job.message_id == "a")
        .times(1)
        .returning(|_| Ok(ReplyStatus::Sent { detail: Some("sent-1".to_string()) }));
    provider
        .expect_reply()
        .withf(|job| job.message_id == "b")
        .times(1)
        .returning(|_| Ok(ReplyStatus::Failed { detail: "quota exceeded".to_string() }));

    let dispatcher = ReplyDispatcher::new(Arc::clone(&session), Arc::new(provider), 5);
    let result = dispatcher.send_selected().await;

    assert_eq!(result.sent, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.outcome("a"), Some(&DispatchOutcome::Sent));
    assert_eq!(
        result.outcome("b"),
        Some(&DispatchOutcome::Failed("quota exceeded".to_string()))
    );

    assert_eq!(session.message("a").await.unwrap().state, ProcessingState::Replied);
    assert_eq!(session.message("b").await.unwrap().state, ProcessingState::Analyzed);
    assert_eq!(session.selected_ids().await, vec!["b".to_string()]);
    assert_eq!(session.eligible_ids().await, vec!["b".to_string()]);
}

#[tokio::test]
async fn test_failed_reply_can_be_retried() {
    let session = analyzed_session().await;
    session.toggle_selection("b").await;

    let mut failing = MockMailProvider::new();
    failing
        .expect_reply()
        .returning(|_| Err(AutoReplyError::NetworkError("timeout".to_string())));
    let result = ReplyDispatcher::new(Arc::clone(&session), Arc::new(failing), 1)
        .send_selected()
        .await;
    assert!(result.all_failed());
    assert!(session.is_selected("b").await);

    let mut working = MockMailProvider::new();
    working
        .expect_reply()
        .times(1)
        .returning(|_| Ok(ReplyStatus::Sent { detail: None }));
    let result = ReplyDispatcher::new(Arc::clone(&session), Arc::new(working), 1)
        .send_selected()
        .await;
    assert_eq!(result.sent, 1);
    assert!(session.selected_ids().await.is_empty());
    assert_eq!(session.message("b").await.unwrap().state, ProcessingState::Replied);
}

#[tokio::test]
async fn test_reply_job_built_from_ledger() {
    let session = analyzed_session().await;

    let mut provider = MockMailProvider::new();
    provider
        .expect_reply()
        .withf(|job| {
            job.message_id == "a"
                && job.to_address == "a@cliente.com.br"
                && job.subject == "Re: Pedido de orçamento"
                && job.body == "Enviaremos o orçamento em breve."
                && job.thread_ref.as_deref() == Some("thread_a")
                && job.account == "me"
        })
        .times(1)
        .returning(|_| Ok(ReplyStatus::Sent { detail: None }));

    let result = ReplyDispatcher::new(session, Arc::new(provider), 2)
        .send_batch(&["a".to_string()])
        .await;
    assert_eq!(result.sent, 1);
}

#[tokio::test]
async fn test_unproductive_and_replied_ids_are_not_sent() {
    let session = analyzed_session().await;

    let mut provider = MockMailProvider::new();
    provider
        .expect_reply()
        .with(function(|job: &gmail_autoreply::models::ReplyJob| job.message_id == "a"))
        .times(1)
        .returning(|_| Ok(ReplyStatus::Sent { detail: None }));
    let dispatcher = ReplyDispatcher::new(Arc::clone(&session), Arc::new(provider), 2);

    let first = dispatcher
        .send_batch(&["a".to_string(), "c".to_string()])
        .await;
    assert_eq!(first.sent, 1);
    assert!(matches!(first.outcome("c"), Some(DispatchOutcome::Failed(_))));

    // "a" is Replied now; a second attempt never reaches the provider
    let second = dispatcher.send_batch(&["a".to_string()]).await;
    assert!(second.all_failed());
    assert!(second.faults.is_empty());
}

#[tokio::test]
async fn test_batch_waits_for_every_send() {
    let session = analyzed_session().await;
    session.toggle_selection("a").await;
    session.toggle_selection("b").await;

    let provider = SlowReplyProvider::new(Duration::from_millis(30));
    let result = ReplyDispatcher::new(Arc::clone(&session), provider.clone(), 2)
        .send_selected()
        .await;

    assert_eq!(result.sent, 2);
    assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 2);
    let ids: Vec<&str> = result.outcomes.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(session.stats().await.processed, 3);
    assert!(session.eligible_ids().await.is_empty());
}

#[tokio::test]
async fn test_overlapping_batches_send_each_reply_once() {
    let session = analyzed_session().await;
    let provider = SlowReplyProvider::new(Duration::from_millis(20));
    let dispatcher = ReplyDispatcher::new(Arc::clone(&session), provider.clone(), 2);

    let ids = vec!["a".to_string()];
    let (first, second) = tokio::join!(dispatcher.send_batch(&ids), dispatcher.send_batch(&ids));

    assert_eq!(provider.sent(), vec!["a".to_string()]);
    assert_eq!(first.sent + second.sent, 1);
    assert_eq!(first.failed + second.failed, 1);
    assert!(first.faults.is_empty() && second.faults.is_empty());
    let refused = if first.sent == 1 { &second } else { &first };
    assert_eq!(
        refused.outcome("a"),
        Some(&DispatchOutcome::Failed("send in progress".to_string()))
    );
    assert_eq!(session.message("a").await.unwrap().state, ProcessingState::Replied);
}

#[tokio::test]
async fn test_reply_sent_from_configured_account() {
    let session = analyzed_session().await;

    let mut provider = MockMailProvider::new();
    provider
        .expect_reply()
        .withf(|job| job.account == "atendimento@empresa.com.br")
        .times(1)
        .returning(|_| Ok(ReplyStatus::Sent { detail: None }));

    let result = ReplyDispatcher::new(session, Arc::new(provider), 2)
        .with_account("atendimento@empresa.com.br")
        .send_batch(&["a".to_string()])
        .await;
    assert_eq!(result.sent, 1);
}
