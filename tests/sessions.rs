mod common;

use std::time::Duration;

use common::{Broker, RATE, error_codes, usage_ticks};
use encounter_broker::event::Role;
use encounter_broker::ids::{ParticipantId, SessionId};
use encounter_broker::memory::RecordStatus;
use encounter_broker::{BrokerError, ClientEvent, EndReason, ServerEvent};
use tokio::time::{Instant, sleep};

fn is_ended(event: &ServerEvent) -> bool {
    matches!(event, ServerEvent::SessionEnded { .. })
}

fn ended_reason(event: &ServerEvent) -> EndReason {
    match event {
        ServerEvent::SessionEnded { reason, .. } => *reason,
        other => panic!("expected SessionEnded, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn runs_until_balance_is_exhausted() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 450);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;

    let started = Instant::now();
    let session = broker.open_session(&mut requester, &mut provider).await;

    let seen = requester.until(is_ended).await;
    assert_eq!(ended_reason(seen.last().unwrap()), EndReason::InsufficientBalance);
    assert_eq!(usage_ticks(&seen), vec![(1, 200), (2, 400)]);
    assert_eq!(started.elapsed(), Duration::from_secs(180));

    let stored = broker.backend.records.session(&session).unwrap();
    assert_eq!(stored.status, RecordStatus::Ended);
    assert_eq!(stored.amount_charged_cents, 400);
    assert_eq!(stored.total_seconds, 120);
    assert_eq!(broker.backend.records.usage().len(), 2);
    assert_eq!(broker.backend.ledger.balance(&ParticipantId::from("requester")), 50);

    let payouts = broker.backend.payouts.payouts();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount_cents, 340);

    let ended = provider.until(is_ended).await;
    assert_eq!(ended_reason(ended.last().unwrap()), EndReason::InsufficientBalance);
    assert!(!broker.gateway.sessions().is_live(&session));
}

#[tokio::test(start_paused = true)]
async fn partial_interval_is_not_charged() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;
    let session = broker.open_session(&mut requester, &mut provider).await;

    sleep(Duration::from_secs(95)).await;
    broker
        .send(
            &requester,
            ClientEvent::EndSession {
                session: session.clone(),
            },
        )
        .await;

    let seen = requester.until(is_ended).await;
    assert_eq!(ended_reason(seen.last().unwrap()), EndReason::EndedByUser);

    let finals = broker.backend.records.finalizations();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].total_seconds, 60);
    assert_eq!(finals[0].amount_charged_cents, RATE);
    assert_eq!(
        broker.backend.ledger.balance(&ParticipantId::from("requester")),
        10_000 - RATE
    );
}

#[tokio::test(start_paused = true)]
async fn nothing_is_charged_until_both_sides_connect() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;

    broker
        .send(
            &requester,
            ClientEvent::RequestSession {
                provider: provider.id.clone(),
            },
        )
        .await;
    let session = match requester
        .wait_for(|e| matches!(e, ServerEvent::SessionRequested { .. }))
        .await
    {
        ServerEvent::SessionRequested { session, .. } => session,
        other => panic!("unexpected event: {other:?}"),
    };
    broker
        .send(
            &provider,
            ClientEvent::AcceptSession {
                session: session.clone(),
            },
        )
        .await;
    broker.connectivity(&requester, &session, true).await;

    sleep(Duration::from_secs(300)).await;
    let summary = broker
        .gateway
        .sessions()
        .end_session(&session, EndReason::EndedByUser)
        .await
        .unwrap();

    assert_eq!(summary.amount_charged_cents, 0);
    assert_eq!(summary.total_seconds, 0);
    assert_eq!(summary.payout_cents, None);
    assert!(usage_ticks(&requester.drain()).is_empty());
    assert!(broker.backend.records.usage().is_empty());
    assert!(broker.backend.payouts.payouts().is_empty());
    assert!(broker.backend.ledger.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn restored_connection_keeps_the_session_alive() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;
    let session = broker.open_session(&mut requester, &mut provider).await;

    sleep(Duration::from_secs(70)).await;
    broker.connectivity(&provider, &session, false).await;
    sleep(Duration::from_secs(30)).await;
    broker.connectivity(&provider, &session, true).await;
    sleep(Duration::from_secs(300)).await;

    assert!(broker.gateway.sessions().is_live(&session));
    let seen = requester.drain();
    assert!(!seen.iter().any(is_ended));
    assert_eq!(usage_ticks(&seen).len(), 6);
    assert_eq!(broker.backend.records.usage().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn ticks_while_disconnected_are_skipped() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;
    let session = broker.open_session(&mut requester, &mut provider).await;

    sleep(Duration::from_secs(50)).await;
    broker.connectivity(&requester, &session, false).await;
    sleep(Duration::from_secs(50)).await;
    broker.connectivity(&requester, &session, true).await;

    let first = requester
        .wait_for(|e| matches!(e, ServerEvent::UsageTick { .. }))
        .await;
    match first {
        ServerEvent::UsageTick {
            interval_index,
            total_cents,
            ..
        } => {
            assert_eq!(interval_index, 1);
            assert_eq!(total_cents, RATE);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(broker.backend.records.usage().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unrestored_drop_times_out() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;
    let session = broker.open_session(&mut requester, &mut provider).await;

    sleep(Duration::from_secs(10)).await;
    let dropped_at = Instant::now();
    broker.connectivity(&provider, &session, false).await;

    let seen = requester.until(is_ended).await;
    assert_eq!(ended_reason(seen.last().unwrap()), EndReason::DisconnectedTimeout);
    assert_eq!(dropped_at.elapsed(), Duration::from_secs(60));
    assert!(usage_ticks(&seen).is_empty());

    let stored = broker.backend.records.session(&session).unwrap();
    assert_eq!(stored.amount_charged_cents, 0);
    assert!(broker.backend.payouts.payouts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn closed_transport_counts_as_disconnect() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;
    let session = broker.open_session(&mut requester, &mut provider).await;

    broker.disconnect(&provider).await;

    let seen = requester.until(is_ended).await;
    assert_eq!(ended_reason(seen.last().unwrap()), EndReason::DisconnectedTimeout);
    assert!(!broker.gateway.sessions().is_live(&session));
}

#[tokio::test(start_paused = true)]
async fn reconnecting_within_grace_resumes_the_session() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;
    let session = broker.open_session(&mut requester, &mut provider).await;

    broker.disconnect(&provider).await;
    sleep(Duration::from_secs(20)).await;

    let provider = broker.connect("provider", Role::Provider).await;
    broker.connectivity(&provider, &session, true).await;
    sleep(Duration::from_secs(100)).await;

    assert!(broker.gateway.sessions().is_live(&session));
    assert!(!requester.drain().iter().any(is_ended));
}

#[tokio::test(start_paused = true)]
async fn concurrent_ends_finalize_once() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;
    let session = broker.open_session(&mut requester, &mut provider).await;

    sleep(Duration::from_secs(61)).await;
    let sessions = broker.gateway.sessions();
    let (first, second) = tokio::join!(
        sessions.end_session(&session, EndReason::EndedByUser),
        sessions.end_session(&session, EndReason::EndedByUser),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|r| matches!(r, Err(BrokerError::AlreadyTerminated(_))))
    );

    assert!(matches!(
        sessions.end_session(&session, EndReason::EndedByUser).await,
        Err(BrokerError::SessionNotFound(_))
    ));
    assert_eq!(broker.backend.records.finalizations().len(), 1);
    let payouts = broker.backend.payouts.payouts();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount_cents, 170);

    let ends = requester.drain().into_iter().filter(is_ended).count();
    assert_eq!(ends, 1);
}

#[tokio::test(start_paused = true)]
async fn strangers_cannot_touch_a_session() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;
    let mut stranger = broker.connect("stranger", Role::Requester).await;
    let session = broker.open_session(&mut requester, &mut provider).await;

    broker
        .send(
            &stranger,
            ClientEvent::EndSession {
                session: session.clone(),
            },
        )
        .await;
    broker
        .send(
            &stranger,
            ClientEvent::Chat {
                session: session.clone(),
                text: "hello".into(),
            },
        )
        .await;

    assert_eq!(error_codes(&stranger.drain()), vec!["forbidden", "forbidden"]);
    assert!(broker.gateway.sessions().is_live(&session));
    assert!(broker.backend.records.chats().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unregistered_connection_is_told_to_register() {
    let broker = Broker::new();
    let (connection, mut rx) = broker.gateway.open_connection();

    broker
        .gateway
        .handle(
            &connection,
            ClientEvent::EndSession {
                session: SessionId::from("whatever"),
            },
        )
        .await;

    match rx.recv().await {
        Some(ServerEvent::Error { code, .. }) => assert_eq!(code, "not_registered"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_ends_live_sessions() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;
    let session = broker.open_session(&mut requester, &mut provider).await;

    sleep(Duration::from_secs(130)).await;
    let summaries = broker.gateway.shutdown().await;

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].session, session);
    assert_eq!(summaries[0].reason, EndReason::Shutdown);
    assert_eq!(summaries[0].amount_charged_cents, 2 * RATE);
    assert_eq!(broker.gateway.sessions().live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn accepted_session_ends_when_both_parties_leave_before_it_starts() {
    let broker = Broker::new();
    broker.backend.ledger.set_balance("requester", 10_000);
    let mut requester = broker.connect("requester", Role::Requester).await;
    let mut provider = broker.connect("provider", Role::Provider).await;

    broker
        .send(
            &requester,
            ClientEvent::RequestSession {
                provider: provider.id.clone(),
            },
        )
        .await;
    let session = match requester
        .wait_for(|e| matches!(e, ServerEvent::SessionRequested { .. }))
        .await
    {
        ServerEvent::SessionRequested { session, .. } => session,
        other => panic!("unexpected event: {other:?}"),
    };
    broker
        .send(
            &provider,
            ClientEvent::AcceptSession {
                session: session.clone(),
            },
        )
        .await;
    provider
        .wait_for(|e| matches!(e, ServerEvent::SessionAccepted { .. }))
        .await;
    broker.connectivity(&requester, &session, true).await;

    broker.disconnect(&requester).await;
    sleep(Duration::from_secs(1)).await;
    assert!(broker.gateway.sessions().is_live(&session));

    broker.disconnect(&provider).await;
    sleep(Duration::from_millis(10)).await;

    assert!(!broker.gateway.sessions().is_live(&session));
    let stored = broker.backend.records.session(&session).unwrap();
    assert_eq!(stored.status, RecordStatus::Ended);
    assert_eq!(stored.amount_charged_cents, 0);
    assert_eq!(broker.backend.ledger.balance(&ParticipantId::from("requester")), 10_000);
}

#[tokio::test(start_paused = true)]
async fn pending_request_is_withdrawn_when_both_parties_leave() {
    let broker = Broker::new();
    let requester = broker.connect("requester", Role::Requester).await;
    let provider = broker.connect("provider", Role::Provider).await;

    broker
        .send(
            &requester,
            ClientEvent::RequestSession {
                provider: provider.id.clone(),
            },
        )
        .await;
    assert_eq!(broker.gateway.sessions().pending_count(), 1);

    broker.disconnect(&provider).await;
    assert_eq!(broker.gateway.sessions().pending_count(), 1);
    broker.disconnect(&requester).await;
    assert_eq!(broker.gateway.sessions().pending_count(), 0);
}
