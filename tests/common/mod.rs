#![allow(dead_code)]

use std::time::Duration;

use encounter_broker::event::{Cents, Role};
use encounter_broker::ids::{ParticipantId, SessionId};
use encounter_broker::memory::InMemoryBackend;
use encounter_broker::registry::ConnectionHandle;
use encounter_broker::{BrokerConfig, ClientEvent, Gateway, ServerEvent};
use tokio::sync::mpsc::Receiver;

pub const RATE: Cents = 200;

pub struct Broker {
    pub gateway: Gateway,
    pub backend: InMemoryBackend,
}

pub struct Client {
    pub id: ParticipantId,
    pub connection: ConnectionHandle,
    rx: Receiver<ServerEvent>,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_timing(Duration::from_secs(60), Duration::from_secs(60))
    }

    pub fn with_timing(interval: Duration, grace: Duration) -> Self {
        let backend = InMemoryBackend::new();
        backend.records.add_provider("provider", RATE);
        let config = BrokerConfig::default()
            .with_billing_interval(interval)
            .with_disconnect_grace(grace);
        Self {
            gateway: Gateway::new(&config, backend.collaborators()),
            backend,
        }
    }

    pub async fn connect(&self, id: &str, role: Role) -> Client {
        let (connection, rx) = self.gateway.open_connection();
        let mut client = Client {
            id: ParticipantId::from(id),
            connection,
            rx,
        };
        self.send(
            &client,
            ClientEvent::Register {
                participant: client.id.clone(),
                role,
            },
        )
        .await;
        client
            .wait_for(|e| matches!(e, ServerEvent::Registered { .. }))
            .await;
        client.drain();
        client
    }

    pub async fn send(&self, client: &Client, event: ClientEvent) {
        self.gateway.handle(&client.connection, event).await;
    }

    pub async fn disconnect(&self, client: &Client) {
        self.gateway.close_connection(&client.connection).await;
    }

    /// Request, accept and report both sides connected. Returns the session id.
    pub async fn open_session(&self, requester: &mut Client, provider: &mut Client) -> SessionId {
        self.send(
            requester,
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

        self.send(
            provider,
            ClientEvent::AcceptSession {
                session: session.clone(),
            },
        )
        .await;
        requester
            .wait_for(|e| matches!(e, ServerEvent::SessionAccepted { .. }))
            .await;
        provider
            .wait_for(|e| matches!(e, ServerEvent::SessionAccepted { .. }))
            .await;

        self.connectivity(requester, &session, true).await;
        self.connectivity(provider, &session, true).await;
        session
    }

    pub async fn connectivity(&self, client: &Client, session: &SessionId, connected: bool) {
        self.send(
            client,
            ClientEvent::Connectivity {
                session: session.clone(),
                connected,
            },
        )
        .await;
    }
}

impl Client {
    pub async fn next(&mut self) -> ServerEvent {
        match self.rx.recv().await {
            Some(event) => event,
            None => panic!("connection of {} closed", self.id),
        }
    }

    /// Receive until an event matches, returning it. Skipped events are lost.
    pub async fn wait_for(&mut self, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
        loop {
            let event = self.next().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Receive up to and including the first matching event.
    pub async fn until(&mut self, pred: impl Fn(&ServerEvent) -> bool) -> Vec<ServerEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next().await;
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    /// Everything currently queued.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn usage_ticks(events: &[ServerEvent]) -> Vec<(u64, Cents)> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::UsageTick {
                interval_index,
                total_cents,
                ..
            } => Some((*interval_index, *total_cents)),
            _ => None,
        })
        .collect()
}

pub fn error_codes(events: &[ServerEvent]) -> Vec<&'static str> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Error { code, .. } => Some(*code),
            _ => None,
        })
        .collect()
}
