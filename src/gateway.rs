//! Entry point for participant connections.
//!
//! Maps each inbound [`ClientEvent`] onto a coordinator operation and turns
//! every outcome into either outbound events or a log line. Nothing here
//! propagates an error past [`Gateway::handle`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastCoordinator;
use crate::collaborators::Collaborators;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::event::{ClientEvent, EndReason, ServerEvent};
use crate::ids::ParticipantId;
use crate::registry::{Connection, ConnectionHandle, ConnectionRegistry};
use crate::relay::SignalRelay;
use crate::session::{SessionCoordinator, SessionSummary};
use crate::settlement::Settlement;

#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    relay: Arc<SignalRelay>,
    sessions: SessionCoordinator,
    broadcasts: Arc<BroadcastCoordinator>,
    queue_depth: usize,
}

impl Gateway {
    pub fn new(config: &BrokerConfig, collaborators: Collaborators) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(SignalRelay::new(registry.clone()));
        let settlement = Arc::new(Settlement::new(
            collaborators.payouts.clone(),
            config.payout_split,
        ));
        let sessions = SessionCoordinator::new(
            relay.clone(),
            &collaborators,
            settlement,
            config.billing_interval,
            config.disconnect_grace,
        );
        let broadcasts = Arc::new(BroadcastCoordinator::new(relay.clone(), &collaborators));

        Self {
            registry,
            relay,
            sessions,
            broadcasts,
            queue_depth: config.outbound_queue_depth,
        }
    }

    /// A new, not yet registered connection and the receiver its writer drains.
    pub fn open_connection(&self) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (connection, rx) = Connection::channel(self.queue_depth);
        debug!(connection = %connection.id(), "connection opened");
        (connection, rx)
    }

    /// Apply one inbound event. Failures are reported to the sender as an
    /// `Error` event or logged.
    pub async fn handle(&self, connection: &ConnectionHandle, event: ClientEvent) {
        let result = self.dispatch(connection, event).await;
        if let Err(e) = result {
            self.report(connection, e);
        }
    }

    async fn dispatch(
        &self,
        connection: &ConnectionHandle,
        event: ClientEvent,
    ) -> Result<(), BrokerError> {
        if let ClientEvent::Register { participant, role } = event {
            let superseded = self
                .registry
                .lookup(&participant)
                .filter(|previous| previous.id() != connection.id());
            self.registry
                .register(participant.clone(), role, connection.clone());
            if let Some(previous) = superseded {
                info!(
                    participant = %participant,
                    connection = %previous.id(),
                    "registration moved to a new connection"
                );
                // streams stay bound to the connection that started them
                self.broadcasts.connection_closed(previous.id(), None);
            }
            connection.send(ServerEvent::Registered { participant });
            connection.send(ServerEvent::BroadcastList {
                streams: self.broadcasts.list_broadcasts(),
            });
            return Ok(());
        }

        let participant = self
            .registry
            .participant_of(connection.id())
            .ok_or(BrokerError::NotRegistered)?;
        let me = &participant;

        match event {
            // handled above
            ClientEvent::Register { .. } => {}
            ClientEvent::RequestSession { provider } => {
                let quote = self.sessions.request_session(me, &provider).await?;
                connection.send(ServerEvent::SessionRequested {
                    session: quote.session,
                    rate_cents: quote.rate_cents,
                });
            }
            ClientEvent::AcceptSession { session } => {
                match self.sessions.accept_session(me, &session).await {
                    Ok(_) => {}
                    Err(BrokerError::Forbidden(reason)) => {
                        debug!(session_id = %session, participant = %me, %reason, "accept ignored");
                    }
                    Err(e) => return Err(e),
                }
            }
            ClientEvent::Signal { session, signal } => {
                self.sessions.relay_signal(me, &session, signal)?;
            }
            ClientEvent::Connectivity { session, connected } => {
                self.sessions
                    .report_connectivity_by(me, &session, connected)
                    .await?;
            }
            ClientEvent::Chat { session, text } => {
                self.sessions.chat(me, &session, text).await?;
            }
            ClientEvent::EndSession { session } => {
                self.sessions.end_session_by(me, &session).await?;
            }
            ClientEvent::StartBroadcast { title } => {
                self.broadcasts
                    .start_broadcast(me, connection.id(), &title)?;
            }
            ClientEvent::ListBroadcasts => {
                connection.send(ServerEvent::BroadcastList {
                    streams: self.broadcasts.list_broadcasts(),
                });
            }
            ClientEvent::JoinBroadcast { stream } => {
                self.broadcasts.join_broadcast(me, &stream)?;
            }
            ClientEvent::LeaveBroadcast => {
                self.broadcasts.leave_broadcast(me);
            }
            ClientEvent::LiveSignal {
                stream,
                signal,
                to: None,
            } => {
                self.broadcasts.relay_from_viewer(me, &stream, signal)?;
            }
            ClientEvent::LiveSignal {
                stream,
                signal,
                to: Some(to),
            } => {
                self.broadcasts
                    .relay_from_broadcaster(connection.id(), &stream, &to, signal)?;
            }
            ClientEvent::Gift {
                stream,
                amount_cents,
            } => {
                self.broadcasts.send_gift(me, &stream, amount_cents).await?;
            }
            ClientEvent::LiveChat { stream, text } => {
                self.broadcasts.chat(me, &stream, text)?;
            }
            ClientEvent::EndBroadcast { stream } => {
                self.broadcasts.end_broadcast(connection.id(), &stream)?;
            }
        }
        Ok(())
    }

    fn report(&self, connection: &ConnectionHandle, error: BrokerError) {
        match &error {
            BrokerError::AlreadyTerminated(session) => {
                debug!(session_id = %session, "duplicate termination ignored");
                return;
            }
            BrokerError::Service(e) => {
                warn!(connection = %connection.id(), error = %e, "collaborator failure");
            }
            _ => {
                debug!(connection = %connection.id(), error = %error, "request rejected");
            }
        }
        connection.send(ServerEvent::Error {
            code: error.code(),
            message: error.to_string(),
        });
    }

    /// Tear down everything bound to a closed transport connection.
    pub async fn close_connection(&self, connection: &ConnectionHandle) {
        let offline: Option<ParticipantId> = self.registry.forget(connection.id());
        self.broadcasts
            .connection_closed(connection.id(), offline.as_ref());

        if let Some(participant) = &offline {
            self.sessions.participant_disconnected(participant).await;
        }

        debug!(
            connection = %connection.id(),
            participant = ?offline,
            dropped = connection.drop_count(),
            "connection closed"
        );
    }

    /// End every live session with `shutdown`.
    pub async fn shutdown(&self) -> Vec<SessionSummary> {
        let summaries = self.sessions.shutdown().await;
        info!(
            ended = summaries.len(),
            reason = EndReason::Shutdown.as_str(),
            "broker shut down"
        );
        summaries
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &Arc<SignalRelay> {
        &self.relay
    }

    pub fn sessions(&self) -> &SessionCoordinator {
        &self.sessions
    }

    pub fn broadcasts(&self) -> &Arc<BroadcastCoordinator> {
        &self.broadcasts
    }
}
