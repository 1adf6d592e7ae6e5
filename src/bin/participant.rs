//! Scripted participant for exercising a running broker.
//!
//! Registers, then reacts to what the broker sends: a provider accepts every
//! request, both sides report connectivity once the room is open, and a
//! requester with `REQUEST_PROVIDER` set asks for a session right away.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Result, bail};
use encounter_broker::transport::connect_bidirectional;
use futures::StreamExt;
use rtc_wire::client::{LinkDialer, LinkDialerConfig};
use rtc_wire::proto::{self, ClientFrame, client_frame, server_frame};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = std::env::var("RELAY_URL").unwrap_or_else(|_| "https://localhost:4443".to_string());
    let participant_id =
        std::env::var("PARTICIPANT_ID").unwrap_or_else(|_| Uuid::new_v4().to_string());
    let role = match std::env::var("PARTICIPANT_ROLE").as_deref() {
        Ok("provider") => proto::Role::Provider,
        Ok("requester") | Err(_) => proto::Role::Requester,
        Ok(other) => bail!("PARTICIPANT_ROLE must be 'requester' or 'provider', got '{other}'"),
    };
    let request_provider = std::env::var("REQUEST_PROVIDER").ok();

    info!(participant = %participant_id, role = ?role, relay = %url, "participant connecting");

    let (_session, producer, consumer) = connect_bidirectional(&url).await?;
    let dialer = LinkDialer::new(
        Arc::new(producer),
        consumer,
        LinkDialerConfig::new(participant_id.clone()),
    );
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let mut link = dialer.dial(epoch).await?;

    link.send(&frame(client_frame::Event::Register(proto::Register {
        participant_id: participant_id.clone(),
        role: role as i32,
    })))?;

    if let Some(provider_id) = request_provider {
        link.send(&frame(client_frame::Event::RequestSession(
            proto::RequestSession { provider_id },
        )))?;
    }

    loop {
        let next = tokio::select! {
            next = link.next() => next,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(item) = next else {
            info!("broker closed the link");
            break;
        };
        let received = match item {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "bad frame from broker");
                continue;
            }
        };

        let Some(event) = received.event else {
            continue;
        };
        match event {
            server_frame::Event::NewSessionRequest(request) if role == proto::Role::Provider => {
                info!(session_id = %request.session_id, requester = %request.requester_id, "accepting request");
                link.send(&frame(client_frame::Event::AcceptSession(proto::SessionRef {
                    session_id: request.session_id,
                })))?;
            }
            server_frame::Event::SessionAccepted(accepted) => {
                info!(session_id = %accepted.session_id, room = %accepted.room_id, "room open");
                link.send(&frame(client_frame::Event::Connectivity(proto::Connectivity {
                    session_id: accepted.session_id,
                    connected: true,
                })))?;
            }
            server_frame::Event::UsageTick(tick) => {
                info!(
                    session_id = %tick.session_id,
                    interval = tick.interval_index,
                    charged = tick.charged_cents,
                    total = tick.total_cents,
                    "usage tick"
                );
            }
            server_frame::Event::SessionEnded(ended) => {
                info!(session_id = %ended.session_id, reason = %ended.reason, "session ended");
            }
            server_frame::Event::Error(notice) => {
                warn!(code = %notice.code, message = %notice.message, "broker error");
            }
            other => info!(event = ?other, "broker event"),
        }
    }

    Ok(())
}

fn frame(event: client_frame::Event) -> ClientFrame {
    ClientFrame { event: Some(event) }
}
