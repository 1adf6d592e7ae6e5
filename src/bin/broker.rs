use anyhow::{Context, Result};
use encounter_broker::collaborators::{Ledger, LedgerCause};
use encounter_broker::ids::ParticipantId;
use encounter_broker::memory::InMemoryBackend;
use encounter_broker::transport::{connect_bidirectional, serve};
use encounter_broker::{BrokerConfig, Gateway};
use rtc_wire::server::LinkListenerConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BrokerConfig::from_env()?;
    let backend = InMemoryBackend::new();
    seed_from_env(&backend).await?;

    info!(
        relay = %config.relay_url,
        billing_interval_secs = config.billing_interval.as_secs(),
        disconnect_grace_secs = config.disconnect_grace.as_secs(),
        payout_basis_points = config.payout_split.basis_points(),
        "broker starting"
    );

    let gateway = Gateway::new(&config, backend.collaborators());
    let (_session, producer, consumer) = connect_bidirectional(&config.relay_url).await?;

    let mut listener = tokio::spawn(serve(
        gateway.clone(),
        producer,
        consumer,
        LinkListenerConfig::default(),
    ));

    tokio::select! {
        result = &mut listener => match result {
            Ok(Ok(())) => info!("link listener finished"),
            Ok(Err(e)) => error!(error = %e, "link listener failed"),
            Err(e) => error!(error = %e, "link listener task panicked"),
        },
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
    }

    let ended = gateway.shutdown().await;
    for summary in &ended {
        info!(
            session_id = %summary.session,
            total_seconds = summary.total_seconds,
            amount_charged = summary.amount_charged_cents,
            "session closed at shutdown"
        );
    }
    listener.abort();

    Ok(())
}

/// Seed the in-memory directory and ledger for local runs.
///
/// `BROKER_PROVIDERS="alice:200,bob:150"` lists providers with their
/// per-interval rate; `BROKER_BALANCES="carol:1000"` tops up wallets.
async fn seed_from_env(backend: &InMemoryBackend) -> Result<()> {
    if let Ok(raw) = std::env::var("BROKER_PROVIDERS") {
        for (id, rate) in parse_pairs(&raw).context("BROKER_PROVIDERS")? {
            info!(provider = %id, rate, "provider available");
            backend.records.add_provider(id, rate);
        }
    }
    if let Ok(raw) = std::env::var("BROKER_BALANCES") {
        for (id, cents) in parse_pairs(&raw).context("BROKER_BALANCES")? {
            backend
                .ledger
                .credit(&ParticipantId::from(id), cents, LedgerCause::TopUp)
                .await?;
        }
    }
    Ok(())
}

fn parse_pairs(raw: &str) -> Result<Vec<(String, u64)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, amount) = entry
                .split_once(':')
                .with_context(|| format!("expected 'id:amount', got '{entry}'"))?;
            let amount = amount
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid amount in '{entry}'"))?;
            Ok((id.trim().to_string(), amount))
        })
        .collect()
}
