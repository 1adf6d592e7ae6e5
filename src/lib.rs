//! Coordinator for billed 1:1 encounters and one-to-many live broadcasts.
//!
//! The [`Gateway`] is the entry point: it maps participant events onto the
//! [`SessionCoordinator`] and [`BroadcastCoordinator`], which share one
//! [`SignalRelay`] over the [`ConnectionRegistry`]. Balances, durable records
//! and payouts live behind the traits in [`collaborators`].

pub mod broadcast;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod ids;
pub mod memory;
pub mod registry;
pub mod relay;
pub mod session;
pub mod settlement;
pub mod transport;

pub use broadcast::BroadcastCoordinator;
pub use collaborators::Collaborators;
pub use config::BrokerConfig;
pub use error::{BrokerError, ConfigError, ServiceError};
pub use event::{ClientEvent, EndReason, ServerEvent};
pub use gateway::Gateway;
pub use registry::ConnectionRegistry;
pub use relay::SignalRelay;
pub use session::SessionCoordinator;
pub use settlement::{PayoutSplit, Settlement};
