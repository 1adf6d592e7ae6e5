//! Billed 1:1 sessions.
//!
//! [`SessionCoordinator`] validates requests and acceptance, then hands each
//! accepted session to its own actor task which owns the [`Session`] state,
//! the [`BillingClock`] and the [`DisconnectMonitor`].

mod actor;
mod billing;
mod coordinator;
mod monitor;
mod state;
mod table;

pub use billing::BillingClock;
pub use coordinator::{SessionCoordinator, SessionQuote};
pub use monitor::DisconnectMonitor;
pub use state::{ConnectivityChange, Session, SessionStatus, SessionSummary};
