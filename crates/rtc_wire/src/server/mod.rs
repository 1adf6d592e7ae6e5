//! Server-side types for rtc_wire.
//!
//! This module contains the `LinkListener`, which turns participant
//! announcements into bidirectional frame links for the broker.

mod config;
mod guard;
mod link;
mod listener;

pub use config::LinkListenerConfig;
pub use guard::{LinkGuard, LinkMap};
pub use link::{Link, LinkHandler, LinkKeepAlive};
pub use listener::LinkListener;
