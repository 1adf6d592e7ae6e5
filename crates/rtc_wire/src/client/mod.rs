//! Client-side types for rtc_wire.
//!
//! # Example
//!
//! ```ignore
//! use rtc_wire::client::{LinkDialer, LinkDialerConfig};
//! use futures::StreamExt;
//!
//! let config = LinkDialerConfig::new("client-7");
//! let dialer = LinkDialer::new(producer, consumer, config);
//!
//! let mut link = dialer.dial(epoch).await?;
//! link.send(&register_frame)?;
//! while let Some(frame) = link.next().await {
//!     println!("Got: {:?}", frame?);
//! }
//! ```

mod config;
mod connection;
mod dialer;

pub use config::LinkDialerConfig;
pub use connection::{LinkConnection, LinkReceiver, LinkSender};
pub use dialer::LinkDialer;
