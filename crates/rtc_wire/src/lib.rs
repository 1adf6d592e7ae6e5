//! Frame transport between participants and the encounter broker over MoQ.
//!
//! Each participant link is a pair of broadcasts on the relay: the
//! participant publishes `{client_prefix}/{client_id}/{epoch}` and the broker
//! answers on `{reply_prefix}/{client_id}/{epoch}`. Both carry one track
//! with one protobuf message per frame.

pub mod client;
pub mod connection;
pub mod error;
pub mod path;
pub mod proto;
pub mod server;

pub use error::{WireClientError, WireError, WirePathError, WireSendError, WireServerError};
pub use path::LinkPath;
