use thiserror::Error;

/// Errors that can occur while parsing announced link paths.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WirePathError {
    #[error("invalid link path: {0}")]
    Invalid(String),
}

/// Errors that can occur when dialing the broker from a participant.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WireClientError {
    /// Failed to create the participant's outbound broadcast.
    #[error("failed to create broadcast: {0}")]
    BroadcastCreate(String),

    /// Timeout waiting for the broker's reply broadcast.
    #[error("timeout waiting for broker broadcast")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

/// Errors that can occur while running the link listener.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WireServerError {
    /// Failed to parse an announced link path.
    #[error(transparent)]
    Path(#[from] WirePathError),

    /// A link is already attached for this client and epoch.
    #[error("link already attached for client '{client_id}' at epoch {epoch}")]
    LinkAlreadyAttached { client_id: String, epoch: u64 },

    /// The announcement is older than the participant's current link.
    #[error("link for client '{client_id}' at epoch {epoch} is older than current epoch {current}")]
    StaleEpoch {
        client_id: String,
        epoch: u64,
        current: u64,
    },

    /// Failed to create the reply broadcast.
    #[error("failed to create broadcast: {0}")]
    BroadcastCreate(String),

    /// Authorization failed for the requested prefix.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Errors that can occur while encoding outbound frames.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WireSendError {
    #[error("protobuf encode error")]
    Encode(#[from] prost::EncodeError),
}

/// Errors surfaced while reading frames from an established link.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WireError {
    /// Failed to decode a protobuf frame.
    #[error("protobuf decode error")]
    Decode(#[from] prost::DecodeError),

    /// An error from the underlying MoQ transport.
    #[error("MoQ transport error")]
    Transport(#[from] moq_lite::Error),
}
