use std::time::Duration;

use crate::path::LinkPath;

/// Configuration for a participant dialing the broker.
#[derive(Debug, Clone)]
pub struct LinkDialerConfig {
    /// Prefix for participant broadcasts (e.g., "participant").
    /// Participant broadcasts are created at `{client_prefix}/{client_id}/{epoch}`.
    pub client_prefix: String,

    /// Prefix for broker replies (e.g., "broker").
    /// The participant consumes `{reply_prefix}/{client_id}/{epoch}`.
    pub reply_prefix: String,

    /// Track name for frames (e.g., "primary").
    pub track_name: String,

    /// Unique client identifier.
    pub client_id: String,

    /// Timeout for waiting for the broker's reply broadcast.
    pub timeout: Duration,
}

impl Default for LinkDialerConfig {
    fn default() -> Self {
        Self {
            client_prefix: "participant".to_string(),
            reply_prefix: "broker".to_string(),
            track_name: "primary".to_string(),
            client_id: String::new(), // Must be set by user
            timeout: Duration::from_secs(30),
        }
    }
}

impl LinkDialerConfig {
    /// Create a new config with the given client ID.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    pub fn with_client_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_prefix = prefix.into();
        self
    }

    pub fn with_reply_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reply_prefix = prefix.into();
        self
    }

    pub fn with_track_name(mut self, name: impl Into<String>) -> Self {
        self.track_name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn link_path(&self, epoch: u64) -> LinkPath {
        LinkPath::new(self.client_id.clone(), epoch)
    }

    pub(crate) fn client_path(&self, link: &LinkPath) -> String {
        format!("{}/{}", self.client_prefix, link)
    }

    pub(crate) fn reply_path(&self, link: &LinkPath) -> String {
        format!("{}/{}", self.reply_prefix, link)
    }
}
