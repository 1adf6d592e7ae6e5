use crate::path::LinkPath;

/// Configuration for the link listener.
#[derive(Debug, Clone)]
pub struct LinkListenerConfig {
    /// Prefix for participant announcements (e.g., "participant").
    /// The listener only accepts announcements under this prefix when set.
    pub client_prefix: Option<String>,

    /// Prefix for broker replies (e.g., "broker").
    /// Replies are published at `{reply_prefix}/{client_id}/{epoch}`.
    pub reply_prefix: String,

    /// Track name carrying frames in both directions (e.g., "primary").
    pub track_name: String,
}

impl Default for LinkListenerConfig {
    fn default() -> Self {
        Self {
            client_prefix: Some("participant".to_string()),
            reply_prefix: "broker".to_string(),
            track_name: "primary".to_string(),
        }
    }
}

impl LinkListenerConfig {
    /// Build the reply broadcast path for an announced link.
    pub fn reply_path(&self, link: &LinkPath) -> String {
        format!("{}/{}", self.reply_prefix, link)
    }
}
