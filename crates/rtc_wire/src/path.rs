use std::fmt;

use crate::error::WirePathError;

/// An announced link path: `{client_id}/{epoch}`
///
/// Every transport connection a participant opens announces a fresh epoch,
/// so a reconnect never collides with a link the relay has not yet retired.
///
/// Example: `client-7/1718000000123`
/// - `client_id`: `client-7`
/// - `epoch`: `1718000000123`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkPath {
    pub client_id: String,
    pub epoch: u64,
}

impl LinkPath {
    pub fn new(client_id: impl Into<String>, epoch: u64) -> Self {
        Self {
            client_id: client_id.into(),
            epoch,
        }
    }

    /// Parse a path string into a LinkPath.
    ///
    /// The client_id can contain slashes, so we split from the right.
    pub fn parse(path: &str) -> Result<Self, WirePathError> {
        let path = path.strip_prefix('/').unwrap_or(path);

        let (client_id, epoch) = path.rsplit_once('/').ok_or_else(|| {
            WirePathError::Invalid(format!("path must be client_id/epoch: '{path}'"))
        })?;

        if client_id.is_empty() {
            return Err(WirePathError::Invalid(format!(
                "client_id must be non-empty: '{path}'"
            )));
        }

        let epoch = epoch
            .parse::<u64>()
            .map_err(|_| WirePathError::Invalid(format!("epoch must be numeric: '{epoch}'")))?;

        Ok(LinkPath {
            client_id: client_id.to_owned(),
            epoch,
        })
    }
}

impl fmt::Display for LinkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client_id, self.epoch)
    }
}
