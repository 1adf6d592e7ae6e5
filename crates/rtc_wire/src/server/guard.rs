use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::error::WireServerError;
use crate::path::LinkPath;

/// The current link epoch of each participant.
///
/// A participant that reconnects announces a higher epoch, which supersedes
/// the link it had before. Announcements at or below the current epoch are
/// refused.
#[derive(Debug, Default)]
pub struct LinkMap {
    epochs: DashMap<String, u64, ahash::RandomState>,
}

impl LinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `path` the participant's current link.
    pub fn try_attach(self: &Arc<Self>, path: LinkPath) -> Result<LinkGuard, WireServerError> {
        match self.epochs.entry(path.client_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(path.epoch);
            }
            Entry::Occupied(mut slot) => {
                let current = *slot.get();
                if path.epoch == current {
                    return Err(WireServerError::LinkAlreadyAttached {
                        client_id: path.client_id,
                        epoch: path.epoch,
                    });
                }
                if path.epoch < current {
                    return Err(WireServerError::StaleEpoch {
                        client_id: path.client_id,
                        epoch: path.epoch,
                        current,
                    });
                }
                info!(client_id = %path.client_id, old = current, new = path.epoch, "link superseded");
                slot.insert(path.epoch);
            }
        }

        Ok(LinkGuard {
            path,
            map: Arc::clone(self),
        })
    }

    pub fn current_epoch(&self, client_id: &str) -> Option<u64> {
        self.epochs.get(client_id).map(|epoch| *epoch)
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

/// Keeps a link registered as current. Dropping it clears the entry unless a
/// newer epoch has taken over.
pub struct LinkGuard {
    path: LinkPath,
    map: Arc<LinkMap>,
}

impl LinkGuard {
    pub fn path(&self) -> &LinkPath {
        &self.path
    }

    /// `false` once the participant has attached a newer link.
    pub fn is_current(&self) -> bool {
        self.map.current_epoch(&self.path.client_id) == Some(self.path.epoch)
    }
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        let epoch = self.path.epoch;
        self.map
            .epochs
            .remove_if(&self.path.client_id, |_, current| *current == epoch);
    }
}

impl fmt::Debug for LinkGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkGuard").field("path", &self.path).finish()
    }
}
