use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep};

/// Grace-period deadline armed when a session drops below "both connected".
///
/// At most one deadline is outstanding; arming while armed keeps the
/// original deadline.
#[derive(Debug)]
pub struct DisconnectMonitor {
    grace: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl DisconnectMonitor {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            deadline: None,
        }
    }

    /// Arm a deadline at now + grace. Returns `false` if already armed.
    pub fn arm(&mut self) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Box::pin(sleep(self.grace)));
        true
    }

    /// Clear the pending deadline. Returns `true` if one was armed.
    pub fn disarm(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.as_ref().map(|sleep| sleep.deadline())
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Complete once the armed deadline passes, then disarm. Pending forever
    /// while disarmed. Cancel safe.
    pub async fn expired(&mut self) {
        match self.deadline.as_mut() {
            Some(deadline) => {
                deadline.as_mut().await;
                self.deadline = None;
            }
            None => future::pending().await,
        }
    }
}
