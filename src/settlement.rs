use std::sync::Arc;

use tracing::{debug, info};

use crate::collaborators::{Payout, PayoutGateway};
use crate::error::{ConfigError, ServiceError};
use crate::event::Cents;
use crate::ids::{ParticipantId, SessionId};

const FULL_SPLIT_BASIS_POINTS: u32 = 10_000;

/// The provider's share of every charged amount, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutSplit {
    basis_points: u32,
}

impl PayoutSplit {
    pub fn from_basis_points(basis_points: u32) -> Option<Self> {
        (basis_points <= FULL_SPLIT_BASIS_POINTS).then_some(Self { basis_points })
    }

    /// Parse a fraction in `[0, 1]`, e.g. `0.85`.
    pub fn from_fraction(fraction: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigError::Invalid {
                name: "PROVIDER_PAYOUT_FRACTION",
                value: fraction.to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        Ok(Self {
            basis_points: (fraction * f64::from(FULL_SPLIT_BASIS_POINTS)).round() as u32,
        })
    }

    pub fn basis_points(&self) -> u32 {
        self.basis_points
    }

    /// Provider share of `amount`, rounded down.
    pub fn provider_share(&self, amount: Cents) -> Cents {
        (u128::from(amount) * u128::from(self.basis_points) / u128::from(FULL_SPLIT_BASIS_POINTS))
            as Cents
    }
}

impl Default for PayoutSplit {
    fn default() -> Self {
        Self {
            basis_points: 8_500,
        }
    }
}

/// Pays providers their share when a session is finalized.
pub struct Settlement {
    payouts: Arc<dyn PayoutGateway>,
    split: PayoutSplit,
}

impl Settlement {
    pub fn new(payouts: Arc<dyn PayoutGateway>, split: PayoutSplit) -> Self {
        Self { payouts, split }
    }

    /// Request a transfer of the provider's share. Zero shares transfer nothing.
    pub async fn settle(
        &self,
        session: &SessionId,
        provider: &ParticipantId,
        amount_charged: Cents,
    ) -> Result<Option<Payout>, ServiceError> {
        let share = self.split.provider_share(amount_charged);
        if share == 0 {
            debug!(session_id = %session, amount_charged, "nothing to settle");
            return Ok(None);
        }

        let payout = Payout {
            session_id: session.clone(),
            provider_id: provider.clone(),
            amount_cents: share,
        };
        self.payouts.settle_payout(&payout).await?;

        info!(
            session_id = %session,
            provider = %provider,
            amount_charged,
            share,
            "provider payout requested"
        );
        Ok(Some(payout))
    }
}
