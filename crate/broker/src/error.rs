use sign_proxy_base_hsm::{HError, SlotId};
use thiserror::Error;

pub type BResult<T> = Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("cannot load the PKCS#11 module {path}: {reason}")]
    DriverLoad { path: String, reason: String },

    #[error("no slot presents the label {0}")]
    NoSlotForLabel(String),

    #[error("cannot open a session{}: {reason}", slot_suffix(*.slot))]
    SessionOpen {
        slot: Option<SlotId>,
        reason: String,
    },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("no certificate found for key {0}")]
    CertificateRequired(String),

    #[error("unknown mechanism: {0}")]
    UnknownMechanism(String),

    #[error("object search failed on slot {slot}: {reason}")]
    ObjectSearch { slot: SlotId, reason: String },

    #[error("signing failed on slot {slot}: {reason}")]
    Signing { slot: SlotId, reason: String },

    #[error("giving up after {attempts} attempts: {last}")]
    RetryBudgetExhausted {
        attempts: usize,
        last: Box<BrokerError>,
    },

    #[error(transparent)]
    Driver(#[from] HError),

    #[error("{0}")]
    Default(String),
}

fn slot_suffix(slot: Option<SlotId>) -> String {
    slot.map(|slot| format!(" on slot {slot}")).unwrap_or_default()
}

impl BrokerError {
    /// Hardware and transport failures are retried with a fresh session.
    /// Caller errors never are.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SessionOpen { .. } | Self::ObjectSearch { .. } | Self::Signing { .. }
        )
    }

    /// The slot the failure happened on, when known
    #[must_use]
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            Self::SessionOpen { slot, .. } => *slot,
            Self::ObjectSearch { slot, .. } | Self::Signing { slot, .. } => Some(*slot),
            Self::RetryBudgetExhausted { last, .. } => last.slot(),
            _ => None,
        }
    }
}
