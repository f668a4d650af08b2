//! The signing sequence: check a session out of the pool of the label, resolve the key,
//! sign, and start over on a fresh session when the hardware fails, up to `max_retry` times.

use serde::Serialize;
use sign_proxy_base_hsm::{SigningMechanism, SlotId};
use tracing::{debug, error, info, warn};

use crate::{BResult, BrokerError, context::WorkerContext, session_pool::PooledSession};

/// One signing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// token label, or slot id
    pub label: String,
    pub key_name: String,
    pub mechanism: String,
    pub data: Vec<u8>,
    /// return the certificate of the key, when there is one
    pub include_cert: bool,
    /// fail when the key has no certificate; implies `include_cert`
    pub require_cert: bool,
}

impl SignRequest {
    /// A raw signature request with the default mechanism
    #[must_use]
    pub fn new(label: &str, key_name: &str, data: Vec<u8>) -> Self {
        Self {
            label: label.to_owned(),
            key_name: key_name.to_owned(),
            mechanism: SigningMechanism::default().to_string(),
            data,
            include_cert: false,
            require_cert: false,
        }
    }

    #[must_use]
    pub fn with_mechanism(mut self, mechanism: &str) -> Self {
        mechanism.clone_into(&mut self.mechanism);
        self
    }

    #[must_use]
    pub const fn require_certificate(mut self) -> Self {
        self.include_cert = true;
        self.require_cert = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignResponse {
    pub slot: SlotId,
    pub signature: Vec<u8>,
    pub certificate: Option<String>,
}

fn slot_text(slot: Option<SlotId>) -> String {
    slot.map_or_else(|| "?".to_owned(), |slot| slot.to_string())
}

impl WorkerContext {
    /// Sign `request.data` with the key `request.key_name` of the token labelled `request.label`.
    ///
    /// Hardware and transport failures are retried on a fresh session, after a random
    /// delay, until `max_retry` attempts were made. Caller errors fail at once.
    pub fn sign(&self, request: &SignRequest) -> BResult<SignResponse> {
        let mechanism = SigningMechanism::resolve(&request.mechanism)
            .map_err(|_| BrokerError::UnknownMechanism(request.mechanism.clone()))?;
        let max_retry = self.params().max_retry.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                "[{}/{}] sign attempt {attempt}/{max_retry}",
                request.label, request.key_name
            );
            let result = self
                .pool(&request.label)
                .and_then(|pool| {
                    pool.with_allocation(|session| sign_with(session, request, mechanism))
                });
            match result {
                Ok(response) => {
                    info!(
                        "[{}/{}] signed {} bytes with {mechanism} on slot {} at attempt {attempt}",
                        request.label,
                        request.key_name,
                        request.data.len(),
                        response.slot
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < max_retry => {
                    warn!(
                        "[{}/{}] attempt {attempt}/{max_retry} failed on slot {}: {e}",
                        request.label,
                        request.key_name,
                        slot_text(e.slot())
                    );
                    self.params().backoff.sleep();
                }
                Err(e) if e.is_retryable() => {
                    error!(
                        "[{}/{}] attempt {attempt}/{max_retry} failed on slot {}, giving up: {e}",
                        request.label,
                        request.key_name,
                        slot_text(e.slot())
                    );
                    return Err(BrokerError::RetryBudgetExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    error!(
                        "[{}/{}] attempt {attempt} failed on slot {}: {e}",
                        request.label,
                        request.key_name,
                        slot_text(e.slot())
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// One attempt on a checked out session
fn sign_with(
    session: &PooledSession,
    request: &SignRequest,
    mechanism: SigningMechanism,
) -> BResult<SignResponse> {
    let mut info = session.lock()?;
    // raw signatures look the certificate up too: the key cache keeps the first answer
    // for a name, and a later certificate request on this session reads it from there
    let entry = info.find_key(&request.key_name, true)?;
    let Some(key) = entry.key else {
        return Err(BrokerError::KeyNotFound(request.key_name.clone()));
    };
    if request.require_cert && entry.certificate.is_none() {
        return Err(BrokerError::CertificateRequired(request.key_name.clone()));
    }
    let signature = info.sign(key, &request.data, mechanism)?;
    Ok(SignResponse {
        slot: info.slot(),
        signature,
        certificate: if request.include_cert || request.require_cert {
            entry.certificate
        } else {
            None
        },
    })
}
