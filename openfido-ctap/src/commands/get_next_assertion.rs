//! authenticatorGetNextAssertion command
//!
//! Signs the next credential queued by a discovering
//! authenticatorGetAssertion. The queue is dropped by any other command.

use alloc::vec::Vec;

use super::get_assertion::{encode_assertion, sign_assertion};
use crate::authenticator::Authenticator;
use crate::hal::Platform;
use crate::status::{Result, StatusCode};
use crate::storage::Flash;

/// Handle authenticatorGetNextAssertion
pub fn handle<F: Flash, P: Platform>(auth: &mut Authenticator<F, P>) -> Result<Vec<u8>> {
    let mut pending = auth.pending_assertions.take().ok_or(StatusCode::NoOperationPending)?;
    let id = pending.credential_ids.pop_front().ok_or(StatusCode::NoOperationPending)?;

    let credential = auth.store_mut().find(&id)?;
    if credential.rp_id_hash != pending.rp_id_hash {
        log::warn!("Queued credential no longer matches the RP");
        return Err(StatusCode::NoCredentials);
    }

    let assertion = sign_assertion(
        auth,
        credential,
        &pending.client_data_hash,
        pending.flags,
        pending.hmac_secret.as_ref(),
    )?;
    if !pending.credential_ids.is_empty() {
        auth.pending_assertions = Some(pending);
    }
    encode_assertion(auth.config().max_msg_size, &assertion, None)
}
