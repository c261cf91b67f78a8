//! authenticatorReset command
//!
//! Wipes every credential, the PIN and the configuration after the user
//! confirms with a touch.

use alloc::vec::Vec;

use crate::authenticator::Authenticator;
use crate::hal::Platform;
use crate::status::Result;
use crate::storage::Flash;

/// Handle authenticatorReset
pub fn handle<F: Flash, P: Platform>(auth: &mut Authenticator<F, P>) -> Result<Vec<u8>> {
    let timeout_ms = auth.config().reset_timeout_ms;
    auth.wait_for_user_presence_within(timeout_ms)?;
    auth.reset()?;
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{self, NeverPress, authenticator, resident_credential};
    use crate::status::StatusCode;
    use openfido_crypto::digest;

    #[test]
    fn test_reset_wipes_store() {
        let mut auth = authenticator();
        auth.store_mut().set_pin_hash(digest::sha256(b"1234")).unwrap();
        auth.store_mut().store(&resident_credential([1; 16], "example.com", b"alice")).unwrap();
        auth.store_mut().update_pin_record(|pin| pin.always_uv = true).unwrap();

        handle(&mut auth).unwrap();
        assert!(!auth.is_pin_set());
        assert!(!auth.always_uv());
        assert_eq!(auth.store_mut().count().unwrap(), 0);
    }

    #[test]
    fn test_reset_needs_touch() {
        let mut auth = test_support::authenticator_with(NeverPress);
        auth.store_mut().store(&resident_credential([1; 16], "example.com", b"alice")).unwrap();
        assert_eq!(handle(&mut auth), Err(StatusCode::UserActionTimeout));
        assert_eq!(auth.store_mut().count().unwrap(), 1);
    }
}
