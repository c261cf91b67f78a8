//! Credential management over the dispatcher: metadata, enumeration,
//! cursor invalidation and deletion.

mod common;

use common::*;
use openfido_crypto::digest;
use openfido_ctap::cbor::Decoder;
use openfido_ctap::{Permission, StatusCode};

/// Create resident credentials for `users` and return a token with the
/// credential management permission
fn populate(dispatcher: &mut TestDispatcher, users: &[&[u8]]) -> Vec<u8> {
    let permissions =
        u64::from(Permission::MakeCredential.to_u8() | Permission::GetAssertion.to_u8());
    let token = pin_token(dispatcher, permissions, Some(RP_ID));
    let pin_auth = authenticate(&token, &CLIENT_DATA_HASH);
    for user in users {
        let request = make_credential_request(
            true,
            user,
            Some(PinAuth {
                param: &pin_auth,
                protocol: 2,
            }),
        );
        let (status, _) = send(dispatcher, MAKE_CREDENTIAL, &request);
        assert_eq!(status, 0x00);
    }
    pin_token(dispatcher, u64::from(Permission::CredentialManagement.to_u8()), None)
}

fn cm_request(token: &[u8], sub_command: u64, params: Option<&[u8]>) -> Vec<u8> {
    let mut message = vec![sub_command as u8];
    message.extend_from_slice(params.unwrap_or(&[]));
    let pin_auth = authenticate(token, &message);
    encode(|e| {
        e.map(3 + usize::from(params.is_some()))?;
        e.unsigned(1)?.unsigned(sub_command)?;
        if let Some(params) = params {
            e.unsigned(2)?.raw(params)?;
        }
        e.unsigned(3)?.unsigned(2)?;
        e.unsigned(4)?.bytes(&pin_auth)?;
        Ok(())
    })
}

fn bare(sub_command: u64) -> Vec<u8> {
    encode(|e| {
        e.map(1)?.unsigned(1)?.unsigned(sub_command)?;
        Ok(())
    })
}

fn rp_params() -> Vec<u8> {
    encode(|e| {
        e.map(1)?.unsigned(1)?.bytes(&digest::sha256(RP_ID.as_bytes()))?;
        Ok(())
    })
}

/// Read `{key: uint}` entries of a response
fn read_counts(body: &[u8]) -> Vec<(u64, u64)> {
    let mut dec = Decoder::new(body);
    (0..dec.map().unwrap())
        .map(|_| (dec.unsigned().unwrap(), dec.unsigned().unwrap()))
        .collect()
}

/// Credential ID and totalCredentials of an enumeration response
fn read_credential(body: &[u8]) -> (Vec<u8>, Option<u64>) {
    let mut dec = Decoder::new(body);
    let mut id = Vec::new();
    let mut total = None;
    for _ in 0..dec.map().unwrap() {
        match dec.unsigned().unwrap() {
            7 => {
                for _ in 0..dec.map().unwrap() {
                    match dec.text().unwrap() {
                        "id" => id = dec.bytes().unwrap().to_vec(),
                        _ => dec.skip().unwrap(),
                    }
                }
            }
            9 => total = Some(dec.unsigned().unwrap()),
            _ => dec.skip().unwrap(),
        }
    }
    (id, total)
}

#[test]
fn test_metadata() {
    let mut dispatcher = dispatcher();
    let token = populate(&mut dispatcher, &[b"alice", b"bob"]);

    let (status, body) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &cm_request(&token, 1, None));
    assert_eq!(status, 0x00);
    let counts = read_counts(&body);
    assert_eq!(counts[0], (1, 2));
    assert_eq!(counts[1].0, 2);
    assert!(counts[1].1 > 0);
}

#[test]
fn test_requires_token() {
    let mut dispatcher = dispatcher();
    populate(&mut dispatcher, &[b"alice"]);
    let (status, _) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &bare(1));
    assert_eq!(status, StatusCode::PinRequired.to_u8());
}

#[test]
fn test_enumerate_rps() {
    let mut dispatcher = dispatcher();
    let token = populate(&mut dispatcher, &[b"alice", b"bob"]);

    let (status, body) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &cm_request(&token, 2, None));
    assert_eq!(status, 0x00);
    let mut dec = Decoder::new(&body);
    assert_eq!(dec.map().unwrap(), 3);
    assert_eq!(dec.unsigned().unwrap(), 3);
    dec.skip().unwrap();
    assert_eq!(dec.unsigned().unwrap(), 4);
    assert_eq!(dec.bytes().unwrap(), &digest::sha256(RP_ID.as_bytes()));
    assert_eq!(dec.unsigned().unwrap(), 5);
    assert_eq!(dec.unsigned().unwrap(), 1);

    let (status, _) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &bare(3));
    assert_eq!(status, StatusCode::NoCredentials.to_u8());
}

#[test]
fn test_enumerate_credentials_and_invalidate() {
    let mut dispatcher = dispatcher();
    let token = populate(&mut dispatcher, &[b"alice", b"bob", b"carol"]);

    let request = cm_request(&token, 4, Some(&rp_params()));
    let (status, body) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &request);
    assert_eq!(status, 0x00);
    let (first, total) = read_credential(&body);
    assert_eq!(total, Some(3));

    let (status, body) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &bare(5));
    assert_eq!(status, 0x00);
    let (second, total) = read_credential(&body);
    assert_eq!(total, None);
    assert_ne!(first, second);

    // any store mutation ends the enumeration
    let request = make_credential_request(false, b"dave", None);
    let (status, _) = send(&mut dispatcher, MAKE_CREDENTIAL, &request);
    assert_eq!(status, 0x00);
    let (status, _) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &bare(5));
    assert_eq!(status, StatusCode::NoOperationPending.to_u8());
}

#[test]
fn test_delete_credential() {
    let mut dispatcher = dispatcher();
    let token = populate(&mut dispatcher, &[b"alice"]);

    let request = cm_request(&token, 4, Some(&rp_params()));
    let (_, body) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &request);
    let (id, _) = read_credential(&body);

    let params = encode(|e| {
        e.map(1)?.unsigned(2)?.map(2)?.text("id")?.bytes(&id)?.text("type")?.text("public-key")?;
        Ok(())
    });
    let delete = cm_request(&token, 6, Some(&params));
    let (status, _) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &delete);
    assert_eq!(status, 0x00);
    assert_eq!(dispatcher.authenticator_mut().store_mut().resident_count().unwrap(), 0);

    let (status, _) = send(&mut dispatcher, GET_ASSERTION, &get_assertion_request(&[&id], None));
    assert_eq!(status, StatusCode::NoCredentials.to_u8());

    let delete = cm_request(&token, 6, Some(&params));
    let (status, _) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &delete);
    assert_eq!(status, StatusCode::NoCredentials.to_u8());
}

#[test]
fn test_dropped_token_ends_enumeration() {
    let mut dispatcher = dispatcher();
    let token = populate(&mut dispatcher, &[b"alice", b"bob"]);

    let request = cm_request(&token, 4, Some(&rp_params()));
    let (status, _) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &request);
    assert_eq!(status, 0x00);

    dispatcher.authenticator_mut().pin_tokens_mut().clear();
    let (status, _) = send(&mut dispatcher, GET_INFO, &[]);
    assert_eq!(status, 0x00);
    let (status, _) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &bare(5));
    assert_ne!(status, StatusCode::Success.to_u8());
}

#[test]
fn test_dropped_token_refuses_next_step() {
    let mut dispatcher = dispatcher();
    let token = populate(&mut dispatcher, &[b"alice", b"bob"]);

    let request = cm_request(&token, 4, Some(&rp_params()));
    send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &request);
    dispatcher.authenticator_mut().pin_tokens_mut().clear();
    let (status, _) = send(&mut dispatcher, CREDENTIAL_MANAGEMENT, &bare(5));
    assert_eq!(status, StatusCode::PinRequired.to_u8());
}
