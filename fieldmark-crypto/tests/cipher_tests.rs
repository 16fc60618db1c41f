use fieldmark_crypto::{derive_record_key, open, seal, DerivedKey, KdfParams, NONCE_SIZE, TAG_SIZE};

fn test_key() -> DerivedKey {
    derive_record_key(b"test-machine-secret", b"test-entropy", &KdfParams::fast_insecure())
        .unwrap()
}

#[test]
fn seal_open_roundtrip() {
    let key = test_key();
    let envelope = seal(&key, b"hello, world").unwrap();
    let plaintext = open(&key, &envelope).unwrap();
    assert_eq!(plaintext, b"hello, world");
}

#[test]
fn seal_open_empty() {
    let key = test_key();
    let envelope = seal(&key, b"").unwrap();
    assert_eq!(open(&key, &envelope).unwrap(), b"");
}

#[test]
fn seal_open_large_record() {
    let key = test_key();
    let plaintext: Vec<u8> = (0..20_000).map(|i| (i % 256) as u8).collect();
    let envelope = seal(&key, &plaintext).unwrap();
    assert_eq!(open(&key, &envelope).unwrap(), plaintext);
}

#[test]
fn wrong_key_fails() {
    let k1 = test_key();
    let k2 = derive_record_key(b"other-secret", b"test-entropy", &KdfParams::fast_insecure())
        .unwrap();
    let envelope = seal(&k1, b"secret").unwrap();
    assert!(open(&k2, &envelope).is_err());
}

#[test]
fn tampered_envelope_fails() {
    use base64::{engine::general_purpose::STANDARD, Engine};
    let key = test_key();
    let envelope = seal(&key, b"secret").unwrap();

    let mut bytes = STANDARD.decode(&envelope).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    let tampered = STANDARD.encode(&bytes);

    assert!(open(&key, &tampered).is_err());
}

#[test]
fn same_plaintext_different_envelopes() {
    // Random nonce per seal
    let key = test_key();
    let e1 = seal(&key, b"same").unwrap();
    let e2 = seal(&key, b"same").unwrap();
    assert_ne!(e1, e2);
}

#[test]
fn envelope_too_short_fails() {
    use base64::{engine::general_purpose::STANDARD, Engine};
    let key = test_key();
    let short = STANDARD.encode([0u8; NONCE_SIZE + TAG_SIZE - 1]);
    assert!(open(&key, &short).is_err());
}

#[test]
fn invalid_base64_fails() {
    let key = test_key();
    assert!(open(&key, "!!!not-base64!!!").is_err());
}

#[test]
fn envelope_tolerates_surrounding_whitespace() {
    let key = test_key();
    let envelope = seal(&key, b"padded").unwrap();
    let padded = format!("  {envelope}\n");
    assert_eq!(open(&key, &padded).unwrap(), b"padded");
}

// ── Property: roundtrip over arbitrary records ──────────────────

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn roundtrip_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let key = test_key();
            let envelope = seal(&key, &data).unwrap();
            prop_assert_eq!(open(&key, &envelope).unwrap(), data);
        }
    }
}
