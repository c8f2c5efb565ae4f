//! Signing key and recoverable signature tests.
//!
//! - key material round-trips through bytes and hex
//! - SEC1 public key encodings and the derived account address
//! - sign, verify and signer recovery over Keccak256 digests
//! - wire form and recovery id conventions

use meridian_crypto::ecdsa::{address_from_pubkey, PrivateKey, PublicKey, Signature};
use meridian_crypto::keccak256;

// Well-known development key, so the address vector below stays stable.
const DEV_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const DEV_ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";

fn dev_key() -> PrivateKey {
    PrivateKey::from_hex(DEV_KEY).unwrap()
}

#[test]
fn test_key_material_roundtrips() {
    let key = dev_key();
    assert_eq!(format!("0x{}", key.to_hex()), DEV_KEY);

    let restored = PrivateKey::from_bytes(&key.to_bytes()).unwrap();
    assert_eq!(restored.to_bytes(), key.to_bytes());

    // Truncated, non-hex and zero-scalar inputs are all rejected
    assert!(PrivateKey::from_hex("0xdeadbeef").is_err());
    assert!(PrivateKey::from_hex(&"zz".repeat(32)).is_err());
    assert!(PrivateKey::from_bytes(&[0u8; 32]).is_err());
}

#[test]
fn test_random_keys_differ() {
    let a = PrivateKey::random();
    let b = PrivateKey::random();
    assert_ne!(a.to_bytes(), b.to_bytes());
}

#[test]
fn test_sec1_encodings_agree() {
    let public = dev_key().public_key();

    let compressed = public.to_compressed();
    let uncompressed = public.to_uncompressed();
    assert!(compressed[0] == 0x02 || compressed[0] == 0x03);

    assert_eq!(PublicKey::from_compressed(&compressed).unwrap(), public);
    assert_eq!(PublicKey::from_uncompressed(&uncompressed).unwrap(), public);
    assert_eq!(PublicKey::from_hex(&public.to_hex()).unwrap(), public);

    // A coordinate off the curve does not parse
    assert!(PublicKey::from_uncompressed(&[0xff; 64]).is_err());
}

#[test]
fn test_address_vector() {
    let public = dev_key().public_key();
    assert_eq!(public.to_address_hex(), DEV_ADDRESS);
    assert_eq!(
        public.to_address(),
        address_from_pubkey(&public.to_uncompressed())
    );
}

#[test]
fn test_sign_and_verify_digest() {
    let key = dev_key();
    let public = key.public_key();
    let digest = keccak256(b"block 12 seal");

    let sig = key.sign_prehash(&digest).unwrap();
    assert!(sig.verify_prehash(&digest, &public).unwrap());
    assert!(!sig
        .verify_prehash(&keccak256(b"block 13 seal"), &public)
        .unwrap());

    // sign() hashes for the caller
    let over_data = key.sign(b"vote payload").unwrap();
    assert!(over_data.verify(b"vote payload", &public).unwrap());
    assert!(!over_data.verify(b"other payload", &public).unwrap());
}

#[test]
fn test_recover_signer() {
    let key = dev_key();
    let digest = keccak256(b"commit vote for block 9");

    let sig = key.sign_prehash(&digest).unwrap();
    let recovered = sig.recover_prehash(&digest).unwrap();
    assert_eq!(recovered.to_address_hex(), DEV_ADDRESS);

    // A tampered digest recovers some other key, never ours
    let mut tampered = digest;
    tampered[0] ^= 0x01;
    if let Ok(wrong) = sig.recover_prehash(&tampered) {
        assert_ne!(wrong.to_address(), recovered.to_address());
    }
}

#[test]
fn test_wire_form_roundtrip() {
    let sig = dev_key().sign_prehash(&keccak256(b"wire")).unwrap();

    let restored = Signature::from_bytes(&sig.to_bytes());
    assert_eq!(restored, sig);
    assert_eq!(Signature::from_hex(&sig.to_hex()).unwrap(), sig);

    assert!(Signature::from_hex("0x1234").is_err());
}

#[test]
fn test_recovery_id_conventions() {
    let normalized = Signature::new([0u8; 32], [0u8; 32], 1);
    assert_eq!(normalized.v_normalized(), 1);
    assert_eq!(normalized.v_legacy(), 28);

    let legacy = Signature::new([0u8; 32], [0u8; 32], 27);
    assert_eq!(legacy.v_normalized(), 0);
    assert_eq!(legacy.v_legacy(), 27);

    // Fresh signatures come out normalized
    let sig = dev_key().sign_prehash(&keccak256(b"v")).unwrap();
    assert!(sig.v <= 1);
}

#[test]
fn test_public_key_serde() {
    let public = dev_key().public_key();

    let json = serde_json::to_string(&public).unwrap();
    assert_eq!(json, format!("\"{}\"", public.to_hex()));
    let from_json: PublicKey = serde_json::from_str(&json).unwrap();
    assert_eq!(from_json, public);

    let binary = bincode::serialize(&public).unwrap();
    let from_binary: PublicKey = bincode::deserialize(&binary).unwrap();
    assert_eq!(from_binary, public);
}
