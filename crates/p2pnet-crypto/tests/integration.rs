//! End-to-end use of the public crypto API the way the handshake uses it.

use p2pnet_crypto::{
    authenticated_decrypt, authenticated_encrypt, generate_symmetric_key, parse_hostkey,
    rsa_encrypt, CryptoError, HostKeypair, SYMMETRIC_KEY_LEN,
};

#[test]
fn test_key_transport_and_layering() {
    let responder = HostKeypair::generate(1024).unwrap();

    // Initiator only knows the responder's hostkey bytes.
    let remote = parse_hostkey(responder.hostkey()).unwrap();
    let shared = generate_symmetric_key(SYMMETRIC_KEY_LEN).unwrap();
    let initiator_mac = generate_symmetric_key(SYMMETRIC_KEY_LEN).unwrap();

    let encrypted_key = rsa_encrypt(&remote, &shared).unwrap();
    let encrypted_mac = rsa_encrypt(&remote, &initiator_mac).unwrap();
    assert_eq!(encrypted_key.len(), responder.block_size());

    let recovered_key = responder.decrypt(&encrypted_key).unwrap();
    let recovered_mac = responder.decrypt(&encrypted_mac).unwrap();
    assert_eq!(*recovered_key, *shared);

    // Two layers, peeled in reverse.
    let inner = authenticated_encrypt(b"hello", &shared, &initiator_mac).unwrap();
    let outer = authenticated_encrypt(&inner, &recovered_key, &recovered_mac).unwrap();

    let peeled = authenticated_decrypt(&outer, &shared, &initiator_mac).unwrap();
    assert_eq!(peeled, inner);
    assert_eq!(
        authenticated_decrypt(&peeled, &recovered_key, &recovered_mac).unwrap(),
        b"hello"
    );

    // The MAC key, not the cipher key, decides whether a layer is accepted.
    assert_ne!(
        authenticated_decrypt(&outer, b"0123456789abcdef", &initiator_mac).unwrap(),
        inner
    );
    assert!(matches!(
        authenticated_decrypt(&outer, &shared, b"wrong mac key"),
        Err(CryptoError::MacMismatch)
    ));
}

#[test]
fn test_block_from_other_key_is_rejected() {
    let a = HostKeypair::generate(1024).unwrap();
    let b = HostKeypair::generate(1024).unwrap();
    let block = rsa_encrypt(a.public_key(), b"secret").unwrap();
    assert!(b.decrypt(&block).is_err());
}
