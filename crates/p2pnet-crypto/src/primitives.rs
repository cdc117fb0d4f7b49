//! Stateless RSA, AES-CFB and HMAC-SHA256 operations.

use aes::{Aes128, Aes192, Aes256};
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Default symmetric key length (AES-128).
pub const SYMMETRIC_KEY_LEN: usize = 16;

/// AES block size, which is also the IV length.
pub const IV_LEN: usize = 16;

/// HMAC-SHA256 output length.
pub const MAC_LEN: usize = 32;

/// Generate an RSA private key of `bits` bits.
pub fn generate_keypair(bits: usize) -> Result<(RsaPublicKey, RsaPrivateKey), CryptoError> {
    let private = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    Ok((RsaPublicKey::from(&private), private))
}

/// Encrypt `plaintext` under `public` with PKCS#1 v1.5 padding.
///
/// The result is exactly one block of the key's modulus size.
pub fn rsa_encrypt(public: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    public
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// Decrypt one PKCS#1 v1.5 block.
///
/// The block length is checked against the modulus size before padding is
/// examined.
pub fn rsa_decrypt(private: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let expected = private.size();
    if ciphertext.len() != expected {
        return Err(CryptoError::BlockSizeMismatch {
            expected,
            actual: ciphertext.len(),
        });
    }
    private
        .decrypt(Pkcs1v15Encrypt, ciphertext)
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// Fresh random key material from the OS CSPRNG.
pub fn generate_symmetric_key(len: usize) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut key = Zeroizing::new(vec![0u8; len]);
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(key)
}

/// AES-CFB encrypt. Returns `iv || ciphertext` with a random IV.
///
/// The key length picks AES-128, AES-192 or AES-256.
pub fn aes_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = vec![0u8; IV_LEN + plaintext.len()];
    let (iv, body) = out.split_at_mut(IV_LEN);
    OsRng
        .try_fill_bytes(iv)
        .map_err(|e| CryptoError::Random(e.to_string()))?;
    body.copy_from_slice(plaintext);
    cfb_apply(key, iv, body, Direction::Encrypt)?;
    Ok(out)
}

/// AES-CFB decrypt `iv || ciphertext`.
pub fn aes_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < IV_LEN {
        return Err(CryptoError::CiphertextTooShort(data.len(), IV_LEN));
    }
    let (iv, body) = data.split_at(IV_LEN);
    let mut plaintext = body.to_vec();
    cfb_apply(key, iv, &mut plaintext, Direction::Decrypt)?;
    Ok(plaintext)
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

fn cfb_apply(key: &[u8], iv: &[u8], buf: &mut [u8], direction: Direction) -> Result<(), CryptoError> {
    let invalid = |_| CryptoError::InvalidKeyLength(key.len());
    match (key.len(), direction) {
        (16, Direction::Encrypt) => {
            cfb_mode::Encryptor::<Aes128>::new_from_slices(key, iv).map_err(invalid)?.encrypt(buf)
        }
        (16, Direction::Decrypt) => {
            cfb_mode::Decryptor::<Aes128>::new_from_slices(key, iv).map_err(invalid)?.decrypt(buf)
        }
        (24, Direction::Encrypt) => {
            cfb_mode::Encryptor::<Aes192>::new_from_slices(key, iv).map_err(invalid)?.encrypt(buf)
        }
        (24, Direction::Decrypt) => {
            cfb_mode::Decryptor::<Aes192>::new_from_slices(key, iv).map_err(invalid)?.decrypt(buf)
        }
        (32, Direction::Encrypt) => {
            cfb_mode::Encryptor::<Aes256>::new_from_slices(key, iv).map_err(invalid)?.encrypt(buf)
        }
        (32, Direction::Decrypt) => {
            cfb_mode::Decryptor::<Aes256>::new_from_slices(key, iv).map_err(invalid)?.decrypt(buf)
        }
        (len, _) => return Err(CryptoError::InvalidKeyLength(len)),
    }
    Ok(())
}

/// HMAC-SHA256 of `message`.
pub fn hmac_sign(key: &[u8], message: &[u8]) -> Result<[u8; MAC_LEN], CryptoError> {
    let mut mac = new_mac(key)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time HMAC-SHA256 check.
pub fn hmac_verify(key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    match new_mac(key) {
        Ok(mut mac) => {
            mac.update(message);
            mac.verify_slice(tag).is_ok()
        }
        Err(_) => false,
    }
}

fn new_mac(key: &[u8]) -> Result<HmacSha256, CryptoError> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))
}

/// Encrypt with `secret`, then MAC with `mac_key`: `mac || iv || ciphertext`.
pub fn authenticated_encrypt(
    plaintext: &[u8],
    secret: &[u8],
    mac_key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = aes_encrypt(secret, plaintext)?;
    let tag = hmac_sign(mac_key, &ciphertext)?;

    let mut blob = Vec::with_capacity(MAC_LEN + ciphertext.len());
    blob.extend_from_slice(&tag);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Verify the MAC, then decrypt. Nothing is decrypted on a mismatch.
pub fn authenticated_decrypt(
    blob: &[u8],
    secret: &[u8],
    mac_key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < MAC_LEN + IV_LEN {
        return Err(CryptoError::CiphertextTooShort(blob.len(), MAC_LEN + IV_LEN));
    }
    let (tag, ciphertext) = blob.split_at(MAC_LEN);
    if !hmac_verify(mac_key, ciphertext, tag) {
        return Err(CryptoError::MacMismatch);
    }
    aes_decrypt(secret, ciphertext)
}
