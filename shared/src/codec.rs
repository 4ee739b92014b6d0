//! Line codec: AES-128 in ECB mode with PKCS#7 padding, wrapped in base64
//!
//! The key is a compiled-in constant and ECB carries no IV, so equal plaintexts
//! always produce equal frames. Anyone holding the binary can read the traffic
//! and an observer can tell when a message repeats. Both properties are known
//! weaknesses; every peer must agree on them to interoperate.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ecb::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyInit};
use std::fmt;

use crate::error::DecodeError;

type Aes128EcbEnc = ecb::Encryptor<aes::Aes128>;
type Aes128EcbDec = ecb::Decryptor<aes::Aes128>;

pub const KEY_LEN: usize = 16;

/// Pre-shared key used by every client and the server
pub const DEFAULT_KEY: CipherKey = CipherKey(*b"MySuperSecretKey");

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CipherKey([u8; KEY_LEN]);

impl CipherKey {
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

/// Encrypts plaintext into a single newline-free line and back
#[derive(Debug, Clone)]
pub struct CipherCodec {
    key: CipherKey,
}

impl CipherCodec {
    pub fn new(key: CipherKey) -> Self {
        Self { key }
    }

    pub fn encode(&self, plaintext: &str) -> String {
        let ciphertext = Aes128EcbEnc::new(&self.key.0.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        BASE64.encode(ciphertext)
    }

    /// Reverses `encode`. A trailing line terminator is ignored.
    pub fn decode(&self, line: &str) -> Result<String, DecodeError> {
        let ciphertext = BASE64.decode(line.trim_end_matches(['\r', '\n']))?;
        let plaintext = Aes128EcbDec::new(&self.key.0.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| DecodeError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

impl Default for CipherCodec {
    fn default() -> Self {
        Self::new(DEFAULT_KEY)
    }
}
