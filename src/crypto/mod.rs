use aes::Aes128;
use anyhow::{Result, anyhow};
use cipher::KeyInit;
use cmac::{Cmac, Mac};
use std::fmt;

/// A 16-byte AES key
#[derive(Clone, PartialEq, Eq)]
pub struct AesKey([u8; 16]);

impl AesKey {
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())?;
        if bytes.len() != 16 {
            return Err(anyhow!("AES key must be 16 bytes"));
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// Keys never end up in logs.
impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(..)")
    }
}

fn new_mac(key: &AesKey) -> Result<Cmac<Aes128>> {
    <Cmac<Aes128> as KeyInit>::new_from_slice(key.as_bytes())
        .map_err(|e| anyhow!("Invalid key length: {:?}", e))
}

/// AES-CMAC over `message`
pub fn cmac_tag(key: &AesKey, message: &[u8]) -> Result<[u8; 16]> {
    let mut mac = new_mac(key)?;
    mac.update(message);
    let mut tag = [0u8; 16];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

/// Constant-time check of a full 16-byte tag
pub fn verify_cmac(key: &AesKey, message: &[u8], expected: &[u8]) -> Result<bool> {
    if expected.len() != 16 {
        return Err(anyhow!("CMAC must be 16 bytes"));
    }
    let mut mac = new_mac(key)?;
    mac.update(message);
    Ok(mac.verify_slice(expected).is_ok())
}

/// Single-use random value for a proof-of-presence token
pub fn new_nonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
