use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use aes::{Aes128, Aes192, Aes256};

use crate::error::{Result, UnsealError};

/// AES block size in bytes
pub const BLOCK_LEN: usize = 16;

/// Single-block AES keyed by the master key
///
/// Each call transforms exactly one 16-byte block with no chaining and no padding. The
/// verification record is stored in this framing, so changing it requires a new record
/// format version.
///
/// # Example
/// ```
/// use shamir_unseal::BlockCipher;
///
/// let cipher = BlockCipher::new(&[7u8; 32]).unwrap();
/// let block = *b"exactly16bytes!!";
/// let sealed = cipher.encrypt(&block).unwrap();
/// assert_eq!(cipher.decrypt(&sealed).unwrap(), block);
/// ```
#[derive(Clone)]
pub enum BlockCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl std::fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Aes128(_) => "Aes128",
            Self::Aes192(_) => "Aes192",
            Self::Aes256(_) => "Aes256",
        };
        f.debug_tuple("BlockCipher").field(&name).finish()
    }
}

impl BlockCipher {
    /// Selects AES-128/192/256 from the key length
    ///
    /// # Errors
    /// `InvalidKeyLength` for anything other than 16, 24 or 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| UnsealError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            other => Err(UnsealError::InvalidKeyLength(other)),
        }
    }

    pub fn encrypt(&self, block: &[u8]) -> Result<Vec<u8>> {
        let mut block = Self::load_block(block)?;
        match self {
            Self::Aes128(c) => c.encrypt_block(&mut block),
            Self::Aes192(c) => c.encrypt_block(&mut block),
            Self::Aes256(c) => c.encrypt_block(&mut block),
        }
        Ok(block.to_vec())
    }

    pub fn decrypt(&self, block: &[u8]) -> Result<Vec<u8>> {
        let mut block = Self::load_block(block)?;
        match self {
            Self::Aes128(c) => c.decrypt_block(&mut block),
            Self::Aes192(c) => c.decrypt_block(&mut block),
            Self::Aes256(c) => c.decrypt_block(&mut block),
        }
        Ok(block.to_vec())
    }

    fn load_block(data: &[u8]) -> Result<aes::Block> {
        if data.len() != BLOCK_LEN {
            return Err(UnsealError::InvalidBlockLength {
                expected: BLOCK_LEN,
                got: data.len(),
            });
        }
        Ok(GenericArray::clone_from_slice(data))
    }
}
