//! Threshold unlock of a master key with Shamir's Secret Sharing
//!
//! A 32-byte master key is split into `n` shares of which any `k` reconstruct it. Arithmetic
//! runs over the prime field of the Mersenne prime 2^521 - 1. A service starts locked;
//! operators submit shares until `k` are present, the key is rebuilt and checked against an
//! encrypted verification record in a transactional key-value store, and the service unlocks.
//! The first successful unlock against an empty store writes that record.
//!
//! # Quick Start
//!
//! ```
//! use shamir_unseal::{Config, FileStore, MasterKeyLifecycle, ShamirEngine};
//!
//! // Issue 5 shares of a fresh master key, any 3 of which unlock it
//! let shares = ShamirEngine::generate_master_shares(5, 3).unwrap();
//!
//! let temp_dir = tempfile::tempdir().unwrap();
//! let config = Config::new()
//!     .with_threshold(3)
//!     .with_max_shares(5)
//!     .with_storage_path(temp_dir.path().join("unseal.db"));
//! let store = config.open_file_store().unwrap();
//! let lifecycle = MasterKeyLifecycle::new(config, store, vec![]).unwrap();
//!
//! for share in [&shares[1], &shares[2], &shares[4]] {
//!     lifecycle.feed_share(share).unwrap();
//! }
//! assert!(lifecycle.is_unlocked());
//!
//! let block = lifecycle.encrypt(b"sixteen byte blk").unwrap();
//! assert_eq!(lifecycle.decrypt(&block).unwrap(), b"sixteen byte blk");
//! ```

mod cipher;
mod config;
mod error;
pub mod field;
mod lifecycle;
pub mod secret;
mod shamir;
mod share;
mod storage;

pub use cipher::{BLOCK_LEN, BlockCipher};
pub use config::{Config, ProviderKind};
pub use error::{ErrorKind, Result, UnsealError};
pub use lifecycle::{
    Collaborator, CollaboratorContext, FeedOutcome, MasterKeyLifecycle, PROVIDER_NAME,
    ProviderInfo, VERIFICATION_MARKER,
};
pub use shamir::{MASTER_KEY_LEN, MAX_SHARES, MIN_THRESHOLD, ShamirEngine};
pub use share::Share;
pub use storage::{Bucket, FileStore, KvStore, MemoryStore, Transaction};

// Re-export common types for convenience
pub mod prelude {
    pub use super::{
        Config, FeedOutcome, FileStore, KvStore, MasterKeyLifecycle, MemoryStore, Result,
        ShamirEngine, Share, UnsealError,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_full_workflow() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("unseal.db");

        let mut engine = ShamirEngine::new()?;
        let master_key = [0x5Au8; MASTER_KEY_LEN];
        let shares = engine.split_to_strings(&master_key, 3, 5)?;

        // First start bootstraps the verification record
        {
            let config = Config::new().with_storage_path(&path);
            let store = config.open_file_store()?;
            let lifecycle = MasterKeyLifecycle::new(config, store, Vec::new())?;
            assert!(lifecycle.feed_shares(&shares[..3])?);
        }

        // A restart unlocks with a different subset
        let config = Config::new().with_storage_path(&path);
        let store = config.open_file_store()?;
        let lifecycle = MasterKeyLifecycle::new(config, store, Vec::new())?;
        assert_eq!(
            lifecycle.feed_share(&shares[4])?,
            FeedOutcome::Pending { have: 1, need: 3 }
        );
        lifecycle.feed_share(&shares[3])?;
        assert_eq!(lifecycle.feed_share(&shares[0])?, FeedOutcome::Unlocked);

        let expected = BlockCipher::new(&master_key)?.encrypt(&[1u8; BLOCK_LEN])?;
        assert_eq!(lifecycle.encrypt(&[1u8; BLOCK_LEN])?, expected);

        Ok(())
    }
}
