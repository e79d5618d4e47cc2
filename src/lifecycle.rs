//! Locked/unlocked lifecycle of the master key
//!
//! The lifecycle starts locked. Operators submit their shares one at a time with
//! [`MasterKeyLifecycle::feed_share`]; once `threshold` shares are present every further
//! submission attempts a reconstruction. A candidate key is only accepted after it opens
//! the verification record kept in the store. The first successful reconstruction against
//! an empty store writes that record instead, so the first valid k-of-n set becomes
//! authoritative.
//!
//! Unlocking is permanent for the life of the process.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::OsRng;
use rand_core::TryRngCore;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cipher::BlockCipher;
use crate::config::Config;
use crate::error::{ErrorKind, Result, UnsealError};
use crate::shamir::ShamirEngine;
use crate::storage::{Bucket, KvStore};

/// Suffix every verification record plaintext ends with
///
/// Record format 1: 8 hex characters of nonce followed by this marker, exactly one cipher
/// block. Records framed with a longer marker do not fit one block and cannot be read by
/// this format. Changing the marker or the framing means a new record format version and
/// a new record key, never an in-place change.
pub const VERIFICATION_MARKER: &[u8; 8] = b"_unseal_";

/// Name reported by [`MasterKeyLifecycle::provider_info`]
pub const PROVIDER_NAME: &str = "ShamirMasterKeyProvider";

// hex-encoded nonce plus marker fill exactly one cipher block
const NONCE_LEN: usize = 4;

/// A component that keeps its own data in the store once the key is available
///
/// Each collaborator owns one bucket, named by `namespace`, and its own serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collaborator {
    pub name: String,
    pub namespace: String,
}

impl Collaborator {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

/// Provider name and whether it currently holds a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub provider_name: &'static str,
    pub active: bool,
}

/// A collaborator's bucket and the master key, handed to
/// [`MasterKeyLifecycle::with_collaborator`]
pub struct CollaboratorContext<'a> {
    bucket: &'a mut Bucket,
    cipher: Option<&'a BlockCipher>,
}

impl CollaboratorContext<'_> {
    pub fn bucket(&self) -> &Bucket {
        &*self.bucket
    }

    pub fn bucket_mut(&mut self) -> &mut Bucket {
        &mut *self.bucket
    }

    pub fn is_unlocked(&self) -> bool {
        self.cipher.is_some()
    }

    /// Same as [`MasterKeyLifecycle::encrypt`]
    pub fn encrypt(&self, block: &[u8]) -> Result<Vec<u8>> {
        self.cipher.ok_or(UnsealError::NotInitialized)?.encrypt(block)
    }

    /// Same as [`MasterKeyLifecycle::decrypt`]
    pub fn decrypt(&self, block: &[u8]) -> Result<Vec<u8>> {
        self.cipher.ok_or(UnsealError::NotInitialized)?.decrypt(block)
    }
}

/// Result of submitting one share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// This submission completed the unlock
    Unlocked,
    /// The lifecycle was already unlocked; the share was ignored
    AlreadyUnlocked,
    /// Share accepted, more are needed before reconstruction is attempted
    Pending { have: usize, need: usize },
    /// The maximum number of shares has been reached; call reset to start over
    Rejected { max: usize },
    /// Reconstruction or verification failed; the accumulated shares are kept
    Failed { kind: ErrorKind },
}

impl FeedOutcome {
    /// Whether the lifecycle is unlocked after this submission
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked | Self::AlreadyUnlocked)
    }
}

struct MasterKey {
    // keeps the key bytes alive only to wipe them on drop
    _key: Zeroizing<Vec<u8>>,
    cipher: BlockCipher,
}

#[derive(Default)]
struct LockState {
    shares: Vec<Zeroizing<String>>,
    master: Option<MasterKey>,
}

/// Shared, lock-guarded holder of the master key
///
/// Every operation takes the internal lock for its whole duration, so concurrent
/// submissions cannot both bootstrap the verification record or interleave their edits to
/// the share list.
///
/// # Example
/// ```
/// use shamir_unseal::{Config, MasterKeyLifecycle, MemoryStore, ShamirEngine};
///
/// let shares = ShamirEngine::generate_master_shares(5, 3).unwrap();
/// let lifecycle = MasterKeyLifecycle::new(Config::default(), MemoryStore::new(), vec![]).unwrap();
///
/// assert!(!lifecycle.feed_share(&shares[0]).unwrap().is_unlocked());
/// assert!(!lifecycle.feed_share(&shares[3]).unwrap().is_unlocked());
/// assert!(lifecycle.feed_share(&shares[4]).unwrap().is_unlocked());
///
/// let sealed = lifecycle.encrypt(b"0123456789abcdef").unwrap();
/// assert_eq!(lifecycle.decrypt(&sealed).unwrap(), b"0123456789abcdef");
/// ```
pub struct MasterKeyLifecycle<S> {
    config: Config,
    store: S,
    collaborators: Vec<Collaborator>,
    state: Mutex<LockState>,
}

impl<S: KvStore> MasterKeyLifecycle<S> {
    /// Creates a locked lifecycle
    ///
    /// # Errors
    /// `InvalidConfig` if the configuration is invalid, or if collaborators repeat a name or
    /// namespace or claim the verification record's bucket.
    pub fn new(config: Config, store: S, collaborators: Vec<Collaborator>) -> Result<Self> {
        config.validate()?;

        for (i, collaborator) in collaborators.iter().enumerate() {
            if collaborator.name.is_empty() || collaborator.namespace.is_empty() {
                return Err(UnsealError::InvalidConfig(
                    "collaborator name and namespace cannot be empty".into(),
                ));
            }
            if collaborator.namespace == config.verification_bucket {
                return Err(UnsealError::InvalidConfig(format!(
                    "collaborator {} cannot use the reserved namespace {}",
                    collaborator.name, collaborator.namespace
                )));
            }
            let clash = collaborators[..i].iter().any(|other| {
                other.name == collaborator.name || other.namespace == collaborator.namespace
            });
            if clash {
                return Err(UnsealError::InvalidConfig(format!(
                    "collaborator {} is registered twice",
                    collaborator.name
                )));
            }
        }

        Ok(Self {
            config,
            store,
            collaborators,
            state: Mutex::new(LockState::default()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_unlocked(&self) -> bool {
        self.lock_state().master.is_some()
    }

    /// Number of shares submitted since start or the last reset
    pub fn accumulated(&self) -> usize {
        self.lock_state().shares.len()
    }

    pub fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_name: PROVIDER_NAME,
            active: self.is_unlocked(),
        }
    }

    /// Submits one base64 share
    ///
    /// Non-fatal results (waiting for more shares, a failed reconstruction, a refused
    /// submission) come back as [`FeedOutcome`] values.
    ///
    /// Once unlocked every submission, empty or not, reports `AlreadyUnlocked`.
    ///
    /// # Errors
    /// - `MalformedShare` for an empty submission while locked, which is not accumulated
    /// - Storage errors and OS random source failures while writing the verification record
    pub fn feed_share(&self, share: &str) -> Result<FeedOutcome> {
        let mut state = self.lock_state();
        if state.master.is_some() {
            return Ok(FeedOutcome::AlreadyUnlocked);
        }

        let share = share.trim();
        if share.is_empty() {
            return Err(UnsealError::MalformedShare("share is empty".into()));
        }

        let max = self.config.max_shares as usize;
        if state.shares.len() >= max {
            warn!(max, "share refused, maximum reached without unlocking");
            return Ok(FeedOutcome::Rejected { max });
        }

        state.shares.push(Zeroizing::new(share.to_string()));
        let have = state.shares.len();
        let need = self.config.threshold as usize;
        if have < need {
            info!(have, need, "share accepted");
            return Ok(FeedOutcome::Pending { have, need });
        }

        let texts: Vec<&str> = state.shares.iter().map(|s| s.as_str()).collect();
        let candidate = match ShamirEngine::combine_strings(&texts) {
            Ok(key) => Zeroizing::new(key),
            Err(e) => {
                warn!(have, error = %e, "cannot combine accumulated shares");
                return Ok(FeedOutcome::Failed { kind: e.kind() });
            }
        };

        match self.verify_or_bootstrap(&candidate) {
            Ok(cipher) => {
                state.master = Some(MasterKey {
                    _key: candidate,
                    cipher,
                });
                info!(shares = have, "master key unlocked");
                Ok(FeedOutcome::Unlocked)
            }
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                warn!(have, error = %e, "reconstructed key rejected");
                Ok(FeedOutcome::Failed { kind: e.kind() })
            }
        }
    }

    /// Feeds shares in order until the lifecycle unlocks
    ///
    /// Returns whether it is unlocked afterwards. Used to pre-initialise a service from
    /// shares supplied at startup.
    pub fn feed_shares<I, T>(&self, shares: I) -> Result<bool>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        for share in shares {
            if self.feed_share(share.as_ref())?.is_unlocked() {
                return Ok(true);
            }
        }
        Ok(self.is_unlocked())
    }

    /// Drops all accumulated shares while locked; does nothing once unlocked
    pub fn reset(&self) {
        let mut state = self.lock_state();
        if state.master.is_some() {
            debug!("reset ignored, already unlocked");
            return;
        }
        let cleared = state.shares.len();
        state.shares.clear();
        info!(cleared, "accumulated shares cleared");
    }

    /// Encrypts exactly one cipher block with the master key
    ///
    /// # Errors
    /// `NotInitialized` while locked, `InvalidBlockLength` unless `block` is 16 bytes.
    pub fn encrypt(&self, block: &[u8]) -> Result<Vec<u8>> {
        let state = self.lock_state();
        let master = state.master.as_ref().ok_or(UnsealError::NotInitialized)?;
        master.cipher.encrypt(block)
    }

    /// Decrypts exactly one cipher block with the master key
    pub fn decrypt(&self, block: &[u8]) -> Result<Vec<u8>> {
        let state = self.lock_state();
        let master = state.master.as_ref().ok_or(UnsealError::NotInitialized)?;
        master.cipher.decrypt(block)
    }

    pub fn collaborators(&self) -> &[Collaborator] {
        &self.collaborators
    }

    /// Creates the bucket of every collaborator that does not have one yet
    pub fn provision_collaborators(&self) -> Result<()> {
        self.store.update(|tx| {
            for collaborator in &self.collaborators {
                tx.create_bucket_if_missing(&collaborator.namespace);
            }
            Ok(())
        })
    }

    /// Collaborators whose bucket exists in the store
    pub fn provisioned_collaborators(&self) -> Result<Vec<&Collaborator>> {
        self.store.view(|tx| {
            Ok(self
                .collaborators
                .iter()
                .filter(|c| tx.bucket(&c.namespace).is_some())
                .collect())
        })
    }

    /// Runs `f` on a collaborator's bucket inside one storage transaction
    ///
    /// `f` gets the bucket together with the master key through [`CollaboratorContext`].
    /// The lifecycle lock is held for the whole call, so `f` must use the context rather
    /// than call back into this lifecycle.
    ///
    /// # Errors
    /// `InvalidConfig` for an unknown collaborator, `BucketNotFound` if its bucket was
    /// never provisioned, or whatever `f` returns (which also rolls the transaction back).
    pub fn with_collaborator<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut CollaboratorContext<'_>) -> Result<T>,
    {
        let collaborator = self
            .collaborators
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| UnsealError::InvalidConfig(format!("unknown collaborator {name}")))?;

        // lifecycle lock before store lock, the same order feed_share takes them
        let state = self.lock_state();
        let cipher = state.master.as_ref().map(|m| &m.cipher);

        self.store.update(|tx| {
            let bucket = tx
                .bucket_mut(&collaborator.namespace)
                .ok_or_else(|| UnsealError::BucketNotFound(collaborator.namespace.clone()))?;
            f(&mut CollaboratorContext { bucket, cipher })
        })
    }

    /// Checks `candidate` against the verification record, writing the record if absent
    fn verify_or_bootstrap(&self, candidate: &[u8]) -> Result<BlockCipher> {
        let cipher = BlockCipher::new(candidate)?;
        let bucket = self.config.verification_bucket.as_str();
        let key = self.config.verification_key.as_bytes();

        self.store.update(|tx| {
            let existing = tx
                .get(bucket, key)
                .filter(|record| !record.is_empty())
                .map(<[u8]>::to_vec);

            match existing {
                None => {
                    let plaintext = verification_plaintext()?;
                    let record = cipher.encrypt(&plaintext)?;
                    tx.create_bucket_if_missing(bucket)
                        .insert(key.to_vec(), record);
                    info!("no verification record found, bootstrapping with this key");
                    Ok(())
                }
                Some(record) => {
                    let plaintext = Zeroizing::new(cipher.decrypt(&record)?);
                    if plaintext.ends_with(VERIFICATION_MARKER) {
                        Ok(())
                    } else {
                        Err(UnsealError::VerificationMismatch)
                    }
                }
            }
        })?;

        Ok(cipher)
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Random hex nonce followed by the marker, exactly one cipher block long
fn verification_plaintext() -> Result<Zeroizing<Vec<u8>>> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| UnsealError::RandomSource(e.to_string()))?;

    let mut plaintext = hex::encode(nonce).into_bytes();
    plaintext.extend_from_slice(VERIFICATION_MARKER);
    Ok(Zeroizing::new(plaintext))
}

fn is_fatal(err: &UnsealError) -> bool {
    err.kind() == ErrorKind::Storage || matches!(err, UnsealError::RandomSource(_))
}
