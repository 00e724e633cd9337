//! Sled-backed persistence for swap records and the sweep audit trail.

use crate::{
    record::{SwapRecord, SwapState, SweepAttempt},
    SecretHash, Side, SwapId,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The persistence collaborator: atomic single-record upserts keyed by
/// `swap_id`, plus the append-only sweep-attempt log.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Persists a fresh record. Fails if the id or the secret hash is
    /// already taken; a secret hash is never reused across two swaps.
    async fn insert(&self, record: SwapRecord) -> anyhow::Result<()>;

    /// Atomically replaces the stored record after a committed transition.
    async fn update(&self, record: &SwapRecord) -> anyhow::Result<()>;

    fn load(&self, swap_id: SwapId) -> anyhow::Result<Option<SwapRecord>>;

    fn all(&self) -> anyhow::Result<Vec<SwapRecord>>;

    /// The swap a secret hash is already bound to, if any.
    fn secret_hash_owner(&self, secret_hash: &SecretHash) -> anyhow::Result<Option<SwapId>>;

    /// Appends to the audit trail. Attempts are never mutated; writing an
    /// attempt number twice is an error.
    async fn append_sweep_attempt(&self, attempt: &SweepAttempt) -> anyhow::Result<()>;

    fn sweep_attempts(&self, swap_id: SwapId, side: Side) -> anyhow::Result<Vec<SweepAttempt>>;

    /// Moves a record out of the active table. Only terminal records and
    /// never-funded `Created` records (cancellation) may be archived; the
    /// full history stays queryable.
    async fn archive(&self, swap_id: SwapId) -> anyhow::Result<()>;

    fn archived(&self, swap_id: SwapId) -> anyhow::Result<Option<SwapRecord>>;
}

#[derive(Debug)]
pub struct Database {
    db: sled::Db,
    swaps: sled::Tree,
    archive: sled::Tree,
    attempts: sled::Tree,
    secret_hashes: sled::Tree,
    #[cfg(test)]
    _tmp_dir: tempfile::TempDir,
}

impl Database {
    #[cfg(not(test))]
    pub fn new(path: &std::path::Path) -> anyhow::Result<Self> {
        let db = sled::open(path)
            .with_context(|| format!("Could not open the DB at {}", path.display()))?;

        Ok(Database {
            swaps: db.open_tree("swaps")?,
            archive: db.open_tree("archived_swaps")?,
            attempts: db.open_tree("sweep_attempts")?,
            secret_hashes: db.open_tree("secret_hashes")?,
            db,
        })
    }

    #[cfg(test)]
    pub fn new_test() -> anyhow::Result<Self> {
        let tmp_dir = tempfile::TempDir::new()?;
        let db = sled::open(tmp_dir.path())
            .with_context(|| format!("Could not open the DB at {}", tmp_dir.path().display()))?;

        Ok(Database {
            swaps: db.open_tree("swaps")?,
            archive: db.open_tree("archived_swaps")?,
            attempts: db.open_tree("sweep_attempts")?,
            secret_hashes: db.open_tree("secret_hashes")?,
            db,
            _tmp_dir: tmp_dir,
        })
    }

    async fn flush(&self) -> anyhow::Result<()> {
        self.db
            .flush_async()
            .await
            .map(|_| ())
            .context("Could not flush db")
    }

    fn attempt_key(swap_id: SwapId, side: Side, attempt_number: u32) -> Vec<u8> {
        format!("{}/{}/{:010}", swap_id, side, attempt_number).into_bytes()
    }

    fn attempt_prefix(swap_id: SwapId, side: Side) -> Vec<u8> {
        format!("{}/{}/", swap_id, side).into_bytes()
    }
}

#[async_trait]
impl Store for Database {
    async fn insert(&self, record: SwapRecord) -> anyhow::Result<()> {
        let hash_key = format!("{:x}", record.secret_hash);

        self.secret_hashes
            .compare_and_swap(
                hash_key.as_bytes(),
                Option::<&[u8]>::None,
                Some(serialize(&record.swap_id)?),
            )
            .context("Could not write in the DB")?
            .map_err(|_| anyhow!("secret hash already bound to another swap"))?;

        let key = record.swap_id.to_string();
        let value = serialize(&record).context("Could not serialize new swap value")?;

        self.swaps
            .compare_and_swap(key.as_bytes(), Option::<&[u8]>::None, Some(value))
            .context("Could not write in the DB")?
            .map_err(|_| anyhow!("swap {} is already stored", record.swap_id))?;

        self.flush().await
    }

    async fn update(&self, record: &SwapRecord) -> anyhow::Result<()> {
        let key = record.swap_id.to_string();

        if self.swaps.get(key.as_bytes())?.is_none() {
            return Err(anyhow!("swap {} does not exist", record.swap_id));
        }

        let value = serialize(record).context("Could not serialize swap value")?;
        self.swaps.insert(key.as_bytes(), value)?;

        self.flush().await
    }

    fn load(&self, swap_id: SwapId) -> anyhow::Result<Option<SwapRecord>> {
        let value = self.swaps.get(swap_id.to_string().as_bytes())?;

        value
            .map(|bytes| deserialize(&bytes).context("Could not deserialize swap"))
            .transpose()
    }

    fn all(&self) -> anyhow::Result<Vec<SwapRecord>> {
        self.swaps
            .iter()
            .map(|item| {
                let (_, value) = item.context("Could not retrieve data")?;
                deserialize(&value).context("Could not deserialize swap")
            })
            .collect()
    }

    fn secret_hash_owner(&self, secret_hash: &SecretHash) -> anyhow::Result<Option<SwapId>> {
        let key = format!("{:x}", secret_hash);
        let value = self.secret_hashes.get(key.as_bytes())?;

        value
            .map(|bytes| deserialize(&bytes).context("Could not deserialize swap id"))
            .transpose()
    }

    async fn append_sweep_attempt(&self, attempt: &SweepAttempt) -> anyhow::Result<()> {
        let key = Self::attempt_key(attempt.swap_id, attempt.side, attempt.attempt_number);
        let value = serialize(attempt).context("Could not serialize sweep attempt")?;

        self.attempts
            .compare_and_swap(key, Option::<&[u8]>::None, Some(value))
            .context("Could not write in the DB")?
            .map_err(|_| {
                anyhow!(
                    "sweep attempt {} for swap {} ({}) already recorded",
                    attempt.attempt_number,
                    attempt.swap_id,
                    attempt.side
                )
            })?;

        self.flush().await
    }

    fn sweep_attempts(&self, swap_id: SwapId, side: Side) -> anyhow::Result<Vec<SweepAttempt>> {
        self.attempts
            .scan_prefix(Self::attempt_prefix(swap_id, side))
            .map(|item| {
                let (_, value) = item.context("Could not retrieve data")?;
                deserialize(&value).context("Could not deserialize sweep attempt")
            })
            .collect()
    }

    async fn archive(&self, swap_id: SwapId) -> anyhow::Result<()> {
        let record = self
            .load(swap_id)?
            .ok_or_else(|| anyhow!("swap {} does not exist", swap_id))?;

        if !record.state.is_terminal() && record.state != SwapState::Created {
            return Err(anyhow!(
                "swap {} is in state {} and cannot be archived",
                swap_id,
                record.state
            ));
        }

        let key = swap_id.to_string();
        self.archive
            .insert(key.as_bytes(), serialize(&record)?)?;
        self.swaps.remove(key.as_bytes())?;

        self.flush().await
    }

    fn archived(&self, swap_id: SwapId) -> anyhow::Result<Option<SwapRecord>> {
        let value = self.archive.get(swap_id.to_string().as_bytes())?;

        value
            .map(|bytes| deserialize(&bytes).context("Could not deserialize swap"))
            .transpose()
    }
}

pub fn serialize<T>(t: &T) -> anyhow::Result<Vec<u8>>
where
    T: Serialize,
{
    Ok(serde_cbor::to_vec(t)?)
}

pub fn deserialize<'a, T>(v: &'a [u8]) -> anyhow::Result<T>
where
    T: Deserialize<'a>,
{
    Ok(serde_cbor::from_slice(v)?)
}
