//! Weighted pool of signing services
//!
//! Each service carries `used` and `failed` counters. Selection is weighted-random
//! on the empirical success rate `(used - failed) / used`; a service that was never
//! used has weight 0. Counters are atomics so concurrent requesters can update them
//! without a lock, and every change is written through to the signer store when one
//! is attached. Reads for selection may see slightly stale counts.
//!
//! The store stays the source of truth: `refresh` pulls services registered or
//! re-enabled from outside the process into the live pool.

use crate::signing::SignerError;
use crate::storage::{SignerRecord, SignerStore, StorageResult};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

/// One signing service and its live counters
#[derive(Debug)]
pub struct SignerEntry {
    pub id: String,
    pub slug: String,
    pub url: String,
    used: AtomicU64,
    failed: AtomicU64,
    available: AtomicBool,
}

impl SignerEntry {
    fn from_record(record: &SignerRecord) -> Self {
        Self {
            id: record.id.clone(),
            slug: record.slug.clone(),
            url: record.url.clone(),
            used: AtomicU64::new(record.used_count),
            failed: AtomicU64::new(record.failed_count),
            available: AtomicBool::new(record.is_available),
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn sync(&self, record: &SignerRecord) {
        self.used.store(record.used_count, Ordering::Relaxed);
        self.failed.store(record.failed_count, Ordering::Relaxed);
        self.available.store(record.is_available, Ordering::Relaxed);
    }

    /// Empirical success rate, 0 for a service with no recorded use
    pub fn weight(&self) -> f64 {
        let used = self.used();
        if used == 0 {
            return 0.0;
        }
        used.saturating_sub(self.failed()) as f64 / used as f64
    }
}

/// Shared pool of signing services
pub struct SigningPool {
    entries: RwLock<Vec<Arc<SignerEntry>>>,
    store: Option<Arc<dyn SignerStore>>,
}

impl SigningPool {
    /// Builds a pool from records without persistence
    pub fn new(records: &[SignerRecord]) -> Self {
        Self {
            entries: RwLock::new(
                records
                    .iter()
                    .map(|r| Arc::new(SignerEntry::from_record(r)))
                    .collect(),
            ),
            store: None,
        }
    }

    /// Loads every registered service and writes counter changes back to `store`
    pub fn load(store: Arc<dyn SignerStore>) -> StorageResult<Self> {
        let records = store.load_signers()?;
        tracing::debug!("Loaded {} signing services", records.len());

        let mut pool = Self::new(&records);
        pool.store = Some(store);
        Ok(pool)
    }

    /// Re-reads the attached store
    ///
    /// Known services take the stored availability and counters, services
    /// registered since the last load join the pool and services gone from the
    /// store leave it. Entries already handed out keep working. A pool without a
    /// store is left as is.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of services in the pool afterwards
    /// * `Err(StorageError)` - The store could not be read; the pool is unchanged
    pub fn refresh(&self) -> StorageResult<usize> {
        let Some(store) = &self.store else {
            return Ok(self.len());
        };
        let records = store.load_signers()?;

        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut refreshed = Vec::with_capacity(records.len());
        for record in &records {
            match entries.iter().find(|e| e.id == record.id) {
                Some(entry) => {
                    entry.sync(record);
                    refreshed.push(Arc::clone(entry));
                }
                None => {
                    tracing::info!("Signing service {} joined the pool", record.slug);
                    refreshed.push(Arc::new(SignerEntry::from_record(record)));
                }
            }
        }
        *entries = refreshed;

        let available = entries.iter().filter(|e| e.is_available()).count();
        tracing::debug!(
            "Refreshed signing pool: {} services, {} available",
            entries.len(),
            available
        );
        Ok(entries.len())
    }

    fn entries(&self) -> RwLockReadGuard<'_, Vec<Arc<SignerEntry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Picks an available service, weighted by success rate
    pub fn select(&self) -> Result<Arc<SignerEntry>, SignerError> {
        let draw: f64 = rand::rng().random();
        self.select_with_draw(draw)
    }

    /// Deterministic selection for a draw in `[0, 1)`
    ///
    /// The draw is scaled to the total weight of the available services; the first
    /// service whose cumulative weight exceeds it is returned.
    ///
    /// # Returns
    ///
    /// * `Ok(entry)` - The chosen service
    /// * `Err(SignerError::NoneAvailable)` - No service is marked available
    /// * `Err(SignerError::AllWeightsZero)` - No available service has ever succeeded
    pub fn select_with_draw(&self, draw: f64) -> Result<Arc<SignerEntry>, SignerError> {
        let entries = self.entries();
        let candidates: Vec<(&Arc<SignerEntry>, f64)> = entries
            .iter()
            .filter(|e| e.is_available())
            .map(|e| (e, e.weight()))
            .collect();

        if candidates.is_empty() {
            return Err(SignerError::NoneAvailable);
        }

        let total: f64 = candidates.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Err(SignerError::AllWeightsZero);
        }

        let target = draw.clamp(0.0, 1.0) * total;
        let mut cumulative = 0.0;
        for (entry, weight) in &candidates {
            cumulative += weight;
            if cumulative > target {
                return Ok(Arc::clone(entry));
            }
        }

        // Float rounding at the top edge
        candidates
            .iter()
            .rev()
            .find(|(_, w)| *w > 0.0)
            .map(|(e, _)| Arc::clone(e))
            .ok_or(SignerError::AllWeightsZero)
    }

    pub fn record_used(&self, entry: &SignerEntry) {
        entry.used.fetch_add(1, Ordering::Relaxed);
        if let Some(store) = &self.store {
            if let Err(e) = store.increment_signer_used(&entry.id) {
                tracing::warn!("Failed to persist use of signer {}: {}", entry.slug, e);
            }
        }
    }

    pub fn record_failed(&self, entry: &SignerEntry) {
        entry.failed.fetch_add(1, Ordering::Relaxed);
        if let Some(store) = &self.store {
            if let Err(e) = store.increment_signer_failed(&entry.id) {
                tracing::warn!("Failed to persist failure of signer {}: {}", entry.slug, e);
            }
        }
    }

    pub fn mark_available(&self, entry: &SignerEntry) {
        self.set_available(entry, true);
    }

    pub fn mark_unavailable(&self, entry: &SignerEntry) {
        self.set_available(entry, false);
    }

    fn set_available(&self, entry: &SignerEntry, available: bool) {
        entry.available.store(available, Ordering::Relaxed);
        if let Some(store) = &self.store {
            if let Err(e) = store.set_signer_available(&entry.id, available) {
                tracing::warn!(
                    "Failed to persist availability of signer {}: {}",
                    entry.slug,
                    e
                );
            }
        }
    }

    /// Current counters of every service
    pub fn snapshot(&self) -> Vec<SignerRecord> {
        self.entries()
            .iter()
            .map(|e| SignerRecord {
                id: e.id.clone(),
                slug: e.slug.clone(),
                url: e.url.clone(),
                is_available: e.is_available(),
                used_count: e.used(),
                failed_count: e.failed(),
            })
            .collect()
    }
}
