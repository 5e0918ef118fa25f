//! In-memory result cache
//!
//! Keeps the most recent record per target together with the time it was
//! saved. Freshness is decided on read, so one entry can be fresh for a
//! capability request and stale for an availability request.

use std::time::Duration;

use dashmap::DashMap;
use log::debug;
use tokio::time::Instant;

use crate::core::{
    traits::ResultCache,
    types::{CapabilityRecord, Target},
};

struct CachedRecord {
    record: CapabilityRecord,
    saved_at: Instant,
}

pub struct InMemoryResultCache {
    records: DashMap<Target, CachedRecord>,
    capability_ttl: Duration,
    availability_ttl: Duration,
}

impl InMemoryResultCache {
    pub fn new(capability_ttl: Duration, availability_ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            capability_ttl,
            availability_ttl,
        }
    }

    fn lookup(&self, targets: &[Target], ttl: Option<Duration>) -> Vec<CapabilityRecord> {
        let now = Instant::now();
        targets
            .iter()
            .filter_map(|target| {
                let entry = self.records.get(target)?;
                match ttl {
                    Some(ttl) if now.duration_since(entry.saved_at) >= ttl => None,
                    _ => Some(entry.record.clone()),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<&crate::config::Cache> for InMemoryResultCache {
    fn from(cfg: &crate::config::Cache) -> Self {
        Self::new(
            Duration::from_secs(cfg.capability_ttl_secs),
            Duration::from_secs(cfg.availability_ttl_secs),
        )
    }
}

impl ResultCache for InMemoryResultCache {
    fn get_fresh(&self, targets: &[Target]) -> Vec<CapabilityRecord> {
        self.lookup(targets, Some(self.capability_ttl))
    }

    fn get_including_expired(&self, targets: &[Target]) -> Vec<CapabilityRecord> {
        self.lookup(targets, None)
    }

    fn get_availability_fresh(&self, target: &Target) -> Option<CapabilityRecord> {
        self.lookup(std::slice::from_ref(target), Some(self.availability_ttl))
            .into_iter()
            .next()
    }

    fn save(&self, records: &[CapabilityRecord]) {
        let saved_at = Instant::now();
        for record in records {
            debug!("Caching record for {}", record.target);
            self.records.insert(
                record.target.clone(),
                CachedRecord {
                    record: record.clone(),
                    saved_at,
                },
            );
        }
    }
}
