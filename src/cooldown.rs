//! In-memory cooldown list
//!
//! Targets whose lookup ended inconclusively are kept here for a fixed
//! duration. While a target is in cooldown the engine serves it from the
//! cache (expired entries included) instead of asking the network again.

use std::time::Duration;

use dashmap::DashMap;
use log::debug;
use tokio::time::Instant;

use crate::core::{traits::CooldownTracker, types::Target};

#[derive(Debug, Clone, Copy)]
struct CooldownEntry {
    sip_code: u16,
    expiry: Instant,
}

/// Concurrent cooldown list keyed by target.
pub struct CooldownList {
    entries: DashMap<Target, CooldownEntry>,
    duration: Duration,
}

impl CooldownList {
    pub fn new(duration: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            duration,
        }
    }

    /// SIP code that put the target into cooldown, if it is still cooling down.
    pub fn sip_code(&self, target: &Target) -> Option<u16> {
        let now = Instant::now();
        self.entries
            .get(target)
            .filter(|entry| entry.expiry > now)
            .map(|entry| entry.sip_code)
    }

    /// Drop expired entries. Lookups already ignore them.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expiry > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<&crate::config::Cooldown> for CooldownList {
    fn from(cfg: &crate::config::Cooldown) -> Self {
        Self::new(Duration::from_secs(cfg.duration_secs))
    }
}

impl CooldownTracker for CooldownList {
    fn in_cooldown(&self, targets: &[Target]) -> Vec<Target> {
        let now = Instant::now();
        targets
            .iter()
            .filter(|target| {
                self.entries
                    .get(*target)
                    .is_some_and(|entry| entry.expiry > now)
            })
            .cloned()
            .collect()
    }

    fn add_cooldown(&self, targets: &[Target], sip_code: u16) {
        let expiry = Instant::now() + self.duration;
        for target in targets {
            debug!("Cooldown {target} until {expiry:?}, sip code {sip_code}");
            self.entries
                .insert(target.clone(), CooldownEntry { sip_code, expiry });
        }
    }

    fn reset(&self) {
        debug!("Resetting cooldown list, {} entries", self.entries.len());
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(uri: &str) -> Target {
        Target::parse(uri).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expiry() {
        let list = CooldownList::new(Duration::from_secs(10));
        let a = target("tel:+1001");
        let b = target("tel:+1002");

        list.add_cooldown(&[a.clone()], 408);
        assert_eq!(list.in_cooldown(&[a.clone(), b.clone()]), vec![a.clone()]);
        assert_eq!(list.sip_code(&a), Some(408));
        assert_eq!(list.sip_code(&b), None);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(list.in_cooldown(&[a.clone()]).is_empty());
        assert_eq!(list.sip_code(&a), None);

        // expired entries linger until purged
        assert_eq!(list.len(), 1);
        list.purge_expired();
        assert!(list.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_refresh_and_reset() {
        let list = CooldownList::new(Duration::from_secs(10));
        let a = target("sip:a@example.com");

        list.add_cooldown(&[a.clone()], 480);
        tokio::time::advance(Duration::from_secs(8)).await;
        list.add_cooldown(&[a.clone()], 408);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(list.sip_code(&a), Some(408));

        list.reset();
        assert!(list.in_cooldown(&[a]).is_empty());
    }
}
