//! Global IP blocklist guard.
//!
//! The durable list lives in the store (mutated through the command path);
//! this is the hot-path view consulted per connection, counting how often
//! each blocked address knocks.

use std::sync::Arc;

use dashmap::DashMap;

use corridor_store::MessageStore;

use crate::error::Result;

#[derive(Default)]
pub struct IpGuard {
    blocked: DashMap<String, u64>,
}

impl IpGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the durable list, replacing the in-memory view.
    pub fn refresh(&self, store: &Arc<MessageStore>) -> Result<()> {
        let ips = store.get_ip_blocklist()?;
        self.blocked.retain(|ip, _| ips.contains(ip));
        for ip in ips {
            self.blocked.entry(ip).or_insert(0);
        }
        Ok(())
    }

    /// Returns false (and counts the hit) for blocked addresses.
    pub fn allow(&self, ip: &str) -> bool {
        if let Some(mut count) = self.blocked.get_mut(ip) {
            *count += 1;
            return false;
        }
        true
    }

    pub fn add(&self, ips: &[String]) {
        for ip in ips {
            self.blocked.entry(ip.clone()).or_insert(0);
        }
    }

    pub fn remove(&self, ips: &[String]) {
        for ip in ips {
            self.blocked.remove(ip);
        }
    }

    /// Blocked addresses with at least one rejected attempt.
    pub fn hit_counts(&self) -> Vec<(String, u64)> {
        self.blocked
            .iter()
            .filter(|e| *e.value() > 0)
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_ips_are_rejected_and_counted() {
        let guard = IpGuard::new();
        guard.add(&["10.0.0.1".to_string()]);

        assert!(!guard.allow("10.0.0.1"));
        assert!(!guard.allow("10.0.0.1"));
        assert!(guard.allow("10.0.0.2"));

        let hits = guard.hit_counts();
        assert_eq!(hits, vec![("10.0.0.1".to_string(), 2)]);
    }

    #[test]
    fn remove_unblocks() {
        let guard = IpGuard::new();
        guard.add(&["10.0.0.1".to_string()]);
        guard.remove(&["10.0.0.1".to_string()]);
        assert!(guard.allow("10.0.0.1"));
    }
}
