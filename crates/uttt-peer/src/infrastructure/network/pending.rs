//! Pending-request registry: dedups and expires discovery announcements.
//!
//! The discovery listener thread feeds every valid announcement into this
//! registry; the arbiter and the hosting façade query it.  Both paths run on
//! different threads, so the map lives behind a mutex covering every read
//! and read-modify-write.
//!
//! Repeated announcements from one identity coalesce into a single entry
//! whose `strength` counts the sightings; an entry that has not been
//! refreshed within the staleness window is purged on the next `record` and
//! filtered out of `list`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;
use uttt_core::Announcement;

/// How long an entry survives without being refreshed by a new announcement.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

/// One discovered peer awaiting an accept or reject decision.
#[derive(Debug, Clone)]
pub struct PendingPeer {
    /// Display name the peer announced.
    pub identity: String,
    /// Source address of the datagram.  Authoritative for connecting;
    /// the announced address is informational only.
    pub address: IpAddr,
    /// The address the peer believes it is reachable at.
    pub advertised_addr: String,
    /// TCP port the peer's stream listener is bound to.
    pub listen_port: u16,
    /// Number of announcements received from this identity.
    pub strength: u64,
    last_seen: Instant,
}

impl PendingPeer {
    fn is_stale(&self, window: Duration) -> bool {
        self.last_seen.elapsed() > window
    }
}

/// Thread-safe registry of pending connection requests, keyed by identity.
pub struct PendingRequestRegistry {
    local_identity: String,
    stale_after: Duration,
    entries: Mutex<HashMap<String, PendingPeer>>,
}

impl PendingRequestRegistry {
    /// Creates a registry with the default 30-second staleness window.
    /// Announcements carrying `local_identity` are ignored.
    pub fn new(local_identity: impl Into<String>) -> Self {
        Self::with_staleness(local_identity, DEFAULT_STALE_AFTER)
    }

    /// Creates a registry with an explicit staleness window.
    pub fn with_staleness(local_identity: impl Into<String>, stale_after: Duration) -> Self {
        Self {
            local_identity: local_identity.into(),
            stale_after,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts or refreshes the entry for the announcing identity, then
    /// purges every entry older than the staleness window.
    ///
    /// A fresh entry starts with strength 1; a repeat announcement bumps the
    /// strength, refreshes the timestamp, and adopts the latest endpoint.
    pub fn record(&self, announcement: &Announcement, source: IpAddr) {
        if announcement.identity == self.local_identity {
            // The listener already drops self-originated datagrams; this is
            // the registry-side guard for callers that do not.
            return;
        }

        let mut entries = self.entries.lock().expect("pending registry poisoned");
        let now = Instant::now();

        entries
            .entry(announcement.identity.clone())
            .and_modify(|entry| {
                entry.strength += 1;
                entry.last_seen = now;
                entry.address = source;
                entry.advertised_addr = announcement.advertised_addr.clone();
                entry.listen_port = announcement.listen_port;
            })
            .or_insert_with(|| {
                debug!(
                    identity = %announcement.identity,
                    %source,
                    port = announcement.listen_port,
                    "new pending connection request"
                );
                PendingPeer {
                    identity: announcement.identity.clone(),
                    address: source,
                    advertised_addr: announcement.advertised_addr.clone(),
                    listen_port: announcement.listen_port,
                    strength: 1,
                    last_seen: now,
                }
            });

        let window = self.stale_after;
        entries.retain(|_, entry| !entry.is_stale(window));
    }

    /// Returns a snapshot of all live entries.
    pub fn list(&self) -> Vec<PendingPeer> {
        let entries = self.entries.lock().expect("pending registry poisoned");
        entries
            .values()
            .filter(|entry| !entry.is_stale(self.stale_after))
            .cloned()
            .collect()
    }

    /// Returns the live entry for `identity`, if present.
    pub fn get(&self, identity: &str) -> Option<PendingPeer> {
        let entries = self.entries.lock().expect("pending registry poisoned");
        entries
            .get(identity)
            .filter(|entry| !entry.is_stale(self.stale_after))
            .cloned()
    }

    /// Removes the entry for `identity`.  Used on accept and reject;
    /// removing an absent entry is a no-op.
    pub fn remove(&self, identity: &str) {
        let mut entries = self.entries.lock().expect("pending registry poisoned");
        if entries.remove(identity).is_none() {
            debug!(identity, "remove: no pending request for identity");
        }
    }

    /// Drops every entry.  Called after a successful accept.
    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("pending registry poisoned")
            .clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn announcement(identity: &str, sequence: u64) -> Announcement {
        Announcement {
            identity: identity.to_string(),
            advertised_addr: "192.168.1.20".to_string(),
            listen_port: 40123,
            sequence,
        }
    }

    fn source() -> IpAddr {
        "192.168.1.20".parse().unwrap()
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = PendingRequestRegistry::new("alice");
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_record_adds_entry_with_strength_one() {
        let registry = PendingRequestRegistry::new("alice");
        registry.record(&announcement("bob", 0), source());

        let entries = registry.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identity, "bob");
        assert_eq!(entries[0].strength, 1);
    }

    #[test]
    fn test_repeat_announcements_coalesce_into_one_entry() {
        let registry = PendingRequestRegistry::new("alice");
        registry.record(&announcement("bob", 0), source());
        registry.record(&announcement("bob", 1), source());

        let entries = registry.list();
        assert_eq!(entries.len(), 1, "duplicates must coalesce");
        assert_eq!(entries[0].strength, 2);
    }

    #[test]
    fn test_refresh_adopts_latest_endpoint() {
        let registry = PendingRequestRegistry::new("alice");
        registry.record(&announcement("bob", 0), source());

        let moved = Announcement {
            listen_port: 50555,
            ..announcement("bob", 1)
        };
        let new_source: IpAddr = "192.168.1.99".parse().unwrap();
        registry.record(&moved, new_source);

        let entry = registry.get("bob").unwrap();
        assert_eq!(entry.listen_port, 50555);
        assert_eq!(entry.address, new_source);
    }

    #[test]
    fn test_self_announcements_are_ignored() {
        let registry = PendingRequestRegistry::new("alice");
        registry.record(&announcement("alice", 0), source());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_stale_entries_are_absent_from_list() {
        let registry = PendingRequestRegistry::with_staleness("alice", Duration::from_millis(20));
        registry.record(&announcement("bob", 0), source());
        assert_eq!(registry.list().len(), 1);

        thread::sleep(Duration::from_millis(40));
        assert!(registry.list().is_empty(), "stale entry must not be listed");
        assert!(registry.get("bob").is_none());
    }

    #[test]
    fn test_record_purges_stale_entries_of_other_identities() {
        let registry = PendingRequestRegistry::with_staleness("alice", Duration::from_millis(20));
        registry.record(&announcement("bob", 0), source());
        thread::sleep(Duration::from_millis(40));

        registry.record(&announcement("carol", 0), source());

        let entries = registry.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identity, "carol");
    }

    #[test]
    fn test_refresh_within_window_keeps_entry_alive() {
        let registry = PendingRequestRegistry::with_staleness("alice", Duration::from_millis(60));
        registry.record(&announcement("bob", 0), source());
        thread::sleep(Duration::from_millis(30));
        registry.record(&announcement("bob", 1), source());
        thread::sleep(Duration::from_millis(30));

        // 60 ms after the first record but only 30 ms after the refresh.
        let entry = registry.get("bob").expect("refreshed entry must be live");
        assert_eq!(entry.strength, 2);
    }

    #[test]
    fn test_remove_deletes_entry_and_is_idempotent() {
        let registry = PendingRequestRegistry::new("alice");
        registry.record(&announcement("bob", 0), source());

        registry.remove("bob");
        assert!(registry.get("bob").is_none());
        registry.remove("bob"); // absent entry is a no-op
    }

    #[test]
    fn test_clear_drops_all_entries() {
        let registry = PendingRequestRegistry::new("alice");
        registry.record(&announcement("bob", 0), source());
        registry.record(&announcement("carol", 0), source());
        registry.clear();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_concurrent_record_and_list() {
        use std::sync::Arc;

        let registry = Arc::new(PendingRequestRegistry::new("alice"));
        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for sequence in 0..500 {
                    registry.record(&announcement("bob", sequence), source());
                }
            })
        };
        let reader = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..500 {
                    let _ = registry.list();
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(registry.get("bob").unwrap().strength, 500);
    }
}
