use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::locate::Role;

#[derive(Clone)]
struct Entry {
    stamp: Instant,
    nrequested: usize,
    servers: Vec<String>,
}

/// A TTL cache of locate results keyed by `(domain, role)`, mirroring the
/// original implementation's `m_cache` dict: a cached entry is reused only
/// if it is both fresh (`now - stamp < ttl`) and was produced by a request
/// for at least as many servers as the current one asks for.
#[derive(Default)]
pub struct Cache {
    entries: HashMap<(String, Role), Entry>,
}

impl Cache {
    pub fn new() -> Cache {
        Cache {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, domain: &str, role: Role, maxservers: usize, ttl: Duration) -> Option<Vec<String>> {
        let entry = self.entries.get(&(domain.to_string(), role))?;
        if entry.stamp.elapsed() < ttl && entry.nrequested >= maxservers {
            Some(entry.servers.clone())
        } else {
            None
        }
    }

    pub fn put(&mut self, domain: &str, role: Role, maxservers: usize, servers: Vec<String>) {
        self.entries.insert(
            (domain.to_string(), role),
            Entry {
                stamp: Instant::now(),
                nrequested: maxservers,
                servers,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn hit_requires_both_freshness_and_sufficient_request_size() {
        let mut cache = Cache::new();
        cache.put("example.org", Role::Dc, 3, vec!["dc1".to_string()]);
        assert!(cache.get("example.org", Role::Dc, 3, Duration::from_secs(60)).is_some());
        assert!(cache.get("example.org", Role::Dc, 5, Duration::from_secs(60)).is_none());
        assert!(cache.get("example.org", Role::Gc, 3, Duration::from_secs(60)).is_none());
    }

    #[test]
    fn entry_expires_after_ttl() {
        let mut cache = Cache::new();
        cache.put("example.org", Role::Dc, 1, vec!["dc1".to_string()]);
        sleep(Duration::from_millis(20));
        assert!(cache.get("example.org", Role::Dc, 1, Duration::from_millis(5)).is_none());
    }
}
