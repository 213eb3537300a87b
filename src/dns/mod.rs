//! Component B: the DNS/SRV resolver.
//!
//! Thin wrapper over `hickory-resolver` for the actual A/PTR/SRV lookups;
//! the priority sort and weighted shuffle are this crate's own logic since
//! that ordering is specified behaviour, not something a general-purpose
//! resolver crate is concerned with.

use std::net::IpAddr;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};

/// One SRV record, stripped down to the fields ordering cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// Thin async DNS client. Constructed once per [`crate::locate::Locator`]
/// and reused across queries.
pub struct Resolver {
    inner: TokioAsyncResolver,
}

impl Resolver {
    /// Build a resolver from the system's configured nameservers
    /// (`/etc/resolv.conf` on Unix).
    pub fn from_system_conf() -> Result<Resolver> {
        let inner = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::transport(format!("reading system DNS configuration: {e}")))?;
        Ok(Resolver { inner })
    }

    pub fn new(config: ResolverConfig, opts: ResolverOpts) -> Resolver {
        Resolver {
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// Query `name` for its SRV records, silently returning an empty list
    /// on any DNS-level failure (NXDOMAIN, timeout, ...): a missing SRV
    /// record set is an ordinary outcome for the caller, not a hard error.
    pub async fn query_srv(&self, name: &str) -> Vec<SrvRecord> {
        debug!(name, "DNS SRV query");
        match self.inner.srv_lookup(name).await {
            Ok(lookup) => lookup
                .iter()
                .map(|s| SrvRecord {
                    priority: s.priority(),
                    weight: s.weight(),
                    port: s.port(),
                    target: s.target().to_utf8().trim_end_matches('.').to_string(),
                })
                .collect(),
            Err(e) => {
                debug!(name, error = %e, "DNS SRV query failed");
                Vec::new()
            }
        }
    }

    /// Resolve `name` to exactly its forward A/AAAA addresses.
    pub async fn query_a(&self, name: &str) -> Vec<IpAddr> {
        debug!(name, "DNS A query");
        match self.inner.lookup_ip(name).await {
            Ok(lookup) => lookup.iter().collect(),
            Err(e) => {
                debug!(name, error = %e, "DNS A query failed");
                Vec::new()
            }
        }
    }

    /// Reverse-resolve `addr` to its PTR target(s).
    pub async fn query_ptr(&self, addr: IpAddr) -> Vec<String> {
        debug!(%addr, "DNS PTR query");
        match self.inner.reverse_lookup(addr).await {
            Ok(lookup) => lookup
                .iter()
                .map(|n| n.to_utf8().trim_end_matches('.').to_string())
                .collect(),
            Err(e) => {
                debug!(%addr, error = %e, "DNS PTR query failed");
                Vec::new()
            }
        }
    }
}

/// Order an unordered set of SRV records: group by ascending priority,
/// weighted-shuffle within each priority band (RFC 2782 §3).
pub fn order_srv(mut records: Vec<SrvRecord>) -> Vec<SrvRecord> {
    records.sort_by_key(|r| r.priority);
    let mut result = Vec::with_capacity(records.len());
    let mut i = 0;
    while i < records.len() {
        let mut j = i + 1;
        while j < records.len() && records[j].priority == records[i].priority {
            j += 1;
        }
        let band = records[i..j].to_vec();
        result.extend(weighted_shuffle(band));
        i = j;
    }
    result
}

/// A single weighted-shuffle pass over one priority band, per RFC 2782:
/// repeatedly pick a random point within the cumulative weight of the
/// remaining records and emit whichever record it lands in, so each
/// remaining record's chance of coming next is exactly
/// `weight / sum_of_remaining_weights`. Once every remaining record in the
/// band has weight 0, that sum is 0 and a record is picked uniformly
/// instead.
fn weighted_shuffle(mut records: Vec<SrvRecord>) -> Vec<SrvRecord> {
    let mut result = Vec::with_capacity(records.len());
    let mut rng = rand::thread_rng();
    while !records.is_empty() {
        let total: u32 = records.iter().map(|r| r.weight as u32).sum();
        let chosen = if total == 0 {
            rng.gen_range(0..records.len())
        } else {
            let pick = rng.gen_range(0..total);
            let mut cumulative = 0u32;
            let mut chosen = records.len() - 1;
            for (idx, r) in records.iter().enumerate() {
                cumulative += r.weight as u32;
                if pick < cumulative {
                    chosen = idx;
                    break;
                }
            }
            chosen
        };
        result.push(records.remove(chosen));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(priority: u16, weight: u16, target: &str) -> SrvRecord {
        SrvRecord {
            priority,
            weight,
            port: 389,
            target: target.to_string(),
        }
    }

    #[test]
    fn order_srv_is_non_decreasing_in_priority() {
        let records = vec![rec(10, 1, "c"), rec(0, 1, "a"), rec(5, 1, "b")];
        let ordered = order_srv(records);
        let priorities: Vec<u16> = ordered.iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn order_srv_is_a_permutation_of_the_input() {
        let records = vec![rec(0, 5, "a"), rec(0, 3, "b"), rec(1, 1, "c")];
        let mut ordered: Vec<String> = order_srv(records.clone())
            .into_iter()
            .map(|r| r.target)
            .collect();
        ordered.sort();
        let mut expected: Vec<String> = records.into_iter().map(|r| r.target).collect();
        expected.sort();
        assert_eq!(ordered, expected);
    }

    #[test]
    fn weighted_shuffle_converges_to_weight_proportions() {
        let weights = [100u16, 50, 25];
        let mut first_counts = [0u32; 3];
        let n = 10_000;
        for _ in 0..n {
            let records = vec![rec(0, weights[0], "a"), rec(0, weights[1], "b"), rec(0, weights[2], "c")];
            let shuffled = weighted_shuffle(records);
            match shuffled[0].target.as_str() {
                "a" => first_counts[0] += 1,
                "b" => first_counts[1] += 1,
                "c" => first_counts[2] += 1,
                _ => unreachable!(),
            }
        }
        let total_weight: f64 = weights.iter().map(|w| *w as f64).sum();
        for (i, &w) in weights.iter().enumerate() {
            let expected_p = w as f64 / total_weight;
            let expected_n = expected_p * n as f64;
            let stddev = (n as f64 * expected_p * (1.0 - expected_p)).sqrt();
            let observed = first_counts[i] as f64;
            assert!(
                (observed - expected_n).abs() < 6.0 * stddev,
                "band {i}: observed {observed}, expected {expected_n}, stddev {stddev}"
            );
        }
    }
}
