//! Component C: the DC locator.
//!
//! Turns a domain name into a short, validated, ordered list of domain
//! controllers: site detection, SRV-driven candidate generation, wave
//! CLDAP probing, per-reply validation, local/remote ordering, and a TTL
//! cache so repeat lookups for the same (domain, role) don't repeat all of
//! the above. Grounded in the original implementation's `ad.core.locate`.

mod cache;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tracing::debug;

use crate::config::LocateSettings;
use crate::dns::{order_srv, Resolver, SrvRecord};
use crate::error::{Error, Result};
use crate::netlogon::{Prober, Reply, ServerFlags};

const LDAP_PORT: u16 = 389;

/// Which kind of domain controller a caller wants located.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    Dc,
    Gc,
    Pdc,
}

impl Role {
    fn required_flag(self) -> ServerFlags {
        match self {
            Role::Dc => ServerFlags::LDAP,
            Role::Gc => ServerFlags::GC,
            Role::Pdc => ServerFlags::PDC,
        }
    }
}

/// A located, validated domain controller.
#[derive(Clone, Debug)]
pub struct Server {
    pub hostname: String,
    pub address: IpAddr,
}

/// Locates, validates and orders domain controllers for a domain.
pub struct Locator {
    resolver: Resolver,
    settings: LocateSettings,
    client_hostname: String,
    site: Option<String>,
    site_detected: bool,
    cache: cache::Cache,
}

impl Locator {
    pub fn new(resolver: Resolver, settings: LocateSettings, client_hostname: String) -> Locator {
        let site = settings.site_override.clone();
        Locator {
            resolver,
            settings,
            client_hostname,
            site_detected: false,
            site,
            cache: cache::Cache::new(),
        }
    }

    /// Locate a single domain controller, the `maxservers = 1` special case.
    pub async fn locate(&mut self, domain: &str, role: Role) -> Result<Server> {
        let servers = self.locate_many(domain, role, 1).await?;
        servers
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("could not locate a domain controller"))
    }

    /// Locate up to `maxservers` domain controllers for `domain` with the
    /// given `role`. `role == Pdc` always returns at most one server.
    pub async fn locate_many(&mut self, domain: &str, role: Role, maxservers: usize) -> Result<Vec<Server>> {
        let maxservers = if role == Role::Pdc { 1 } else { maxservers };
        let domain_upper = domain.to_ascii_uppercase();

        if let Some(servers) = self
            .cache
            .get(&domain_upper, role, maxservers, self.settings.cache_ttl())
        {
            debug!(domain = %domain_upper, ?role, "locate cache hit");
            return Ok(servers
                .into_iter()
                .map(|hostname| Server {
                    hostname,
                    address: IpAddr::from([0, 0, 0, 0]),
                })
                .collect());
        }

        if self.site.is_none() && !self.site_detected {
            self.site = self.detect_site(&domain_upper).await;
            self.site_detected = true;
        }

        let mut candidates = Vec::new();
        if let Some(site) = self.site.clone() {
            if role != Role::Pdc {
                let query = format!(
                    "_ldap._tcp.{}._sites.{}._msdcs.{}",
                    site,
                    role_label(role),
                    domain.to_ascii_lowercase()
                );
                candidates.extend(order_srv(self.resolver.query_srv(&query).await));
            }
        }
        let query = format!("_ldap._tcp.{}._msdcs.{}", role_label(role), domain.to_ascii_lowercase());
        candidates.extend(order_srv(self.resolver.query_srv(&query).await));

        let addresses = self.extract_addresses(&candidates).await;
        let addresses = dedup_preserving_order(addresses);

        let mut replies: Vec<Reply> = Vec::new();
        let mut chunk_start = 0;
        while chunk_start < addresses.len() {
            let chunk = &addresses[chunk_start..(chunk_start + maxservers).min(addresses.len())];
            let mut prober = Prober::new();
            for (host, addr) in chunk {
                let _ = host;
                prober.query(SocketAddr::new(*addr, LDAP_PORT), &domain_upper, &self.client_hostname);
            }
            replies.extend(prober.probe(self.settings.cldap.timeout(), self.settings.cldap.retries).await?);
            if self.sufficient(&replies, role, maxservers).await {
                break;
            }
            chunk_start += maxservers;
        }

        let validated = self.validate(replies, role).await;
        let ordered = self.order_by_locality(validated, &addresses);
        let selected: Vec<Server> = ordered
            .into_iter()
            .take(maxservers)
            .map(|r| Server {
                hostname: r.hostname,
                address: r.address,
            })
            .collect();

        self.cache.put(
            &domain_upper,
            role,
            maxservers,
            selected.iter().map(|s| s.hostname.clone()).collect(),
        );
        Ok(selected)
    }

    /// Resolve `hostname` and validate it as a domain controller for
    /// `domain` with `role`, the check a caller-pinned server must pass
    /// before the connection router will use it in place of a
    /// locator-selected one.
    pub async fn validate_pinned(&mut self, hostname: &str, domain: &str, role: Role) -> Result<Server> {
        let address = self
            .resolver
            .query_a(hostname)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("{hostname} does not resolve")))?;
        if !self.check_domain_controller(address, domain, role).await? {
            return Err(Error::not_found(format!(
                "{hostname} is not a valid domain controller for {domain}"
            )));
        }
        Ok(Server {
            hostname: hostname.to_string(),
            address,
        })
    }

    /// Confirm `server` is a validated domain controller for `domain` with
    /// `role`, by issuing a fresh single-shot CLDAP probe.
    pub async fn check_domain_controller(&mut self, server: IpAddr, domain: &str, role: Role) -> Result<bool> {
        let mut prober = Prober::new();
        prober.query(SocketAddr::new(server, LDAP_PORT), &domain.to_ascii_uppercase(), &self.client_hostname);
        let replies = prober.probe(self.settings.cldap.timeout(), self.settings.cldap.retries).await?;
        if replies.len() != 1 {
            return Ok(false);
        }
        Ok(self.check_reply(&replies[0], domain, role).await)
    }

    async fn detect_site(&self, domain: &str) -> Option<String> {
        debug!(domain, "detecting site");
        let query = format!("_ldap._tcp.{}", domain.to_ascii_lowercase());
        let candidates = order_srv(self.resolver.query_srv(&query).await);
        let addresses = self.extract_addresses(&candidates).await;

        let mut replies = Vec::new();
        let mut chunk_start = 0;
        while chunk_start < addresses.len() && replies.len() < 3 {
            let chunk = &addresses[chunk_start..(chunk_start + 3).min(addresses.len())];
            let mut prober = Prober::new();
            for (_, addr) in chunk {
                prober.query(SocketAddr::new(*addr, LDAP_PORT), domain, &self.client_hostname);
            }
            match prober.probe(self.settings.cldap.timeout(), self.settings.cldap.retries).await {
                Ok(r) => replies.extend(r),
                Err(_) => break,
            }
            chunk_start += 3;
        }
        if replies.is_empty() {
            debug!("could not detect site: no replies");
            return None;
        }

        let mut votes: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        for reply in &replies {
            *votes.entry(reply.client_site.clone()).or_insert(0) += 1;
        }
        // Resolved per the "most voted" reading: the site named by the
        // largest number of replies wins.
        votes.into_iter().max_by_key(|(_, count)| *count).map(|(site, _)| site)
    }

    async fn extract_addresses(&self, records: &[SrvRecord]) -> Vec<(String, IpAddr)> {
        let mut out = Vec::new();
        for record in records {
            for addr in self.resolver.query_a(&record.target).await {
                out.push((record.target.clone(), addr));
            }
        }
        out
    }

    async fn sufficient(&mut self, replies: &[Reply], role: Role, maxservers: usize) -> bool {
        let mut total = 0;
        for reply in replies {
            if self.check_reply(reply, &reply.domain, role).await {
                total += 1;
            }
        }
        total >= maxservers
    }

    async fn validate(&mut self, replies: Vec<Reply>, role: Role) -> Vec<Reply> {
        let mut out = Vec::new();
        for reply in replies {
            let domain = reply.domain.clone();
            if self.check_reply(&reply, &domain, role).await {
                out.push(reply);
            }
        }
        out
    }

    /// Confirm a reply's hostname resolves forward, reverses back to the
    /// same hostname, and re-resolves forward to the same address — AD's
    /// GSSAPI hostname canonicalisation needs a clean forward/reverse pair
    /// — and that the reply carries the role's required server flag.
    async fn check_reply(&self, reply: &Reply, expected_domain: &str, role: Role) -> bool {
        let forward = self.resolver.query_a(&reply.hostname).await;
        if forward.len() != 1 {
            return false;
        }
        let address = forward[0];
        let ptr_names = self.resolver.query_ptr(address).await;
        if ptr_names.len() != 1 {
            return false;
        }
        let second_forward = self.resolver.query_a(&ptr_names[0]).await;
        if second_forward.len() != 1 || second_forward[0] != address {
            return false;
        }
        if !reply.flags.contains(role.required_flag()) {
            return false;
        }
        if !expected_domain.eq_ignore_ascii_case(&reply.domain) {
            return false;
        }
        true
    }

    /// Partition into local (site matches) and remote, order locals by SRV
    /// candidate position and remotes by ascending RTT, local first.
    fn order_by_locality(&self, replies: Vec<Reply>, addresses: &[(String, IpAddr)]) -> Vec<Reply> {
        let site = self.site.clone().unwrap_or_default();
        let (mut local, mut remote): (Vec<Reply>, Vec<Reply>) = replies
            .into_iter()
            .partition(|r| site.eq_ignore_ascii_case(&r.server_site));

        local.sort_by_key(|r| {
            addresses
                .iter()
                .position(|(host, _)| host.eq_ignore_ascii_case(&r.hostname))
                .unwrap_or(usize::MAX)
        });
        remote.sort_by_key(|r| r.rtt);

        local.extend(remote);
        local
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Dc => "dc",
        Role::Gc => "gc",
        Role::Pdc => "pdc",
    }
}

fn dedup_preserving_order(addresses: Vec<(String, IpAddr)>) -> Vec<(String, IpAddr)> {
    let mut seen = std::collections::HashSet::new();
    addresses.into_iter().filter(|a| seen.insert(a.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_detection_resolves_to_the_most_voted_site() {
        let mut votes: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        for site in ["HQ", "HQ", "Branch"] {
            *votes.entry(site.to_string()).or_insert(0) += 1;
        }
        let winner = votes.into_iter().max_by_key(|(_, count)| *count).map(|(s, _)| s);
        assert_eq!(winner, Some("HQ".to_string()));
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let a: IpAddr = "10.0.0.1".parse().expect("valid addr");
        let b: IpAddr = "10.0.0.2".parse().expect("valid addr");
        let input = vec![
            ("dc1".to_string(), a),
            ("dc2".to_string(), b),
            ("dc1".to_string(), a),
        ];
        let out = dedup_preserving_order(input);
        assert_eq!(out, vec![("dc1".to_string(), a), ("dc2".to_string(), b)]);
    }
}
