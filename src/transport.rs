//! The LDAP wire transport boundary.
//!
//! BER I/O and SASL/GSSAPI bind for general directory operations are out of
//! scope for this crate — [`spec.md`]'s own words put the LDAP transport in
//! the same bucket as the Kerberos mechanism. [`LdapTransport`] is the trait
//! that draws the line; [`Ldap3Transport`] is the one concrete
//! implementation this crate ships, built on the published `ldap3` crate
//! (the very crate this codebase's ancestor became).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::{ControlParser, PagedResults, RawControl, PAGED_RESULTS_OID};
use ldap3::exop::WhoAmI;
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope as Ldap3Scope, SearchEntry};

use crate::error::{Error, Result};
use crate::filter::Filter;

/// A directory entry as returned by a Search: its DN and its attributes,
/// each possibly multi-valued.
#[derive(Clone, Debug, Default)]
pub struct Entry {
    pub dn: String,
    pub attrs: std::collections::HashMap<String, Vec<String>>,
    pub bin_attrs: std::collections::HashMap<String, Vec<Vec<u8>>>,
}

/// One page of a paged Search: the entries returned plus the cookie (if
/// non-empty, more pages remain).
pub struct Page {
    pub entries: Vec<Entry>,
    pub cookie: Vec<u8>,
}

/// LDAP search scope, mirrored here so [`crate::client`] doesn't need to
/// depend on `ldap3`'s own type in its public API.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
}

impl From<Scope> for Ldap3Scope {
    fn from(s: Scope) -> Ldap3Scope {
        match s {
            Scope::Base => Ldap3Scope::Base,
            Scope::OneLevel => Ldap3Scope::OneLevel,
            Scope::Subtree => Ldap3Scope::Subtree,
        }
    }
}

/// Everything [`crate::client::AdClient`] needs from an LDAP connection:
/// bind, paged search, and the write operations. Each concrete connection
/// is expected to wrap a single TCP/TLS session to one domain controller.
#[async_trait]
pub trait LdapTransport: Send + Sync {
    async fn simple_bind(&mut self, bind_dn: &str, password: &str) -> Result<()>;

    /// Perform a SASL/GSSAPI bind, authenticating as whatever principal the
    /// active Kerberos credential cache names.
    async fn sasl_gssapi_bind(&mut self, server_fqdn: &str) -> Result<()>;

    /// Fetch one page of a Search, given an optional paging cookie from a
    /// previous call. `page_size <= 0` disables paging (a single,
    /// unpaged Search is performed and the whole result set returned as one
    /// page with an empty cookie).
    async fn search_page(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &Filter,
        attrs: &[String],
        page_size: i32,
        cookie: Vec<u8>,
    ) -> Result<Page>;

    async fn add(&mut self, dn: &str, attrs: Vec<(String, Vec<String>)>) -> Result<()>;
    async fn modify(&mut self, dn: &str, changes: Vec<AttributeChange>) -> Result<()>;
    async fn delete(&mut self, dn: &str) -> Result<()>;
    async fn modify_dn(&mut self, dn: &str, new_rdn: &str, delete_old: bool, new_superior: Option<&str>) -> Result<()>;
    async fn compare(&mut self, dn: &str, attr: &str, value: &[u8]) -> Result<bool>;
    async fn unbind(&mut self) -> Result<()>;
}

/// One attribute modification within a Modify operation.
#[derive(Clone, Debug)]
pub enum AttributeChange {
    Add(String, Vec<String>),
    Replace(String, Vec<String>),
    Delete(String, Vec<String>),
}

/// The reference [`LdapTransport`], backed by the `ldap3` crate's async
/// connection handle.
pub struct Ldap3Transport {
    ldap: ldap3::Ldap,
}

impl Ldap3Transport {
    /// Connect to `host:port` over plain TCP. TLS/LDAPS is left to the
    /// `ldaps://` scheme accepted by the same `url`, per `ldap3`'s own
    /// convention.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Ldap3Transport> {
        let settings = LdapConnSettings::new().set_conn_timeout(timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(|e| Error::transport(format!("connecting to {url}: {e}")))?;
        ldap3::drive!(conn);
        Ok(Ldap3Transport { ldap })
    }
}

#[async_trait]
impl LdapTransport for Ldap3Transport {
    async fn simple_bind(&mut self, bind_dn: &str, password: &str) -> Result<()> {
        self.ldap
            .simple_bind(bind_dn, password)
            .await
            .and_then(|r| r.success())
            .map(|_| ())
            .map_err(|e| Error::auth(format!("simple bind failed: {e}")))
    }

    async fn sasl_gssapi_bind(&mut self, server_fqdn: &str) -> Result<()> {
        self.ldap
            .sasl_gssapi_bind(server_fqdn)
            .await
            .and_then(|r| r.success())
            .map(|_| ())
            .map_err(|e| Error::auth(format!("SASL/GSSAPI bind to {server_fqdn} failed: {e}")))
    }

    async fn search_page(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &Filter,
        attrs: &[String],
        page_size: i32,
        cookie: Vec<u8>,
    ) -> Result<Page> {
        let filter_str = filter.to_string();
        let ldap = if page_size > 0 {
            let pr = PagedResults {
                size: page_size,
                cookie,
            };
            self.ldap.with_controls(vec![RawControl::from(pr)])
        } else {
            &mut self.ldap
        };

        let (entries, result) = ldap
            .search(base, scope.into(), &filter_str, attrs.to_vec())
            .await
            .map_err(|e| Error::transport(format!("search failed: {e}")))?
            .success()
            .map_err(|e| Error::protocol(format!("search returned an error result: {e}")))?;

        let paged_control = result.ctrls.into_iter().find_map(|raw| {
            if raw.ctype == PAGED_RESULTS_OID {
                Some(raw.val.map(|v| PagedResults::parse(&v).cookie).unwrap_or_default())
            } else {
                None
            }
        });

        let next_cookie = match paged_control {
            Some(cookie) => cookie,
            None if page_size > 0 => {
                return Err(Error::protocol("server did not return the paged-results control"));
            }
            None => Vec::new(),
        };

        let entries = entries
            .into_iter()
            .map(|re| {
                let entry = SearchEntry::construct(re);
                let mut bin_attrs = std::collections::HashMap::new();
                for (k, v) in entry.bin_attrs {
                    bin_attrs.insert(k, v);
                }
                Entry {
                    dn: entry.dn,
                    attrs: entry.attrs,
                    bin_attrs,
                }
            })
            .collect();

        Ok(Page {
            entries,
            cookie: next_cookie,
        })
    }

    async fn add(&mut self, dn: &str, attrs: Vec<(String, Vec<String>)>) -> Result<()> {
        let attrs: Vec<(String, HashSet<String>)> = attrs
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect();
        self.ldap
            .add(dn, attrs)
            .await
            .and_then(|r| r.success())
            .map(|_| ())
            .map_err(|e| Error::protocol(format!("add failed: {e}")))
    }

    async fn modify(&mut self, dn: &str, changes: Vec<AttributeChange>) -> Result<()> {
        let mods: Vec<Mod<String>> = changes
            .into_iter()
            .map(|c| match c {
                AttributeChange::Add(attr, vals) => Mod::Add(attr, vals.into_iter().collect()),
                AttributeChange::Replace(attr, vals) => Mod::Replace(attr, vals.into_iter().collect()),
                AttributeChange::Delete(attr, vals) => Mod::Delete(attr, vals.into_iter().collect()),
            })
            .collect();
        self.ldap
            .modify(dn, mods)
            .await
            .and_then(|r| r.success())
            .map(|_| ())
            .map_err(|e| Error::protocol(format!("modify failed: {e}")))
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        self.ldap
            .delete(dn)
            .await
            .and_then(|r| r.success())
            .map(|_| ())
            .map_err(|e| Error::protocol(format!("delete failed: {e}")))
    }

    async fn modify_dn(&mut self, dn: &str, new_rdn: &str, delete_old: bool, new_superior: Option<&str>) -> Result<()> {
        self.ldap
            .modifydn(dn, new_rdn, delete_old, new_superior)
            .await
            .and_then(|r| r.success())
            .map(|_| ())
            .map_err(|e| Error::protocol(format!("modify DN failed: {e}")))
    }

    async fn compare(&mut self, dn: &str, attr: &str, value: &[u8]) -> Result<bool> {
        self.ldap
            .compare(dn, attr, value)
            .await
            .map(|r| r.is_ok() && r.success().is_ok())
            .map_err(|e| Error::protocol(format!("compare failed: {e}")))
    }

    async fn unbind(&mut self) -> Result<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| Error::transport(format!("unbind failed: {e}")))
    }
}

/// Ping a connection's liveness using the RFC 4532 Who am I? extended
/// operation, the same way the pool uses an idle connection check before
/// handing it back out.
pub async fn who_am_i(ldap: &mut ldap3::Ldap) -> Result<String> {
    let (exop, _res) = ldap
        .extended(WhoAmI)
        .await
        .map_err(|e| Error::transport(format!("whoami failed: {e}")))?
        .success()
        .map_err(|e| Error::transport(format!("whoami returned an error: {e}")))?;
    let who = WhoAmI::parse(&exop);
    Ok(who.authzid)
}
