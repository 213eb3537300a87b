//! Component E: the connection router and directory client.
//!
//! [`AdClient`] is the crate's top-level entry point: it owns a pool of
//! bound LDAP connections keyed by naming context, server and scheme, lazily
//! discovers the forest's naming contexts the way the original
//! `ad.core.client.Client` does (one unauthenticated rootDSE search, then
//! one authenticated one), and drives paged search and range-subtype
//! coalescing transparently underneath `search`.

mod paging;
mod range;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

pub use crate::transport::Scope;

use crate::config::Settings;
use crate::dn::{domain_of, resolve_nc, DomainName};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::locate::{Locator, Role, Server};
use crate::sandbox::Sandbox;
use crate::transport::{AttributeChange, Entry, Ldap3Transport, LdapTransport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which kind of LDAP service a connection targets: a normal domain
/// controller, or a Global Catalog server listening on the GC port.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Scheme {
    Ldap,
    Gc,
}

impl Scheme {
    fn port(self) -> u16 {
        match self {
            Scheme::Ldap => 389,
            Scheme::Gc => 3268,
        }
    }

    fn role(self) -> Role {
        match self {
            Scheme::Ldap => Role::Dc,
            Scheme::Gc => Role::Gc,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Hash)]
struct PoolKey {
    naming_context: String,
    server: Option<String>,
    scheme: Scheme,
}

/// Forest-wide state discovered once and cached for the life of an
/// [`AdClient`]: the forest root NC, every NC AD knows about, and the
/// configuration/schema NCs singled out of that list.
#[derive(Clone, Debug, Default)]
struct ForestState {
    forest_root_dn: String,
    naming_contexts: Vec<String>,
    config_nc: String,
    schema_nc: String,
}

type Connection = Arc<AsyncMutex<Box<dyn LdapTransport>>>;

/// The directory client: routes searches and writes to the right domain
/// controller, maintaining a pool of bound connections and the forest's
/// naming-context map behind the scenes.
pub struct AdClient {
    home_domain: DomainName,
    settings: Settings,
    locator: Locator,
    sandbox: Sandbox,
    pool: DashMap<PoolKey, Connection>,
    forest: Option<ForestState>,
}

impl AdClient {
    /// Build a client whose implicit home domain (used for the default
    /// search base and for unqualified `set_password`/`change_password`
    /// principals) is `home_domain`.
    pub fn new(home_domain: DomainName, settings: Settings, locator: Locator, sandbox: Sandbox) -> AdClient {
        AdClient {
            home_domain,
            settings,
            locator,
            sandbox,
            pool: DashMap::new(),
            forest: None,
        }
    }

    /// The forest root naming context's DN, discovering the forest on
    /// first use.
    pub async fn forest_root_dn(&mut self) -> Result<String> {
        Ok(self.ensure_forest().await?.forest_root_dn)
    }

    /// Every naming context the forest root domain controller named in its
    /// rootDSE, discovering the forest on first use.
    pub async fn naming_contexts(&mut self) -> Result<Vec<String>> {
        Ok(self.ensure_forest().await?.naming_contexts)
    }

    /// The Configuration naming context's DN.
    pub async fn configuration_naming_context(&mut self) -> Result<String> {
        Ok(self.ensure_forest().await?.config_nc)
    }

    /// The Schema naming context's DN.
    pub async fn schema_naming_context(&mut self) -> Result<String> {
        Ok(self.ensure_forest().await?.schema_nc)
    }

    /// Search `base` (the home domain's root, by default), resolving
    /// range-subtype attributes transparently and paging through the
    /// configured page size. `filter` defaults to `(objectClass=*)`.
    pub async fn search(
        &mut self,
        filter: Option<&Filter>,
        base: Option<&str>,
        scope: Scope,
        attrs: &[String],
        server: Option<&str>,
        scheme: Scheme,
    ) -> Result<Vec<Entry>> {
        self.ensure_forest().await?;
        let base = base.map(str::to_string).unwrap_or_else(|| self.home_domain.to_dn());
        let default_filter = Filter::present("objectClass");
        let filter = filter.unwrap_or(&default_filter);

        let nc = if base.is_empty() {
            server.ok_or_else(|| Error::config("an explicit server is required to search the rootDSE"))?;
            String::new()
        } else {
            self.resolve_nc(&base)?
        };

        let handle = self.get_or_connect(&nc, server, scheme).await?;
        let mut guard = handle.lock().await;
        let transport: &mut dyn LdapTransport = &mut **guard;

        let mut entries = paging::collect(transport, &base, scope, filter, attrs, self.settings.search.page_size).await?;
        for entry in &mut entries {
            range::coalesce_string_ranges(transport, &base, entry).await?;
            range::coalesce_binary_ranges(transport, &base, entry).await?;
        }
        Ok(entries)
    }

    pub async fn add(&mut self, dn: &str, attrs: Vec<(String, Vec<String>)>, server: Option<&str>) -> Result<()> {
        self.ensure_forest().await?;
        let nc = self.resolve_nc(dn)?;
        let handle = self.get_or_connect(&nc, server, Scheme::Ldap).await?;
        handle.lock().await.add(dn, attrs).await
    }

    pub async fn modify(&mut self, dn: &str, changes: Vec<AttributeChange>, server: Option<&str>) -> Result<()> {
        self.ensure_forest().await?;
        let nc = self.resolve_nc(dn)?;
        let handle = self.get_or_connect(&nc, server, Scheme::Ldap).await?;
        handle.lock().await.modify(dn, changes).await
    }

    pub async fn delete(&mut self, dn: &str, server: Option<&str>) -> Result<()> {
        self.ensure_forest().await?;
        let nc = self.resolve_nc(dn)?;
        let handle = self.get_or_connect(&nc, server, Scheme::Ldap).await?;
        handle.lock().await.delete(dn).await
    }

    /// Move and/or rename `dn`. `new_superior` leaves the object under its
    /// current parent when `None`; `delete_old_rdn` controls whether the
    /// previous RDN's attribute value is removed from the entry.
    pub async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
        server: Option<&str>,
    ) -> Result<()> {
        self.ensure_forest().await?;
        let nc = self.resolve_nc(dn)?;
        let handle = self.get_or_connect(&nc, server, Scheme::Ldap).await?;
        handle.lock().await.modify_dn(dn, new_rdn, delete_old_rdn, new_superior).await
    }

    /// Rename `dn` in place (no superior change), the common case of
    /// [`AdClient::modify_dn`].
    pub async fn rename(&mut self, dn: &str, new_rdn: &str, delete_old_rdn: bool, server: Option<&str>) -> Result<()> {
        self.modify_dn(dn, new_rdn, delete_old_rdn, None, server).await
    }

    pub async fn compare(&mut self, dn: &str, attr: &str, value: &[u8], server: Option<&str>) -> Result<bool> {
        self.ensure_forest().await?;
        let nc = self.resolve_nc(dn)?;
        let handle = self.get_or_connect(&nc, server, Scheme::Ldap).await?;
        handle.lock().await.compare(dn, attr, value).await
    }

    /// Set `principal`'s password without presenting the old one (an
    /// administrative reset). `principal` without an `@realm` suffix is
    /// qualified with this client's home domain. If `server` is given, the
    /// sandbox's KDC/kpasswd list for the principal's realm is pinned to it
    /// for the duration of the call and refreshed from the locator
    /// afterwards.
    pub async fn set_password(&mut self, principal: &str, new_password: &str, server: Option<&str>) -> Result<()> {
        let full_principal = self.qualify_principal(principal);
        let realm = realm_of(&full_principal);
        if let Some(server) = server {
            self.sandbox.pin_servers(&realm, vec![server.to_string()])?;
        }
        let outcome = self.sandbox.set_password(&full_principal, new_password);
        self.refresh_sandbox_servers(&realm).await;
        outcome
    }

    /// Change `principal`'s password, presenting the old one (a
    /// self-service change). Server-pinning semantics match
    /// [`AdClient::set_password`].
    pub async fn change_password(
        &mut self,
        principal: &str,
        old_password: &str,
        new_password: &str,
        server: Option<&str>,
    ) -> Result<()> {
        let full_principal = self.qualify_principal(principal);
        let realm = realm_of(&full_principal);
        if let Some(server) = server {
            self.sandbox.pin_servers(&realm, vec![server.to_string()])?;
        }
        let outcome = self.sandbox.change_password(&full_principal, old_password, new_password);
        self.refresh_sandbox_servers(&realm).await;
        outcome
    }

    /// Unbind and drop every pooled connection. No connection is
    /// automatically re-established; a later operation reconnects lazily.
    pub async fn close(&mut self) -> Result<()> {
        let keys: Vec<PoolKey> = self.pool.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.pool.remove(&key) {
                let _ = handle.lock().await.unbind().await;
            }
        }
        Ok(())
    }

    fn qualify_principal(&self, principal: &str) -> String {
        if principal.contains('@') {
            principal.to_string()
        } else {
            format!("{principal}@{}", self.home_domain.as_realm())
        }
    }

    async fn refresh_sandbox_servers(&mut self, realm: &str) {
        let domain = realm.to_ascii_lowercase();
        if let Ok(servers) = self.locator.locate_many(&domain, Role::Dc, self.settings.locate.max_servers).await {
            let hostnames = servers.into_iter().map(|s| s.hostname).collect();
            let _ = self.sandbox.pin_servers(realm, hostnames);
        }
    }

    fn resolve_nc(&self, dn: &str) -> Result<String> {
        let forest = self.forest.as_ref().expect("ensure_forest was called before resolve_nc");
        resolve_nc(dn, forest.naming_contexts.iter().map(String::as_str))
            .ok_or_else(|| Error::not_found(format!("no naming context covers {dn}")))
    }

    /// A naming context's domain, for DC location purposes. NCs rooted
    /// under a `dc=` DN (ordinary domain NCs) resolve directly; the
    /// Configuration and Schema NCs don't, so they fall back to the forest
    /// root domain.
    fn domain_for_nc(&self, nc: &str) -> String {
        let direct = domain_of(nc);
        if !direct.is_empty() {
            return direct;
        }
        self.forest.as_ref().map(|f| domain_of(&f.forest_root_dn)).unwrap_or_default()
    }

    async fn ensure_forest(&mut self) -> Result<ForestState> {
        if let Some(forest) = &self.forest {
            return Ok(forest.clone());
        }

        let home_domain = self.home_domain.as_dns().to_string();
        let server = self.locator.locate(&home_domain, Role::Dc).await?;
        let url = format!("ldap://{}:{}/", server.hostname, Scheme::Ldap.port());
        let mut conn = Ldap3Transport::connect(&url, CONNECT_TIMEOUT).await?;

        let root_page = conn
            .search_page(
                "",
                Scope::Base,
                &Filter::present("objectClass"),
                &["rootDomainNamingContext".to_string()],
                0,
                Vec::new(),
            )
            .await?;
        let root_entry = root_page
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("could not search the rootDSE of {}", server.hostname)))?;
        let forest_root_dn = root_entry
            .attrs
            .get("rootDomainNamingContext")
            .and_then(|v| v.first())
            .cloned()
            .ok_or_else(|| Error::protocol("rootDSE is missing rootDomainNamingContext"))?;

        conn.sasl_gssapi_bind(&server.hostname).await?;
        let nc_page = conn
            .search_page(
                "",
                Scope::Base,
                &Filter::present("objectClass"),
                &[
                    "namingContexts".to_string(),
                    "configurationNamingContext".to_string(),
                    "schemaNamingContext".to_string(),
                ],
                0,
                Vec::new(),
            )
            .await?;
        let nc_entry = nc_page
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("could not search the authenticated rootDSE of {}", server.hostname)))?;
        let naming_contexts = nc_entry.attrs.get("namingContexts").cloned().unwrap_or_default();
        let config_nc = nc_entry.attrs.get("configurationNamingContext").and_then(|v| v.first()).cloned().unwrap_or_default();
        let schema_nc = nc_entry.attrs.get("schemaNamingContext").and_then(|v| v.first()).cloned().unwrap_or_default();
        let _ = conn.unbind().await;

        let forest = ForestState { forest_root_dn, naming_contexts, config_nc, schema_nc };
        debug!(forest_root = %forest.forest_root_dn, contexts = forest.naming_contexts.len(), "forest discovered");
        self.forest = Some(forest.clone());
        Ok(forest)
    }

    async fn get_or_connect(&mut self, nc: &str, server: Option<&str>, scheme: Scheme) -> Result<Connection> {
        let key = PoolKey {
            naming_context: nc.to_ascii_lowercase(),
            server: server.map(str::to_ascii_lowercase),
            scheme,
        };
        if let Some(existing) = self.pool.get(&key) {
            debug!(nc, ?scheme, "connection pool hit");
            return Ok(existing.clone());
        }
        debug!(nc, ?scheme, "connection pool miss");

        let domain = self.domain_for_nc(nc);
        let target: Server = match server {
            Some(hostname) => self.locator.validate_pinned(hostname, &domain, scheme.role()).await?,
            None => self.locator.locate(&domain, scheme.role()).await?,
        };

        let url = format!("ldap://{}:{}/", target.hostname, scheme.port());
        let mut transport = Ldap3Transport::connect(&url, CONNECT_TIMEOUT).await?;
        transport.sasl_gssapi_bind(&target.hostname).await?;

        let boxed: Box<dyn LdapTransport> = Box::new(transport);
        let handle: Connection = Arc::new(AsyncMutex::new(boxed));
        self.pool.insert(key, handle.clone());
        Ok(handle)
    }
}

fn realm_of(principal: &str) -> String {
    principal.split_once('@').map(|(_, realm)| realm.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_maps_to_the_expected_port_and_role() {
        assert_eq!(Scheme::Ldap.port(), 389);
        assert_eq!(Scheme::Gc.port(), 3268);
        assert_eq!(Scheme::Ldap.role(), Role::Dc);
        assert_eq!(Scheme::Gc.role(), Role::Gc);
    }

    #[test]
    fn realm_of_extracts_the_part_after_at() {
        assert_eq!(realm_of("alice@EXAMPLE.ORG"), "EXAMPLE.ORG");
        assert_eq!(realm_of("alice"), "");
    }
}
