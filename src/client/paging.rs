//! The paged-results search driver (RFC 2696 Simple Paged Results).
//!
//! Repeatedly issues the same search with the cookie carried over from the
//! previous page until the server returns an empty cookie, discarding
//! entries with an empty DN (LDAP continuation referrals) as they
//! accumulate.

use tracing::debug;

use crate::error::Result;
use crate::filter::Filter;
use crate::transport::{Entry, LdapTransport, Scope};

pub async fn collect(
    transport: &mut dyn LdapTransport,
    base: &str,
    scope: Scope,
    filter: &Filter,
    attrs: &[String],
    page_size: i32,
) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    let mut cookie = Vec::new();
    loop {
        let page = transport.search_page(base, scope, filter, attrs, page_size, cookie).await?;
        debug!(
            base,
            entries = page.entries.len(),
            more = !page.cookie.is_empty(),
            "search page fetched"
        );
        out.extend(page.entries.into_iter().filter(|e| !e.dn.is_empty()));
        if page.cookie.is_empty() {
            break;
        }
        cookie = page.cookie;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AttributeChange, Page};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTransport {
        pages: Mutex<VecDeque<Page>>,
    }

    #[async_trait]
    impl LdapTransport for FakeTransport {
        async fn simple_bind(&mut self, _bind_dn: &str, _password: &str) -> Result<()> {
            Ok(())
        }
        async fn sasl_gssapi_bind(&mut self, _server_fqdn: &str) -> Result<()> {
            Ok(())
        }
        async fn search_page(
            &mut self,
            _base: &str,
            _scope: Scope,
            _filter: &Filter,
            _attrs: &[String],
            _page_size: i32,
            _cookie: Vec<u8>,
        ) -> Result<Page> {
            Ok(self.pages.lock().expect("lock").pop_front().unwrap_or(Page { entries: vec![], cookie: vec![] }))
        }
        async fn add(&mut self, _dn: &str, _attrs: Vec<(String, Vec<String>)>) -> Result<()> {
            Ok(())
        }
        async fn modify(&mut self, _dn: &str, _changes: Vec<AttributeChange>) -> Result<()> {
            Ok(())
        }
        async fn delete(&mut self, _dn: &str) -> Result<()> {
            Ok(())
        }
        async fn modify_dn(&mut self, _dn: &str, _new_rdn: &str, _delete_old: bool, _new_superior: Option<&str>) -> Result<()> {
            Ok(())
        }
        async fn compare(&mut self, _dn: &str, _attr: &str, _value: &[u8]) -> Result<bool> {
            Ok(true)
        }
        async fn unbind(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn entry(dn: &str) -> Entry {
        Entry { dn: dn.to_string(), attrs: Default::default(), bin_attrs: Default::default() }
    }

    #[tokio::test]
    async fn collects_across_pages_and_drops_referrals() {
        let mut transport = FakeTransport {
            pages: Mutex::new(VecDeque::from([
                Page { entries: vec![entry("cn=a"), entry("")], cookie: vec![1] },
                Page { entries: vec![entry("cn=b")], cookie: vec![] },
            ])),
        };
        let filter = Filter::present("objectClass");
        let entries = collect(&mut transport, "dc=example,dc=org", Scope::Subtree, &filter, &[], 500)
            .await
            .expect("collect succeeds");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].dn, "cn=a");
        assert_eq!(entries[1].dn, "cn=b");
    }

    #[tokio::test]
    async fn a_single_empty_page_yields_no_entries() {
        let mut transport = FakeTransport { pages: Mutex::new(VecDeque::from([Page { entries: vec![], cookie: vec![] }])) };
        let filter = Filter::present("objectClass");
        let entries = collect(&mut transport, "dc=example,dc=org", Scope::Subtree, &filter, &[], 0)
            .await
            .expect("collect succeeds");
        assert!(entries.is_empty());
    }
}
