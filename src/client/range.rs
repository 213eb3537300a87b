//! Range-subtype coalescing: Active Directory's mechanism for returning a
//! large multi-valued attribute across several request/response round
//! trips, via attribute names of the form `type;range=lo-hi`.

use tracing::debug;

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::transport::{Entry, LdapTransport, Scope};

enum RangeHi {
    Star,
    Num(u64),
}

/// Parse `attr;range=lo-hi` (case-insensitively on the `range` option
/// name). Returns `None` for any key that isn't a range-subtype attribute
/// name.
fn parse_range_attr(key: &str) -> Option<(String, u64, RangeHi)> {
    let (attr_type, rest) = key.split_once(';')?;
    let (opt_name, range) = rest.split_once('=')?;
    if !opt_name.eq_ignore_ascii_case("range") {
        return None;
    }
    let (lo, hi) = range.split_once('-')?;
    let lo: u64 = lo.parse().ok()?;
    let hi = if hi == "*" { RangeHi::Star } else { RangeHi::Num(hi.parse().ok()?) };
    Some((attr_type.to_string(), lo, hi))
}

/// Resolve every `attr;range=lo-hi` key in `entry.attrs` into its bare
/// attribute name holding the full, concatenated value list. Re-queries
/// `entry.dn` (by `distinguishedName` equality, subtree scope under
/// `base`) for each successive slice until a response names `hi` as `*` or
/// the object disappears mid-retrieval (deleted between the original
/// search and the continuation).
pub async fn coalesce_string_ranges(transport: &mut dyn LdapTransport, base: &str, entry: &mut Entry) -> Result<()> {
    let range_keys: Vec<String> = entry.attrs.keys().filter(|k| parse_range_attr(k).is_some()).cloned().collect();
    for key in range_keys {
        let (attr_type, _lo, mut hi) = parse_range_attr(&key).expect("key was matched by the filter above");
        let mut values = entry.attrs.remove(&key).unwrap_or_default();
        loop {
            let hi_n = match hi {
                RangeHi::Star => break,
                RangeHi::Num(n) => n,
            };
            let want = format!("{attr_type};range={}-*", hi_n + 1);
            let filter = Filter::equals("distinguishedName", entry.dn.clone());
            debug!(dn = %entry.dn, attr = %attr_type, from = hi_n + 1, "range continuation fetched");
            let page = transport
                .search_page(base, Scope::Subtree, &filter, std::slice::from_ref(&want), 0, Vec::new())
                .await?;
            let Some(next) = page.entries.into_iter().find(|e| !e.dn.is_empty()) else {
                break;
            };
            let found = next.attrs.into_iter().find_map(|(k, v)| {
                parse_range_attr(&k).and_then(|(t, lo2, hi2)| (t == attr_type && lo2 == hi_n + 1).then_some((v, hi2)))
            });
            let Some((more, next_hi)) = found else {
                return Err(Error::protocol(format!(
                    "range continuation for {attr_type} on {} did not start at {}",
                    entry.dn,
                    hi_n + 1
                )));
            };
            values.extend(more);
            hi = next_hi;
        }
        entry.attrs.entry(attr_type).or_default().extend(values);
    }
    Ok(())
}

/// The binary-valued counterpart of [`coalesce_string_ranges`], operating
/// on `entry.bin_attrs`.
pub async fn coalesce_binary_ranges(transport: &mut dyn LdapTransport, base: &str, entry: &mut Entry) -> Result<()> {
    let range_keys: Vec<String> = entry.bin_attrs.keys().filter(|k| parse_range_attr(k).is_some()).cloned().collect();
    for key in range_keys {
        let (attr_type, _lo, mut hi) = parse_range_attr(&key).expect("key was matched by the filter above");
        let mut values = entry.bin_attrs.remove(&key).unwrap_or_default();
        loop {
            let hi_n = match hi {
                RangeHi::Star => break,
                RangeHi::Num(n) => n,
            };
            let want = format!("{attr_type};range={}-*", hi_n + 1);
            let filter = Filter::equals("distinguishedName", entry.dn.clone());
            debug!(dn = %entry.dn, attr = %attr_type, from = hi_n + 1, "range continuation fetched");
            let page = transport
                .search_page(base, Scope::Subtree, &filter, std::slice::from_ref(&want), 0, Vec::new())
                .await?;
            let Some(next) = page.entries.into_iter().find(|e| !e.dn.is_empty()) else {
                break;
            };
            let found = next.bin_attrs.into_iter().find_map(|(k, v)| {
                parse_range_attr(&k).and_then(|(t, lo2, hi2)| (t == attr_type && lo2 == hi_n + 1).then_some((v, hi2)))
            });
            let Some((more, next_hi)) = found else {
                return Err(Error::protocol(format!(
                    "range continuation for {attr_type} on {} did not start at {}",
                    entry.dn,
                    hi_n + 1
                )));
            };
            values.extend(more);
            hi = next_hi;
        }
        entry.bin_attrs.entry(attr_type).or_default().extend(values);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AttributeChange, Page};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
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

    fn entry_with(attrs: HashMap<String, Vec<String>>) -> Entry {
        Entry { dn: "cn=big-group,dc=example,dc=org".to_string(), attrs, bin_attrs: Default::default() }
    }

    #[tokio::test]
    async fn coalesces_a_complete_range_across_two_continuations() {
        let mut entry = entry_with(HashMap::from([(
            "member;range=0-1".to_string(),
            vec!["cn=a".to_string(), "cn=b".to_string()],
        )]));
        let mut transport = FakeTransport {
            pages: Mutex::new(VecDeque::from([
                Page {
                    entries: vec![Entry {
                        dn: entry.dn.clone(),
                        attrs: HashMap::from([("member;range=2-3".to_string(), vec!["cn=c".to_string(), "cn=d".to_string()])]),
                        bin_attrs: Default::default(),
                    }],
                    cookie: vec![],
                },
                Page {
                    entries: vec![Entry {
                        dn: entry.dn.clone(),
                        attrs: HashMap::from([("member;range=4-*".to_string(), vec!["cn=e".to_string()])]),
                        bin_attrs: Default::default(),
                    }],
                    cookie: vec![],
                },
            ])),
        };

        coalesce_string_ranges(&mut transport, "dc=example,dc=org", &mut entry).await.expect("coalesce succeeds");

        assert!(!entry.attrs.contains_key("member;range=0-1"));
        let member = entry.attrs.get("member").expect("bare attribute present");
        assert_eq!(member, &vec!["cn=a", "cn=b", "cn=c", "cn=d", "cn=e"]);
    }

    #[tokio::test]
    async fn stops_with_partial_values_when_object_disappears() {
        let mut entry = entry_with(HashMap::from([(
            "member;range=0-1".to_string(),
            vec!["cn=a".to_string(), "cn=b".to_string()],
        )]));
        let mut transport = FakeTransport {
            pages: Mutex::new(VecDeque::from([Page { entries: vec![], cookie: vec![] }])),
        };

        coalesce_string_ranges(&mut transport, "dc=example,dc=org", &mut entry).await.expect("coalesce succeeds");

        assert_eq!(entry.attrs.get("member").expect("bare attribute present"), &vec!["cn=a", "cn=b"]);
    }

    #[tokio::test]
    async fn rejects_a_continuation_that_does_not_start_where_the_previous_one_ended() {
        let mut entry = entry_with(HashMap::from([(
            "member;range=0-1".to_string(),
            vec!["cn=a".to_string(), "cn=b".to_string()],
        )]));
        let mut transport = FakeTransport {
            pages: Mutex::new(VecDeque::from([Page {
                entries: vec![Entry {
                    dn: entry.dn.clone(),
                    attrs: HashMap::from([("member;range=5-*".to_string(), vec!["cn=z".to_string()])]),
                    bin_attrs: Default::default(),
                }],
                cookie: vec![],
            }])),
        };

        let err = coalesce_string_ranges(&mut transport, "dc=example,dc=org", &mut entry).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
