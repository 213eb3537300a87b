//! Domain names and Distinguished Names, and the handful of pure functions
//! that convert between the two representations AD needs: a DNS/Kerberos
//! domain name and the leading `dc=` components of a DN.

use std::fmt;

/// A DNS domain name, normalized on construction.
///
/// The same name is needed in two forms: upper case when used as a Kerberos
/// realm, lower case when used in DNS queries or DN fragments. Both are
/// derivable from either, so this type stores one canonical form (lower
/// case, matching DNS) and derives the other on demand.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct DomainName(String);

impl DomainName {
    pub fn new<S: AsRef<str>>(name: S) -> DomainName {
        DomainName(name.as_ref().to_ascii_lowercase())
    }

    /// The domain name in lower case, as used in DNS queries and DN
    /// fragments.
    pub fn as_dns(&self) -> &str {
        &self.0
    }

    /// The domain name in upper case, as used as a Kerberos realm.
    pub fn as_realm(&self) -> String {
        self.0.to_ascii_uppercase()
    }

    /// The `dc=label,dc=label,...` distinguished name of this domain's root.
    pub fn to_dn(&self) -> String {
        dn_of(&self.0)
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainName({:?})", self.0)
    }
}

impl<S: AsRef<str>> From<S> for DomainName {
    fn from(s: S) -> DomainName {
        DomainName::new(s)
    }
}

/// One `type=value` pair within a single RDN component of a DN.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeValue {
    pub attr_type: String,
    pub value: String,
}

/// Split a DN into its RDN components. Each component is itself split on
/// unescaped `+` into its constituent `type=value` pairs. This is a small,
/// deliberately forgiving parser: it exists only to let `domain_of` walk
/// the trailing `dc=` components and has no ambition of validating
/// arbitrary RFC 4514 DNs.
pub fn split_rdns(dn: &str) -> Vec<Vec<AttributeValue>> {
    let mut rdns = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    let mut in_quotes = false;
    let mut components = Vec::new();

    for c in dn.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' | ';' if !in_quotes => {
                components.push(std::mem::take(&mut current));
                rdns.push(split_plus(&components));
                components.clear();
            }
            '+' if !in_quotes => {
                components.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() || !components.is_empty() {
        components.push(current);
        rdns.push(split_plus(&components));
    }
    rdns
}

fn split_plus(components: &[String]) -> Vec<AttributeValue> {
    components
        .iter()
        .filter_map(|c| {
            let c = c.trim();
            let eq = c.find('=')?;
            Some(AttributeValue {
                attr_type: c[..eq].trim().to_ascii_lowercase(),
                value: c[eq + 1..].trim().to_string(),
            })
        })
        .collect()
}

/// `domain_of(dn)`: concatenate the trailing, consecutive `dc=` components of
/// `dn` (the components closest to the DN's root), in the order they appear,
/// joined with `.`. Scanning starts from the root end because only a DN's
/// *suffix* encodes its domain — e.g. `cn=foo,ou=people,dc=example,dc=org`
/// is in the `example.org` domain despite its leaf RDNs not being `dc=`.
pub fn domain_of(dn: &str) -> String {
    let rdns = split_rdns(dn);
    let mut labels = Vec::new();
    for rdn in rdns.iter().rev() {
        if rdn.len() == 1 && rdn[0].attr_type == "dc" {
            labels.push(rdn[0].value.clone());
        } else {
            break;
        }
    }
    labels.reverse();
    labels.join(".")
}

/// `dn_of(domain)`: map each label of `domain` to a `dc=label` RDN,
/// separated by top-to-bottom (as a DN reads), joined with `,`.
pub fn dn_of(domain: &str) -> String {
    domain
        .split('.')
        .filter(|l| !l.is_empty())
        .map(|l| format!("dc={}", l))
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolve `dn` to the longest member of `contexts` that is a
/// case-insensitive suffix of it. Returns `None` if no context matches,
/// which callers translate into `Error::NotFound`. An empty `dn` (the
/// rootDSE) never resolves, by design — the caller must supply an explicit
/// server for it.
pub fn resolve_nc<'a, I>(dn: &str, contexts: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    if dn.is_empty() {
        return None;
    }
    let dn_lower = dn.to_ascii_lowercase();
    let mut best: Option<&str> = None;
    for ctx in contexts {
        if ctx.is_empty() {
            continue;
        }
        let ctx_lower = ctx.to_ascii_lowercase();
        if dn_lower == ctx_lower || dn_lower.ends_with(&format!(",{}", ctx_lower)) {
            if best.map(|b| ctx.len() > b.len()).unwrap_or(true) {
                best = Some(ctx);
            }
        }
    }
    best.map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_name_derives_both_cases() {
        let d = DomainName::new("Example.ORG");
        assert_eq!(d.as_dns(), "example.org");
        assert_eq!(d.as_realm(), "EXAMPLE.ORG");
        assert_eq!(d.to_dn(), "dc=example,dc=org");
    }

    #[test]
    fn domain_of_reads_trailing_dc_components() {
        assert_eq!(
            domain_of("cn=foo,ou=people,dc=example,dc=org"),
            "example.org"
        );
        assert_eq!(domain_of("dc=example,dc=org"), "example.org");
        assert_eq!(domain_of("cn=foo,ou=people"), "");
    }

    #[test]
    fn dn_of_is_inverse_of_domain_of_for_simple_domains() {
        assert_eq!(dn_of("example.org"), "dc=example,dc=org");
        assert_eq!(domain_of(&dn_of("a.b.c")), "a.b.c");
    }

    #[test]
    fn resolve_nc_picks_longest_suffix_case_insensitively() {
        let contexts = vec![
            "dc=example,dc=org",
            "cn=configuration,dc=example,dc=org",
            "cn=schema,cn=configuration,dc=example,dc=org",
        ];
        let dn = "cn=foo,CN=Schema,cn=Configuration,DC=Example,dc=org";
        assert_eq!(
            resolve_nc(dn, contexts.iter().copied()),
            Some("cn=schema,cn=configuration,dc=example,dc=org".to_string())
        );
    }

    #[test]
    fn resolve_nc_returns_none_for_empty_dn() {
        assert_eq!(resolve_nc("", vec!["dc=example,dc=org"]), None);
    }

    #[test]
    fn resolve_nc_returns_none_when_no_suffix_matches() {
        assert_eq!(resolve_nc("dc=other,dc=org", vec!["dc=example,dc=org"]), None);
    }
}
