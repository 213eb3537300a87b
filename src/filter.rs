//! LDAP search filters.
//!
//! [`crate::transport::LdapTransport`] hands filters to the `ldap3` crate as
//! plain RFC 4515 strings, so there is no need for this crate's own filter
//! representation to round-trip through BER the way the teacher's `lber`-
//! coupled parser did. [`Filter`] is a plain Rust sum type; [`Filter::parse`]
//! reads the RFC 4515 string grammar and `Display` re-emits it.

use std::fmt;

use crate::util::ldap_escape;

/// A parsed LDAP search filter (RFC 4515), dynamically dispatched over the
/// handful of shapes Active Directory searches actually need.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equals(String, String),
    Lte(String, String),
    Gte(String, String),
    Approx(String, String),
    Present(String),
}

impl Filter {
    /// Parse a filter given in RFC 4515 string form, e.g.
    /// `(&(objectClass=user)(sAMAccountName=alice))`.
    pub fn parse(input: &str) -> Result<Filter, FilterParseError> {
        let mut p = Parser { input: input.as_bytes(), pos: 0 };
        let filter = p.parse_filter()?;
        p.skip_ws();
        if p.pos != p.input.len() {
            return Err(FilterParseError(format!("trailing input at byte {}", p.pos)));
        }
        Ok(filter)
    }

    /// `(attr=value)` present in every chain of this filter.
    pub fn equals(attr: impl Into<String>, value: impl Into<String>) -> Filter {
        Filter::Equals(attr.into(), value.into())
    }

    pub fn present(attr: impl Into<String>) -> Filter {
        Filter::Present(attr.into())
    }

    pub fn and(children: Vec<Filter>) -> Filter {
        Filter::And(children)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(children) => {
                write!(f, "(&")?;
                for c in children {
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            Filter::Or(children) => {
                write!(f, "(|")?;
                for c in children {
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            Filter::Not(child) => write!(f, "(!{child})"),
            Filter::Equals(attr, value) => write!(f, "({attr}={})", ldap_escape(value.as_str())),
            Filter::Lte(attr, value) => write!(f, "({attr}<={})", ldap_escape(value.as_str())),
            Filter::Gte(attr, value) => write!(f, "({attr}>={})", ldap_escape(value.as_str())),
            Filter::Approx(attr, value) => write!(f, "({attr}~={})", ldap_escape(value.as_str())),
            Filter::Present(attr) => write!(f, "({attr}=*)"),
        }
    }
}

/// The filter string was not well-formed RFC 4515.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParseError(String);

impl fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid filter: {}", self.0)
    }
}

impl std::error::Error for FilterParseError {}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), FilterParseError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(FilterParseError(format!(
                "expected '{}' at byte {}",
                c as char, self.pos
            )))
        }
    }

    /// `filter = "(" filtercomp ")"`
    fn parse_filter(&mut self) -> Result<Filter, FilterParseError> {
        self.skip_ws();
        self.expect(b'(')?;
        let filter = self.parse_filtercomp()?;
        self.expect(b')')?;
        Ok(filter)
    }

    /// `filtercomp = and / or / not / item`
    fn parse_filtercomp(&mut self) -> Result<Filter, FilterParseError> {
        match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Ok(Filter::And(self.parse_filterlist()?))
            }
            Some(b'|') => {
                self.pos += 1;
                Ok(Filter::Or(self.parse_filterlist()?))
            }
            Some(b'!') => {
                self.pos += 1;
                let inner = self.parse_filter()?;
                Ok(Filter::Not(Box::new(inner)))
            }
            _ => self.parse_item(),
        }
    }

    /// `filterlist = 1*filter`
    fn parse_filterlist(&mut self) -> Result<Vec<Filter>, FilterParseError> {
        let mut out = vec![self.parse_filter()?];
        while self.peek() == Some(b'(') {
            out.push(self.parse_filter()?);
        }
        Ok(out)
    }

    /// `item = simple / present / substring / extensible`
    ///
    /// Substring and extensible-match filters are not used by anything in
    /// this crate's own Active Directory traffic, so only simple equality,
    /// presence, and the comparison operators are handled.
    fn parse_item(&mut self) -> Result<Filter, FilterParseError> {
        let attr = self.parse_attribute()?;
        let op = self.parse_operator()?;
        let value = self.parse_value()?;
        Ok(match op {
            Op::Equal if value == "*" => Filter::Present(attr),
            Op::Equal => Filter::Equals(attr, unescape(&value)?),
            Op::Lte => Filter::Lte(attr, unescape(&value)?),
            Op::Gte => Filter::Gte(attr, unescape(&value)?),
            Op::Approx => Filter::Approx(attr, unescape(&value)?),
        })
    }

    fn parse_attribute(&mut self) -> Result<String, FilterParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'-' || c == b'.' || c == b';') {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(FilterParseError(format!("expected attribute description at byte {start}")));
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn parse_operator(&mut self) -> Result<Op, FilterParseError> {
        if self.input[self.pos..].starts_with(b">=") {
            self.pos += 2;
            Ok(Op::Gte)
        } else if self.input[self.pos..].starts_with(b"<=") {
            self.pos += 2;
            Ok(Op::Lte)
        } else if self.input[self.pos..].starts_with(b"~=") {
            self.pos += 2;
            Ok(Op::Approx)
        } else if self.input[self.pos..].starts_with(b"=") {
            self.pos += 1;
            Ok(Op::Equal)
        } else {
            Err(FilterParseError(format!("expected a filter operator at byte {}", self.pos)))
        }
    }

    /// The assertion value, up to the closing `)`. Escapes are left intact
    /// here and resolved by [`unescape`].
    fn parse_value(&mut self) -> Result<String, FilterParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c != b')') {
            self.pos += 1;
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }
}

enum Op {
    Equal,
    Lte,
    Gte,
    Approx,
}

/// Resolve `\XX` hex escapes in an assertion value back to raw bytes,
/// re-encoded as UTF-8 (AD attribute values relevant to this crate are all
/// textual).
fn unescape(value: &str) -> Result<String, FilterParseError> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hi = bytes.get(i + 1).copied().ok_or_else(|| FilterParseError("truncated escape".into()))?;
            let lo = bytes.get(i + 2).copied().ok_or_else(|| FilterParseError("truncated escape".into()))?;
            let hi = hex_digit(hi).ok_or_else(|| FilterParseError("invalid hex escape".into()))?;
            let lo = hex_digit(lo).ok_or_else(|| FilterParseError("invalid hex escape".into()))?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| FilterParseError("escaped value was not valid UTF-8".into()))
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_equality() {
        let f = Filter::parse("(sAMAccountName=alice)").expect("parses");
        assert_eq!(f, Filter::Equals("sAMAccountName".to_string(), "alice".to_string()));
    }

    #[test]
    fn parses_presence() {
        let f = Filter::parse("(objectClass=*)").expect("parses");
        assert_eq!(f, Filter::Present("objectClass".to_string()));
    }

    #[test]
    fn parses_and_of_equalities() {
        let f = Filter::parse("(&(objectClass=user)(sAMAccountName=alice))").expect("parses");
        assert_eq!(
            f,
            Filter::And(vec![
                Filter::Equals("objectClass".to_string(), "user".to_string()),
                Filter::Equals("sAMAccountName".to_string(), "alice".to_string()),
            ])
        );
    }

    #[test]
    fn parses_nested_not_and_or() {
        let f = Filter::parse("(!(|(a=1)(b=2)))").expect("parses");
        assert_eq!(
            f,
            Filter::Not(Box::new(Filter::Or(vec![
                Filter::Equals("a".to_string(), "1".to_string()),
                Filter::Equals("b".to_string(), "2".to_string()),
            ])))
        );
    }

    #[test]
    fn parses_comparison_operators() {
        assert_eq!(
            Filter::parse("(uSNChanged>=100)").expect("parses"),
            Filter::Gte("uSNChanged".to_string(), "100".to_string())
        );
        assert_eq!(
            Filter::parse("(uSNChanged<=100)").expect("parses"),
            Filter::Lte("uSNChanged".to_string(), "100".to_string())
        );
        assert_eq!(
            Filter::parse("(cn~=smith)").expect("parses"),
            Filter::Approx("cn".to_string(), "smith".to_string())
        );
    }

    #[test]
    fn unescapes_hex_sequences_in_values() {
        let f = Filter::parse(r"(cn=Lu\c4\8di\c4\87\28admin\29)").expect("parses");
        assert_eq!(f, Filter::Equals("cn".to_string(), "Lučić(admin)".to_string()));
    }

    #[test]
    fn netlogon_style_filter_parses_and_rejects_unmatched_rhs() {
        let f = Filter::parse(r"(&(DnsDomain=example.org)(Host=dc1)(NtVer=\06\00\00\00))").expect("parses");
        match f {
            Filter::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
        assert!(Filter::parse("(cn=unterminated").is_err());
        assert!(Filter::parse("cn=alice)").is_err());
    }

    #[test]
    fn display_round_trips_simple_filters() {
        let original = "(&(objectClass=user)(sAMAccountName=alice))";
        let f = Filter::parse(original).expect("parses");
        assert_eq!(f.to_string(), original);
    }

    #[test]
    fn display_escapes_special_characters_in_values() {
        let f = Filter::equals("cn", "a(b)*c\\d");
        assert_eq!(f.to_string(), r"(cn=a\28b\29\2ac\5cd)");
    }
}
