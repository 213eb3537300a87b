use std::borrow::Cow;

/// Escape a filter literal.
///
/// Literal values appearing in an LDAP filter can contain any character,
/// but some characters (parentheses, asterisk, backslash, NUL) must be
/// escaped in the filter's string representation. This function does the
/// escaping.
///
/// The argument, `lit`, can be owned or borrowed. The function doesn't
/// allocate the return value unless there's need to escape the input.
pub fn ldap_escape<'a, S: Into<Cow<'a, str>>>(lit: S) -> Cow<'a, str> {
    #[inline]
    fn needs_escape(c: u8) -> bool {
        c == b'\\' || c == b'*' || c == b'(' || c == b')' || c == 0
    }

    #[inline]
    fn xdigit(c: u8) -> u8 {
        c + if c < 10 { b'0' } else { b'a' - 10 }
    }

    let lit = lit.into();
    let mut output = None;
    for (i, &c) in lit.as_bytes().iter().enumerate() {
        if needs_escape(c) {
            if output.is_none() {
                output = Some(Vec::with_capacity(lit.len() + 12)); // guess: up to 4 escaped chars
                output.as_mut().unwrap().extend(lit[..i].as_bytes());
            }
            let output = output.as_mut().unwrap();
            output.push(b'\\');
            output.push(xdigit(c >> 4));
            output.push(xdigit(c & 0xF));
        } else if let Some(ref mut output) = output {
            output.push(c);
        }
    }
    if let Some(output) = output {
        // unchecked conversion is safe here: we receive a valid
        // UTF-8 value, by definition, and only replace single ASCII
        // bytes with ASCII byte sequences
        Cow::Owned(unsafe { String::from_utf8_unchecked(output) })
    } else {
        lit.into()
    }
}

/// Escape a string for use as an RDN attribute value (RFC 4514 §2.4).
///
/// A leading space or `#`, a trailing space, and any of `,+"\<>;` anywhere
/// in the value must be backslash-escaped; a NUL byte is escaped as `\00`.
pub fn dn_escape<'a, S: Into<Cow<'a, str>>>(value: S) -> Cow<'a, str> {
    let value = value.into();
    if value.is_empty() {
        return value;
    }

    let last = value.chars().count() - 1;
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let escape = match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' => true,
            ' ' if i == 0 || i == last => true,
            '#' if i == 0 => true,
            '\0' => true,
            _ => false,
        };
        if c == '\0' {
            out.push_str("\\00");
        } else if escape {
            out.push('\\');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dn_escape_leaves_plain_values_untouched() {
        assert_eq!(dn_escape("alice"), "alice");
    }

    #[test]
    fn dn_escape_escapes_special_characters_anywhere() {
        assert_eq!(dn_escape("a,b+c\"d\\e<f>g;h"), r#"a\,b\+c\"d\\e\<f\>g\;h"#);
    }

    #[test]
    fn dn_escape_escapes_leading_and_trailing_space() {
        assert_eq!(dn_escape(" alice "), r"\ alice\ ");
    }

    #[test]
    fn dn_escape_escapes_only_leading_hash() {
        assert_eq!(dn_escape("#a#b"), r"\#a#b");
    }

    #[test]
    fn dn_escape_preserves_multibyte_characters() {
        assert_eq!(dn_escape("Lučić"), "Lučić");
    }

    #[test]
    fn dn_escape_escapes_nul() {
        assert_eq!(dn_escape("a\0b"), r"a\00b");
    }
}
