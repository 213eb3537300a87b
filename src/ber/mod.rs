//! A minimal, hand-rolled BER codec.
//!
//! Full LDAP BER I/O is out of scope for this crate (delegated to
//! [`crate::transport`]); this module exists only because the CLDAP/Netlogon
//! ping (component A) has to build and parse one `SearchRequest` /
//! `SearchResultEntry` pair by hand over UDP, without a general-purpose LDAP
//! library in the loop.
//!
//! The design mirrors the tag/class/payload split of a conventional BER
//! library's structure tag (class, constructed bit, tag number, payload) but
//! is written as ordinary recursive functions rather than parser-combinator
//! macros, since the pack this is grounded in uses a parser-combinator
//! version of `nom` this crate does not depend on.

mod decode;
mod encode;

pub use decode::{decode_tlv, parse_tlv, DecodeError};
pub use encode::{encode_tlv, integer_tlv};

/// BER tag class, per X.690 §8.1.2.2.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Class {
    Universal,
    Application,
    Context,
    Private,
}

impl Class {
    fn from_bits(b: u8) -> Class {
        match b {
            0b00 => Class::Universal,
            0b01 => Class::Application,
            0b10 => Class::Context,
            _ => Class::Private,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Class::Universal => 0b00,
            Class::Application => 0b01,
            Class::Context => 0b10,
            Class::Private => 0b11,
        }
    }
}

/// Universal tag numbers this codec knows how to interpret as primitive
/// values. Anything else decodes as an opaque [`Tlv`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u64)]
pub enum Universal {
    Boolean = 0x01,
    Integer = 0x02,
    OctetString = 0x04,
    Null = 0x05,
    ObjectIdentifier = 0x06,
    Enumerated = 0x0a,
    Sequence = 0x10,
    Set = 0x11,
}

/// One decoded BER tag-length-value: its class, constructed bit, tag
/// number, and payload. Values are interpreted on demand by the `as_*`
/// accessors rather than eagerly, since most of a CLDAP reply's tags are
/// never inspected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tlv {
    pub class: Class,
    pub constructed: bool,
    pub tag: u64,
    pub payload: Vec<u8>,
}

impl Tlv {
    pub fn universal(tag: Universal, constructed: bool, payload: Vec<u8>) -> Tlv {
        Tlv {
            class: Class::Universal,
            constructed,
            tag: tag as u64,
            payload,
        }
    }

    pub fn context(tag: u64, constructed: bool, payload: Vec<u8>) -> Tlv {
        Tlv {
            class: Class::Context,
            constructed,
            tag,
            payload,
        }
    }

    pub fn application(tag: u64, constructed: bool, payload: Vec<u8>) -> Tlv {
        Tlv {
            class: Class::Application,
            constructed,
            tag,
            payload,
        }
    }

    /// Decode this value's payload as a BER `INTEGER`/`ENUMERATED`: a
    /// minimal-length two's-complement big-endian integer.
    pub fn as_integer(&self) -> Result<i64, DecodeError> {
        decode::decode_integer(&self.payload)
    }

    pub fn as_octet_string(&self) -> &[u8] {
        &self.payload
    }

    pub fn as_bool(&self) -> Result<bool, DecodeError> {
        match self.payload.as_slice() {
            [b] => Ok(*b != 0),
            _ => Err(DecodeError::InvalidLength("BOOLEAN")),
        }
    }

    /// Decode this value's payload as the concatenation of further TLVs
    /// (`SEQUENCE`/`SET`).
    pub fn as_elements(&self) -> Result<Vec<Tlv>, DecodeError> {
        let mut elements = Vec::new();
        let mut rest = self.payload.as_slice();
        while !rest.is_empty() {
            let (tlv, remainder) = parse_tlv(rest)?;
            elements.push(tlv);
            rest = remainder;
        }
        Ok(elements)
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_tlv(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(tlv: &Tlv) {
        let bytes = tlv.encode();
        let (decoded, rest) = parse_tlv(&bytes).expect("decodes");
        assert!(rest.is_empty());
        assert_eq!(&decoded, tlv);
    }

    #[test]
    fn boolean_roundtrips() {
        roundtrip(&Tlv::universal(Universal::Boolean, false, vec![0xff]));
        roundtrip(&Tlv::universal(Universal::Boolean, false, vec![0x00]));
    }

    #[test]
    fn small_and_large_integers_roundtrip() {
        for v in [0i64, 1, -1, 127, 128, -128, -129, i64::MAX, i64::MIN] {
            let tlv = encode::integer_tlv(Universal::Integer, v);
            roundtrip(&tlv);
            assert_eq!(tlv.as_integer().expect("valid int"), v);
        }
    }

    #[test]
    fn octet_string_roundtrips() {
        roundtrip(&Tlv::universal(
            Universal::OctetString,
            false,
            b"dc=example,dc=org".to_vec(),
        ));
        roundtrip(&Tlv::universal(Universal::OctetString, false, vec![]));
    }

    #[test]
    fn null_roundtrips() {
        roundtrip(&Tlv::universal(Universal::Null, false, vec![]));
    }

    #[test]
    fn object_identifier_roundtrips_including_first_octet_boundary() {
        // 1.2.840.113556.1.4.319 (the paged-results control OID) exercises
        // the 40*x+y first-octet packing with x=1.
        let oid = encode::encode_oid(&[1, 2, 840, 113556, 1, 4, 319]);
        let tlv = Tlv::universal(Universal::ObjectIdentifier, false, oid);
        roundtrip(&tlv);
        assert_eq!(
            decode::decode_oid(&tlv.payload).expect("valid oid"),
            vec![1, 2, 840, 113556, 1, 4, 319]
        );

        // 2.5.4.3 (cn) exercises x=2, the other side of the 39/40 boundary.
        let oid2 = encode::encode_oid(&[2, 5, 4, 3]);
        assert_eq!(decode::decode_oid(&oid2).expect("valid oid"), vec![2, 5, 4, 3]);
    }

    #[test]
    fn enumerated_roundtrips() {
        let tlv = encode::integer_tlv(Universal::Enumerated, 2);
        roundtrip(&tlv);
    }

    #[test]
    fn sequence_and_set_roundtrip() {
        let inner = Tlv::universal(Universal::Integer, false, vec![0x05]);
        let seq = Tlv::universal(Universal::Sequence, true, inner.encode());
        roundtrip(&seq);
        assert_eq!(seq.as_elements().expect("valid elements"), vec![inner.clone()]);

        let set = Tlv::universal(Universal::Set, true, inner.encode());
        roundtrip(&set);
    }

    #[test]
    fn long_tag_number_roundtrips() {
        let tlv = Tlv::context(31, false, vec![1, 2, 3]);
        roundtrip(&tlv);
        let tlv = Tlv::application(200, true, vec![0xaa; 10]);
        roundtrip(&tlv);
    }

    #[test]
    fn long_length_form_roundtrips() {
        let tlv = Tlv::universal(Universal::OctetString, false, vec![0x41; 200]);
        roundtrip(&tlv);
        let tlv = Tlv::universal(Universal::OctetString, false, vec![0x41; 70_000]);
        roundtrip(&tlv);
    }
}
