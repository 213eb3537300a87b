use super::{Class, Tlv, Universal};

/// Encode one TLV: identifier octet(s), length octet(s), payload.
pub fn encode_tlv(tlv: &Tlv) -> Vec<u8> {
    let mut out = Vec::with_capacity(tlv.payload.len() + 8);
    encode_identifier(&mut out, tlv.class, tlv.constructed, tlv.tag);
    encode_length(&mut out, tlv.payload.len());
    out.extend_from_slice(&tlv.payload);
    out
}

fn encode_identifier(out: &mut Vec<u8>, class: Class, constructed: bool, tag: u64) {
    let class_bits = class.bits() << 6;
    let constructed_bit = if constructed { 0x20 } else { 0x00 };
    if tag < 31 {
        out.push(class_bits | constructed_bit | tag as u8);
        return;
    }
    out.push(class_bits | constructed_bit | 0x1f);
    // Base-128, most significant group first, continuation bit set on all
    // but the last octet.
    let mut groups = Vec::new();
    let mut v = tag;
    loop {
        groups.push((v & 0x7f) as u8);
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    for (i, g) in groups.iter().rev().enumerate() {
        let last = i == groups.len() - 1;
        out.push(if last { *g } else { g | 0x80 });
    }
}

fn encode_length(out: &mut Vec<u8>, len: usize) {
    if len < 128 {
        out.push(len as u8);
        return;
    }
    let mut bytes = Vec::new();
    let mut v = len;
    while v > 0 {
        bytes.push((v & 0xff) as u8);
        v >>= 8;
    }
    bytes.reverse();
    out.push(0x80 | bytes.len() as u8);
    out.extend_from_slice(&bytes);
}

/// Minimal-length two's-complement big-endian encoding of `v`, the form
/// BER requires for `INTEGER`/`ENUMERATED`.
pub fn encode_integer_bytes(v: i64) -> Vec<u8> {
    if v == 0 {
        return vec![0];
    }
    let mut bytes = v.to_be_bytes().to_vec();
    // Drop leading octets that are redundant: all 0x00 followed by a byte
    // whose high bit is 0, or all 0xff followed by a byte whose high bit is 1.
    while bytes.len() > 1 {
        let (first, second) = (bytes[0], bytes[1]);
        if first == 0x00 && second & 0x80 == 0 {
            bytes.remove(0);
        } else if first == 0xff && second & 0x80 != 0 {
            bytes.remove(0);
        } else {
            break;
        }
    }
    bytes
}

pub fn integer_tlv(tag: Universal, v: i64) -> Tlv {
    Tlv::universal(tag, false, encode_integer_bytes(v))
}

/// Encode an object identifier's arc sequence into BER's packed form: the
/// first two arcs collapse into one octet as `40*x + y`, remaining arcs are
/// each base-128 with continuation bits.
pub fn encode_oid(arcs: &[u64]) -> Vec<u8> {
    assert!(arcs.len() >= 2, "an OID needs at least two arcs");
    let mut out = Vec::new();
    out.push((arcs[0] * 40 + arcs[1]) as u8);
    for &arc in &arcs[2..] {
        let mut groups = Vec::new();
        let mut v = arc;
        loop {
            groups.push((v & 0x7f) as u8);
            v >>= 7;
            if v == 0 {
                break;
            }
        }
        for (i, g) in groups.iter().rev().enumerate() {
            let last = i == groups.len() - 1;
            out.push(if last { *g } else { g | 0x80 });
        }
    }
    out
}
