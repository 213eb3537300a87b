use super::{Class, Tlv};

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated BER value")]
    Truncated,
    #[error("unsupported indefinite length")]
    IndefiniteLength,
    #[error("invalid length for {0}")]
    InvalidLength(&'static str),
    #[error("non-minimal integer encoding")]
    NonMinimalInteger,
    #[error("malformed object identifier")]
    MalformedOid,
}

/// Parse exactly one TLV from the front of `buf`, returning it and the
/// unconsumed remainder.
pub fn parse_tlv(buf: &[u8]) -> Result<(Tlv, &[u8]), DecodeError> {
    let (class, constructed, tag, rest) = parse_identifier(buf)?;
    let (len, rest) = parse_length(rest)?;
    if rest.len() < len {
        return Err(DecodeError::Truncated);
    }
    let (payload, rest) = rest.split_at(len);
    Ok((
        Tlv {
            class,
            constructed,
            tag,
            payload: payload.to_vec(),
        },
        rest,
    ))
}

/// Parse exactly one TLV, requiring it to consume the entire buffer.
pub fn decode_tlv(buf: &[u8]) -> Result<Tlv, DecodeError> {
    let (tlv, rest) = parse_tlv(buf)?;
    if !rest.is_empty() {
        return Err(DecodeError::InvalidLength("trailing bytes after TLV"));
    }
    Ok(tlv)
}

fn parse_identifier(buf: &[u8]) -> Result<(Class, bool, u64, &[u8]), DecodeError> {
    let (&first, rest) = buf.split_first().ok_or(DecodeError::Truncated)?;
    let class = Class::from_bits(first >> 6);
    let constructed = first & 0x20 != 0;
    let low = first & 0x1f;
    if low < 31 {
        return Ok((class, constructed, low as u64, rest));
    }
    let mut tag: u64 = 0;
    let mut cursor = rest;
    loop {
        let (&b, remainder) = cursor.split_first().ok_or(DecodeError::Truncated)?;
        tag = (tag << 7) | (b & 0x7f) as u64;
        cursor = remainder;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok((class, constructed, tag, cursor))
}

fn parse_length(buf: &[u8]) -> Result<(usize, &[u8]), DecodeError> {
    let (&first, rest) = buf.split_first().ok_or(DecodeError::Truncated)?;
    if first & 0x80 == 0 {
        return Ok((first as usize, rest));
    }
    let n = (first & 0x7f) as usize;
    if n == 0 {
        return Err(DecodeError::IndefiniteLength);
    }
    if rest.len() < n {
        return Err(DecodeError::Truncated);
    }
    let (len_bytes, rest) = rest.split_at(n);
    let mut len: usize = 0;
    for &b in len_bytes {
        len = len
            .checked_shl(8)
            .and_then(|v| v.checked_add(b as usize))
            .ok_or(DecodeError::InvalidLength("length overflow"))?;
    }
    Ok((len, rest))
}

/// Decode a minimal-length two's-complement big-endian integer, as used by
/// BER's `INTEGER` and `ENUMERATED`.
pub fn decode_integer(bytes: &[u8]) -> Result<i64, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::InvalidLength("INTEGER"));
    }
    if bytes.len() > 1 {
        let (first, second) = (bytes[0], bytes[1]);
        let redundant = (first == 0x00 && second & 0x80 == 0) || (first == 0xff && second & 0x80 != 0);
        if redundant {
            return Err(DecodeError::NonMinimalInteger);
        }
    }
    if bytes.len() > 8 {
        return Err(DecodeError::InvalidLength("INTEGER too wide for i64"));
    }
    let negative = bytes[0] & 0x80 != 0;
    let mut buf = [if negative { 0xff } else { 0x00 }; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    Ok(i64::from_be_bytes(buf))
}

/// Decode a BER object identifier payload into its arc sequence.
pub fn decode_oid(bytes: &[u8]) -> Result<Vec<u64>, DecodeError> {
    let (&first, rest) = bytes.split_first().ok_or(DecodeError::MalformedOid)?;
    let (x, y) = if first < 40 {
        (0u64, first as u64)
    } else if first < 80 {
        (1, (first - 40) as u64)
    } else {
        (2, (first - 80) as u64)
    };
    let mut arcs = vec![x, y];
    let mut value: u64 = 0;
    let mut any = false;
    for &b in rest {
        any = true;
        value = (value << 7) | (b & 0x7f) as u64;
        if b & 0x80 == 0 {
            arcs.push(value);
            value = 0;
            any = false;
        }
    }
    if any {
        return Err(DecodeError::MalformedOid);
    }
    Ok(arcs)
}
