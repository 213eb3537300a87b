//! RFC 1035 §4.1.4 name compression, decoder side only — Netlogon replies
//! never ask us to compress a name ourselves.

use crate::error::{Error, Result};

/// Decompress one RFC-1035 name starting at `offset` within `buf`, the way
/// the Netlogon reply's `forest`/`domain`/`hostname`/... fields encode
/// them: a sequence of length-prefixed labels terminated by a zero octet or
/// a compression pointer to an earlier position in the same buffer.
///
/// A pointer may point anywhere earlier in `buf`, including into another
/// pointer's target, but must never repeat a position already visited —
/// visiting it twice proves a cycle, which this function rejects rather
/// than loop forever on a hostile or corrupt datagram.
pub fn decompress(buf: &[u8], offset: usize) -> Result<String> {
    let mut visited = Vec::new();
    let mut labels = Vec::new();
    decompress_at(buf, offset, &mut visited, &mut labels)?;
    Ok(labels.join("."))
}

/// Like [`decompress`], but also returns the offset immediately after the
/// name as it was first encountered (i.e. not following into a pointer),
/// which the caller needs to keep decoding the rest of the buffer.
pub fn decompress_with_end(buf: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut visited = Vec::new();
    let mut labels = Vec::new();
    let end = decompress_at(buf, offset, &mut visited, &mut labels)?;
    Ok((labels.join("."), end))
}

/// Returns the offset just past this name's own encoding (the byte after
/// the terminating zero octet or two-byte pointer), regardless of how deep
/// label-following recursion went.
fn decompress_at(buf: &[u8], offset: usize, visited: &mut Vec<usize>, labels: &mut Vec<String>) -> Result<usize> {
    let mut pos = offset;
    loop {
        let tag = *buf
            .get(pos)
            .ok_or_else(|| Error::protocol("truncated RFC-1035 name"))?;
        if tag == 0 {
            return Ok(pos + 1);
        } else if tag & 0xc0 == 0xc0 {
            let second = *buf
                .get(pos + 1)
                .ok_or_else(|| Error::protocol("truncated RFC-1035 pointer"))?;
            let ptr = (((tag & !0xc0) as usize) << 8) | second as usize;
            if visited.contains(&ptr) {
                return Err(Error::protocol("cyclic RFC-1035 pointer"));
            }
            visited.push(ptr);
            decompress_at(buf, ptr, visited, labels)?;
            return Ok(pos + 2);
        } else if tag & 0xc0 != 0 {
            return Err(Error::protocol("illegal RFC-1035 label tag"));
        } else {
            let len = tag as usize;
            let start = pos + 1;
            let end = start + len;
            let label = buf
                .get(start..end)
                .ok_or_else(|| Error::protocol("truncated RFC-1035 label"))?;
            labels.push(String::from_utf8_lossy(label).into_owned());
            pos = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> Vec<u8> {
        let mut v = vec![s.len() as u8];
        v.extend_from_slice(s.as_bytes());
        v
    }

    #[test]
    fn decodes_uncompressed_name() {
        let mut buf = label("example");
        buf.extend(label("org"));
        buf.push(0);
        assert_eq!(decompress(&buf, 0).expect("decodes"), "example.org");
    }

    #[test]
    fn follows_a_single_pointer() {
        let mut buf = label("example");
        buf.extend(label("org"));
        buf.push(0);
        let dc_offset = buf.len() as u8;
        buf.push(3);
        buf.extend_from_slice(b"dc1");
        buf.push(0xc0);
        buf.push(0); // points at offset 0 ("example.org")
        assert_eq!(decompress(&buf, dc_offset as usize).expect("decodes"), "dc1.example.org");
    }

    #[test]
    fn rejects_cyclic_pointer() {
        // Pointer at offset 0 pointing right back at offset 0.
        let buf = vec![0xc0, 0x00];
        let err = decompress(&buf, 0).expect_err("must reject cycle");
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn rejects_illegal_tag() {
        let buf = vec![0x80, 0x00];
        assert!(decompress(&buf, 0).is_err());
    }

    #[test]
    fn rejects_truncated_label() {
        let buf = vec![5, b'a', b'b'];
        assert!(decompress(&buf, 0).is_err());
    }
}
