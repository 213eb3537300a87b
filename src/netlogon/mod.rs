//! Component A: the Netlogon/CLDAP prober.
//!
//! Builds and sends the CLDAP `SearchRequest` that Active Directory answers
//! with a `netlogon` attribute, decodes that reply, and multiplexes many
//! outstanding queries over one UDP socket.

mod query;
mod rfc1035;

pub use query::Prober;

use std::net::IpAddr;
use std::time::Duration;

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// `NETLOGON_SAM_LOGON_RESPONSE_EX` server type flags (`reply.flags`).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ServerFlags: u32 {
        const PDC            = 0x0000_0001;
        const GC              = 0x0000_0004;
        const LDAP             = 0x0000_0008;
        const DS                = 0x0000_0010;
        const KDC                = 0x0000_0020;
        const TIMESERV            = 0x0000_0040;
        const CLOSEST              = 0x0000_0080;
        const WRITABLE               = 0x0000_0100;
        const GOOD_TIMESERV            = 0x0000_0200;
        const NDNC                       = 0x0000_0400;
        const SELECT_SECRET_DOMAIN_6      = 0x0000_0800;
        const FULL_SECRET_DOMAIN_6          = 0x0000_1000;
        const WS                              = 0x0000_2000;
        const DS_8                              = 0x0000_4000;
        const DS_9                                = 0x0000_8000;
    }
}

/// A decoded Netlogon reply plus the bookkeeping the prober attaches once
/// it matches a reply to its outstanding query.
#[derive(Clone, Debug)]
pub struct Reply {
    pub flags: ServerFlags,
    pub domain_guid: [u8; 16],
    pub forest: String,
    pub domain: String,
    pub hostname: String,
    pub netbios_domain: String,
    pub netbios_hostname: String,
    pub user: String,
    pub client_site: String,
    pub server_site: String,

    /// Address the reply arrived from.
    pub address: IpAddr,
    /// Round-trip time from the start of the wave that produced this reply.
    pub rtt: Duration,
}

/// Parse the fixed-layout body of a Netlogon `NETLOGON_SAM_LOGON_RESPONSE_EX`
/// payload (little-endian type/flags, a 16-byte domain GUID, then eight
/// RFC-1035-compressed names).
pub(crate) fn parse_reply_body(buf: &[u8]) -> Result<Reply> {
    if buf.len() < 4 + 4 + 16 {
        return Err(Error::protocol("truncated Netlogon reply"));
    }
    let _opcode = u32::from_le_bytes(buf[0..4].try_into().map_err(|_| Error::protocol("short header"))?);
    let flags_raw = u32::from_le_bytes(buf[4..8].try_into().map_err(|_| Error::protocol("short header"))?);
    let flags = ServerFlags::from_bits_truncate(flags_raw);
    let mut domain_guid = [0u8; 16];
    domain_guid.copy_from_slice(&buf[8..24]);

    let mut offset = 24;
    let mut next = |buf: &[u8], offset: &mut usize| -> Result<String> {
        let (name, end) = rfc1035::decompress_with_end(buf, *offset)?;
        *offset = end;
        Ok(name)
    };
    let forest = next(buf, &mut offset)?;
    let domain = next(buf, &mut offset)?;
    let hostname = next(buf, &mut offset)?;
    let netbios_domain = next(buf, &mut offset)?;
    let netbios_hostname = next(buf, &mut offset)?;
    let user = next(buf, &mut offset)?;
    let client_site = next(buf, &mut offset)?;
    let server_site = next(buf, &mut offset)?;

    Ok(Reply {
        flags,
        domain_guid,
        forest,
        domain,
        hostname,
        netbios_domain,
        netbios_hostname,
        user,
        client_site,
        server_site,
        address: IpAddr::from([0, 0, 0, 0]),
        rtt: Duration::ZERO,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> Vec<u8> {
        if s.is_empty() {
            return vec![0];
        }
        let mut v = vec![s.len() as u8];
        v.extend_from_slice(s.as_bytes());
        v
    }

    #[test]
    fn parses_a_well_formed_reply_body() {
        let mut buf = vec![];
        buf.extend_from_slice(&23u32.to_le_bytes()); // opcode
        buf.extend_from_slice(&(ServerFlags::PDC | ServerFlags::DS).bits().to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        for n in ["example", "org"] {
            buf.extend(label(n));
        }
        buf.push(0); // end of "example.org"
        for n in ["dc1", "example", "org"] {
            buf.extend(label(n));
        }
        buf.push(0);
        for _ in 0..6 {
            buf.push(0); // empty names for the remaining six fields
        }

        let reply = parse_reply_body(&buf).expect("valid reply");
        assert_eq!(reply.forest, "example.org");
        assert_eq!(reply.domain, "dc1.example.org");
        assert!(reply.flags.contains(ServerFlags::PDC));
        assert!(reply.flags.contains(ServerFlags::DS));
        assert!(!reply.flags.contains(ServerFlags::GC));
    }

    #[test]
    fn rejects_too_short_buffer() {
        assert!(parse_reply_body(&[0u8; 10]).is_err());
    }
}
