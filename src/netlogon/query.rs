//! The UDP multiplexer: builds CLDAP `SearchRequest`s, sends them all on one
//! unbound socket, and demultiplexes replies by message id and source
//! address. Grounded in the original implementation's `netlogon.Client`,
//! translated from its select-loop-plus-retry-waves into one async task per
//! `call`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::ber::{Class, Tlv, Universal};
use crate::error::{Error, Result};
use crate::netlogon::{parse_reply_body, Reply};

const BUFSIZE: usize = 8192;
const NT_VERSION: [u8; 4] = [0x06, 0x00, 0x00, 0x00];

/// A single-socket CLDAP Netlogon prober.
///
/// One `Prober` can drive many outstanding queries concurrently (it batches
/// everything it's told about into waves, per the original `Client.call`
/// semantics): queue queries with [`Prober::query`], then call
/// [`Prober::probe`] once to send, wait and retry.
pub struct Prober {
    queries: Vec<(SocketAddr, String, String)>,
    next_msgid: i32,
}

impl Default for Prober {
    fn default() -> Prober {
        Prober::new()
    }
}

impl Prober {
    pub fn new() -> Prober {
        Prober {
            queries: Vec::new(),
            next_msgid: rand::thread_rng().gen_range(0..i32::MAX),
        }
    }

    /// Queue a CLDAP query for `domain` at `addr`, claiming to be
    /// `client_hostname`.
    pub fn query(&mut self, addr: SocketAddr, domain: &str, client_hostname: &str) {
        self.queries
            .push((addr, domain.to_string(), client_hostname.to_string()));
    }

    fn next_msgid(&mut self) -> i32 {
        let id = self.next_msgid;
        self.next_msgid = self.next_msgid.wrapping_add(1);
        id
    }

    /// Send every queued query, wait up to `timeout` per wave, retrying
    /// unanswered queries up to `retries` times with a fresh message id
    /// each wave. Consumes the queue.
    pub async fn probe(&mut self, wave_timeout: Duration, retries: u32) -> Result<Vec<Reply>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::transport(format!("binding CLDAP socket: {e}")))?;

        let mut pending = std::mem::take(&mut self.queries);
        let mut replies = Vec::new();

        for wave in 0..retries {
            if pending.is_empty() {
                break;
            }
            // key: (msgid, source addr) -> index into `pending`
            let mut outstanding: HashMap<(i32, SocketAddr), usize> = HashMap::new();
            for (i, (addr, domain, hostname)) in pending.iter().enumerate() {
                let msgid = self.next_msgid();
                let packet = build_search_request(msgid, domain, hostname);
                match socket.send_to(&packet, *addr).await {
                    Ok(_) => {
                        outstanding.insert((msgid, *addr), i);
                    }
                    Err(e) => warn!(?addr, error = %e, "failed to send CLDAP probe"),
                }
            }
            trace!(wave, outstanding = outstanding.len(), "CLDAP wave sent");

            let wave_start = Instant::now();
            let mut buf = vec![0u8; BUFSIZE];
            let mut answered = Vec::new();
            loop {
                let remaining = wave_timeout.saturating_sub(wave_start.elapsed());
                if remaining.is_zero() || outstanding.is_empty() {
                    break;
                }
                let recv = timeout(remaining, socket.recv_from(&mut buf)).await;
                let (n, src) = match recv {
                    Ok(Ok(pair)) => pair,
                    Ok(Err(_)) | Err(_) => break,
                };
                let msgid = match parse_message_header(&buf[..n]) {
                    Some(id) => id,
                    None => continue, // malformed datagram: silently dropped
                };
                let idx = match outstanding.get(&(msgid, src)) {
                    Some(&idx) => idx,
                    None => continue, // unmatched: silently dropped
                };
                let netlogon_bytes = match extract_netlogon_attribute(&buf[..n]) {
                    Some(b) => b,
                    None => continue,
                };
                let reply = match parse_reply_body(&netlogon_bytes) {
                    Ok(mut r) => {
                        r.address = addr_ip(src);
                        r.rtt = wave_start.elapsed();
                        r
                    }
                    Err(e) => {
                        debug!(error = %e, "dropping malformed Netlogon reply");
                        continue;
                    }
                };
                outstanding.remove(&(msgid, src));
                answered.push(idx);
                replies.push(reply);
            }
            answered.sort_unstable();
            for idx in answered.into_iter().rev() {
                pending.remove(idx);
            }
        }
        Ok(replies)
    }
}

fn addr_ip(addr: SocketAddr) -> IpAddr {
    addr.ip()
}

/// Parse just enough of an LDAPMessage to recover its `messageID`: a
/// `SEQUENCE { messageID INTEGER, ... }`.
fn parse_message_header(buf: &[u8]) -> Option<i32> {
    let msg = crate::ber::decode_tlv(buf).ok()?;
    let mut elements = msg.as_elements().ok()?;
    if elements.is_empty() {
        return None;
    }
    let msgid_tlv = elements.remove(0);
    let msgid = msgid_tlv.as_integer().ok()?;
    i32::try_from(msgid).ok()
}

/// Walk an LDAPMessage looking for a `SearchResultEntry`'s `netlogon`
/// attribute value.
fn extract_netlogon_attribute(buf: &[u8]) -> Option<Vec<u8>> {
    let msg = crate::ber::decode_tlv(buf).ok()?;
    let elements = msg.as_elements().ok()?;
    let protocol_op = elements.into_iter().nth(1)?;
    if protocol_op.class != Class::Application || protocol_op.tag != 4 {
        return None; // not a SearchResultEntry
    }
    let mut entry_fields = protocol_op.as_elements().ok()?;
    if entry_fields.len() < 2 {
        return None;
    }
    let attributes = entry_fields.remove(1);
    for attr in attributes.as_elements().ok()? {
        let mut fields = attr.as_elements().ok()?;
        if fields.len() != 2 {
            continue;
        }
        let vals = fields.remove(1);
        let attr_type = fields.remove(0);
        let name = String::from_utf8_lossy(attr_type.as_octet_string());
        if name.eq_ignore_ascii_case("netlogon") {
            let first_val = vals.as_elements().ok()?.into_iter().next()?;
            return Some(first_val.as_octet_string().to_vec());
        }
    }
    None
}

/// Build the CLDAP `SearchRequest` LDAPMessage:
/// `(&(DnsDomain=<domain>)(Host=<hostname>)(NtVer=\06\00\00\00))`,
/// scope base, attribute list `(Netlogon)`.
fn build_search_request(msgid: i32, domain: &str, hostname: &str) -> Vec<u8> {
    let base = Tlv::universal(Universal::OctetString, false, vec![]);
    let scope = Tlv::universal(Universal::Enumerated, false, vec![0]); // baseObject
    let deref_aliases = Tlv::universal(Universal::Enumerated, false, vec![0]); // neverDerefAliases
    let size_limit = crate::ber::integer_tlv(Universal::Integer, 0);
    let time_limit = crate::ber::integer_tlv(Universal::Integer, 0);
    let types_only = Tlv::universal(Universal::Boolean, false, vec![0]);

    let filter = equality_filter_and(&[
        ("DnsDomain", domain.as_bytes().to_vec()),
        ("Host", hostname.as_bytes().to_vec()),
        ("NtVer", NT_VERSION.to_vec()),
    ]);

    let attributes = Tlv::universal(
        Universal::Sequence,
        true,
        Tlv::universal(Universal::OctetString, false, b"Netlogon".to_vec()).encode(),
    );

    let mut body = Vec::new();
    body.extend(base.encode());
    body.extend(scope.encode());
    body.extend(deref_aliases.encode());
    body.extend(size_limit.encode());
    body.extend(time_limit.encode());
    body.extend(types_only.encode());
    body.extend(filter.encode());
    body.extend(attributes.encode());
    let search_request = Tlv::application(3, true, body);

    let msgid_tlv = crate::ber::integer_tlv(Universal::Integer, msgid as i64);
    let mut message_body = Vec::new();
    message_body.extend(msgid_tlv.encode());
    message_body.extend(search_request.encode());
    Tlv::universal(Universal::Sequence, true, message_body).encode()
}

fn equality_filter_and(pairs: &[(&str, Vec<u8>)]) -> Tlv {
    let mut set_payload = Vec::new();
    for (attr, value) in pairs {
        let inner = Tlv::universal(Universal::OctetString, false, attr.as_bytes().to_vec()).encode();
        let mut pair_body = inner;
        pair_body.extend(Tlv::universal(Universal::OctetString, false, value.clone()).encode());
        let equality_match = Tlv::context(3, true, pair_body); // [3] equalityMatch
        set_payload.extend(equality_match.encode());
    }
    Tlv::context(0, true, set_payload) // [0] and
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_request_round_trips_through_the_ber_decoder() {
        let packet = build_search_request(42, "example.org", "probe-host");
        let msg = crate::ber::decode_tlv(&packet).expect("valid BER");
        let elements = msg.as_elements().expect("sequence");
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].as_integer().expect("int"), 42);
        assert_eq!(elements[1].class, Class::Application);
        assert_eq!(elements[1].tag, 3);
    }

    #[test]
    fn message_header_parses_message_id() {
        let packet = build_search_request(7, "example.org", "h");
        assert_eq!(parse_message_header(&packet), Some(7));
    }
}
