//! Client-session payloads of the `smtpd` daemon
//!
//! Four shapes: `connect from h[ip]`, `disconnect from h[ip]` (newer MTAs
//! append per-command statistics, which are tolerated and ignored),
//! `QUEUE: client=h[ip]` and `QUEUE: reject: ...`.

use crate::scan::{parse_ip, to_str, Scanner};
use crate::Payload;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpdConnect {
    pub host: String,
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpdDisconnect {
    pub host: String,
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpdMailAccepted {
    pub host: String,
    pub ip: Option<IpAddr>,
    pub queue: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpdReject {
    /// Usually the literal `NOQUEUE`
    pub queue: String,
    pub extra: String,
}

pub(crate) fn parse_smtpd(payload: &[u8]) -> Option<Payload> {
    if let Some((host, ip)) = parse_peer(payload, b"connect from ") {
        return Some(Payload::SmtpdConnect(SmtpdConnect { host, ip }));
    }

    if let Some((host, ip)) = parse_peer(payload, b"disconnect from ") {
        return Some(Payload::SmtpdDisconnect(SmtpdDisconnect { host, ip }));
    }

    let mut s = Scanner::new(payload);
    let queue = to_str(s.take_while(|b| b.is_ascii_alphanumeric())?)?.to_owned();
    s.tag(b": ")?;

    if s.starts_with(b"client=") {
        s.tag(b"client=")?;
        let (host, ip) = parse_host_ip(&mut s)?;
        return Some(Payload::SmtpdMailAccepted(SmtpdMailAccepted {
            host,
            ip,
            queue,
        }));
    }

    if s.starts_with(b"reject: ") {
        s.tag(b"reject: ")?;
        return Some(Payload::SmtpdReject(SmtpdReject {
            queue,
            extra: to_str(s.rest())?.to_owned(),
        }));
    }

    None
}

fn parse_peer(payload: &[u8], prefix: &[u8]) -> Option<(String, Option<IpAddr>)> {
    let mut s = Scanner::new(payload);
    s.tag(prefix)?;
    parse_host_ip(&mut s)
}

// `hostname[ip]`, where either side may be the literal `unknown`;
// trailing content after the bracket is ignored
fn parse_host_ip(s: &mut Scanner) -> Option<(String, Option<IpAddr>)> {
    let host = to_str(s.until(b'[')?)?.to_owned();
    s.eat(b'[')?;
    let ip = parse_ip(s.until_maybe_empty(b']')?)?;
    s.eat(b']')?;
    Some((host, ip))
}
