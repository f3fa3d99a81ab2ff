//! Sent-status payloads of the `smtp` and `lmtp` delivery agents
//!
//! `QUEUE: to=<user@domain>, orig_to=<user@domain>, relay=R, delay=F,
//! delays=a/b/c/d, dsn=D, status=S extra...` where `orig_to` is optional
//! and the relay is `name[ip]:port`, `name[/unix/socket]` or the literal
//! `none`.

use crate::scan::{is_digit, is_queue_char, parse_f32, parse_f64, parse_u64, to_str, Scanner};
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAddress {
    pub local: String,
    pub domain: String,
}

/// Next-hop relay. `ip`/`port` and `path` are mutually exclusive; a relay
/// logged as `none` is represented as `Option::<Relay>::None` by the
/// payload carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relay {
    pub name: String,
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delays {
    pub smtpd: f32,
    pub cleanup: f32,
    pub qmgr: f32,
    pub smtp: f32,
}

/// Delivery attempt outcome. The integer values are durable: they are
/// what the delivery database stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpStatus {
    Sent,
    Bounced,
    Deferred,
    /// Synthetic: the queue manager gave up and returned the message.
    /// Never produced by the parser itself.
    Expired,
}

impl SmtpStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            SmtpStatus::Sent => 0,
            SmtpStatus::Bounced => 1,
            SmtpStatus::Deferred => 2,
            SmtpStatus::Expired => 3,
        }
    }

    pub fn from_i64(v: i64) -> Option<SmtpStatus> {
        match v {
            0 => Some(SmtpStatus::Sent),
            1 => Some(SmtpStatus::Bounced),
            2 => Some(SmtpStatus::Deferred),
            3 => Some(SmtpStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for SmtpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SmtpStatus::Sent => "sent",
            SmtpStatus::Bounced => "bounced",
            SmtpStatus::Deferred => "deferred",
            SmtpStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Inner payload of a `sent` status of the form
/// `(250 2.0.0 from MTA(smtp:[127.0.0.1]:10025): 250 2.0.0 Ok: queued as QUEUE)`,
/// logged when the message was handed to another local MTA instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentQueued {
    pub smtp_code: u16,
    pub dsn: String,
    pub ip: IpAddr,
    pub port: u16,
    pub queue: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmtpSentStatus {
    pub queue: String,
    pub recipient: MailAddress,
    pub orig_recipient: Option<MailAddress>,
    pub relay: Option<Relay>,
    pub delay: f64,
    pub delays: Delays,
    pub dsn: String,
    pub status: SmtpStatus,
    pub extra_message: String,
    pub extra_payload: Option<SentQueued>,
}

pub(crate) fn parse_sent_status(payload: &[u8]) -> Option<SmtpSentStatus> {
    let mut s = Scanner::new(payload);

    let queue = to_str(s.take_while(is_queue_char)?)?.to_owned();
    s.tag(b": ")?;

    s.tag(b"to=<")?;
    let recipient = parse_bracketed_address(&mut s)?;
    s.tag(b", ")?;

    let orig_recipient = if s.starts_with(b"orig_to=<") {
        s.tag(b"orig_to=<")?;
        let addr = parse_bracketed_address(&mut s)?;
        s.tag(b", ")?;
        Some(addr)
    } else {
        None
    };

    s.tag(b"relay=")?;
    let relay = parse_relay(&mut s)?;

    s.tag(b", delay=")?;
    let delay = parse_f64(s.until(b',')?)?;

    s.tag(b", delays=")?;
    let smtpd = parse_f32(s.until(b'/')?)?;
    s.eat(b'/')?;
    let cleanup = parse_f32(s.until(b'/')?)?;
    s.eat(b'/')?;
    let qmgr = parse_f32(s.until(b'/')?)?;
    s.eat(b'/')?;
    let smtp = parse_f32(s.until(b',')?)?;

    s.tag(b", dsn=")?;
    let dsn = to_str(s.until(b',')?)?.to_owned();

    s.tag(b", status=")?;
    let status = match s.take_while(|b| b.is_ascii_lowercase())? {
        b"sent" => SmtpStatus::Sent,
        b"bounced" => SmtpStatus::Bounced,
        b"deferred" => SmtpStatus::Deferred,
        _ => return None,
    };

    let extra_message = if s.done() {
        String::new()
    } else {
        s.eat(b' ')?;
        to_str(s.rest())?.to_owned()
    };

    let extra_payload = match status {
        SmtpStatus::Sent => parse_sent_queued(extra_message.as_bytes()),
        _ => None,
    };

    Some(SmtpSentStatus {
        queue,
        recipient,
        orig_recipient,
        relay,
        delay,
        delays: Delays {
            smtpd,
            cleanup,
            qmgr,
            smtp,
        },
        dsn,
        status,
        extra_message,
        extra_payload,
    })
}

// `user@domain>`; quotes around the local part are stripped, whitespace
// inside them is preserved
fn parse_bracketed_address(s: &mut Scanner) -> Option<MailAddress> {
    let raw = s.until(b'>')?;
    s.eat(b'>')?;

    let at = raw.iter().position(|&b| b == b'@')?;
    let (local, domain) = (&raw[..at], &raw[at + 1..]);

    if local.is_empty() || domain.is_empty() {
        return None;
    }

    let local = to_str(local)?;
    let local = local
        .strip_prefix('"')
        .and_then(|l| l.strip_suffix('"'))
        .unwrap_or(local);

    Some(MailAddress {
        local: local.to_owned(),
        domain: to_str(domain)?.to_owned(),
    })
}

fn parse_relay(s: &mut Scanner) -> Option<Option<Relay>> {
    if s.starts_with(b"none") {
        s.tag(b"none")?;
        return Some(None);
    }

    let name = to_str(s.take_while(|b| b != b'[' && b != b',')?)?.to_owned();
    s.eat(b'[')?;
    let inner = s.until_maybe_empty(b']')?;
    s.eat(b']')?;

    if inner.starts_with(b"/") {
        return Some(Some(Relay {
            name,
            ip: None,
            port: None,
            path: Some(to_str(inner)?.to_owned()),
        }));
    }

    let ip = crate::scan::parse_ip(inner)?;
    s.eat(b':')?;
    let port = parse_u64(s.take_while(is_digit)?)?;
    if port > u16::MAX as u64 {
        return None;
    }

    Some(Some(Relay {
        name,
        ip,
        port: Some(port as u16),
        path: None,
    }))
}

// the code and dsn are taken from the beginning of the message, as the
// values near the end are hard-coded by the MTA
fn parse_sent_queued(extra: &[u8]) -> Option<SentQueued> {
    let mut s = Scanner::new(extra);

    s.eat(b'(')?;
    let smtp_code = parse_u64(s.take_while(is_digit)?)?;
    if smtp_code > u16::MAX as u64 {
        return None;
    }
    s.eat(b' ')?;
    let dsn = to_str(s.take_while(|b| is_digit(b) || b == b'.')?)?.to_owned();

    s.tag(b" from MTA(smtp:[")?;
    let ip: IpAddr = to_str(s.until(b']')?)?.parse().ok()?;
    s.tag(b"]:")?;
    let port = parse_u64(s.take_while(is_digit)?)?;
    if port > u16::MAX as u64 {
        return None;
    }
    s.tag(b"): ")?;

    let rest = s.rest();
    let marker = b"queued as ";
    let at = rest
        .windows(marker.len())
        .position(|w| w == marker)?;

    let mut q = Scanner::new(&rest[at + marker.len()..]);
    let queue = to_str(q.take_while(is_queue_char)?)?.to_owned();
    q.eat(b')')?;

    Some(SentQueued {
        smtp_code: smtp_code as u16,
        dsn,
        ip,
        port: port as u16,
        queue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse, Payload};

    fn sent_status(line: &str) -> SmtpSentStatus {
        match parse(line.as_bytes(), 2020).expect("line must parse").payload {
            Payload::SmtpSentStatus(p) => p,
            other => panic!("not a sent status: {:?}", other),
        }
    }

    #[test]
    fn basic_deferred_status() {
        let p = sent_status(
            "Jun 16 00:07:43 smtpnode07 postfix-10.20.30.40/smtp[3022]: \
             0C31D3D1E6: to=<redacted@aol.com>, relay=mx-aol.mail.gm0.yahoodns.net[11.22.33.44]:25, \
             delay=18910, delays=18900/8.9/0.69/0.03, dsn=4.7.0, status=deferred \
             (host mx-aol.mail.gm0.yahoodns.net[11.22.33.44] said: 421 4.7.0 [TSS04] \
             Messages from 10.20.30.40 temporarily deferred due to user complaints - 4.16.55.1; \
             see https://help.yahoo.com/kb/postmaster/SLN3434.html (in reply to MAIL FROM command))",
        );

        assert_eq!(p.queue, "0C31D3D1E6");
        assert_eq!(p.recipient.local, "redacted");
        assert_eq!(p.recipient.domain, "aol.com");

        let relay = p.relay.expect("relay must be present");
        assert_eq!(relay.name, "mx-aol.mail.gm0.yahoodns.net");
        assert_eq!(relay.ip, Some("11.22.33.44".parse().unwrap()));
        assert_eq!(relay.port, Some(25));
        assert_eq!(relay.path, None);

        assert_eq!(p.delay, 18910.0);
        assert_eq!(p.delays.smtpd, 18900.0);
        assert_eq!(p.delays.cleanup, 8.9);
        assert_eq!(p.delays.qmgr, 0.69);
        assert_eq!(p.delays.smtp, 0.03);
        assert_eq!(p.dsn, "4.7.0");
        assert_eq!(p.status, SmtpStatus::Deferred);
        assert!(p.extra_message.starts_with("(host mx-aol"));
        assert_eq!(p.extra_payload, None);
    }

    #[test]
    fn quoted_local_part_preserves_inner_whitespace() {
        let p = sent_status(
            "Jul  5 17:24:35 mail postfix/smtp[9635]: D298F2C60812: to=<\"user 1234 with space\"@icloud.com>, \
             relay=mx6.mail.icloud.com[17.178.97.79]:25, delay=428621, delays=428619/0.02/1.9/0, \
             dsn=4.7.0, status=deferred (host mx6.mail.icloud.com[17.178.97.79] \
             refused to talk to me: 550 5.7.0 Blocked)",
        );

        assert_eq!(p.recipient.local, "user 1234 with space");
        assert_eq!(p.recipient.domain, "icloud.com");
        assert_eq!(p.delays.smtp, 0.0);
    }

    #[test]
    fn bounced_with_no_relay() {
        let p = sent_status(
            "Aug  3 04:41:17 mail postfix/smtp[10603]: AE8E32C60819: to=<mail@e.mail.com>, \
             relay=none, delay=0.02, delays=0.01/0/0.01/0, dsn=5.4.4, status=bounced \
             (Host or domain name not found. Name service error for name=e.mail.com type=AAAA: Host not found)",
        );

        assert_eq!(p.queue, "AE8E32C60819");
        assert_eq!(p.relay, None);
        assert_eq!(p.orig_recipient, None);
        assert_eq!(p.delay, 0.02);
        assert_eq!(p.dsn, "5.4.4");
        assert_eq!(p.status, SmtpStatus::Bounced);
    }

    #[test]
    fn orig_to_and_queued_as_extra_payload() {
        let p = sent_status(
            "May  5 00:00:00 mail postfix/smtp[17709]: AB5501855DA0: to=<to@mail.com>, \
             orig_to=<orig_to@example.com>, relay=127.0.0.1[127.0.0.1]:10024, delay=0.87, delays=0.68/0.01/0/0.18, \
             dsn=2.0.0, status=sent (250 2.0.0 from MTA(smtp:[127.0.0.1]:10025): 250 2.0.0 Ok: queued as 2F01D1855DB2)",
        );

        assert_eq!(p.queue, "AB5501855DA0");
        assert_eq!(p.recipient.local, "to");
        assert_eq!(p.recipient.domain, "mail.com");

        let orig = p.orig_recipient.expect("orig_to must be present");
        assert_eq!(orig.local, "orig_to");
        assert_eq!(orig.domain, "example.com");

        assert_eq!(p.status, SmtpStatus::Sent);
        assert_eq!(
            p.extra_message,
            "(250 2.0.0 from MTA(smtp:[127.0.0.1]:10025): 250 2.0.0 Ok: queued as 2F01D1855DB2)"
        );

        let e = p.extra_payload.expect("extra payload must parse");
        assert_eq!(e.smtp_code, 250);
        assert_eq!(e.dsn, "2.0.0");
        assert_eq!(e.ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(e.port, 10025);
        assert_eq!(e.queue, "2F01D1855DB2");
    }

    #[test]
    fn lmtp_delivery_over_a_unix_socket() {
        let p = sent_status(
            "Jan 10 16:15:30 mail postfix/lmtp[11996]: 400643011B47: to=<recipient@example.com>, \
             relay=relay.example.com[/var/run/dovecot/lmtp], delay=0.06, delays=0.02/0.02/0.01/0.01, dsn=2.0.0, status=sent \
             (250 2.0.0 <recipient@example.com> hz3kESIo+1/dLgAAWP5Hkg Saved)",
        );

        let relay = p.relay.expect("relay must be present");
        assert_eq!(relay.name, "relay.example.com");
        assert_eq!(relay.path.as_deref(), Some("/var/run/dovecot/lmtp"));
        assert_eq!(relay.ip, None);
        assert_eq!(relay.port, None);
        assert_eq!(p.status, SmtpStatus::Sent);
        // not a hand-off to another instance, so no inner payload
        assert_eq!(p.extra_payload, None);
    }

    #[test]
    fn status_values_are_durable() {
        assert_eq!(SmtpStatus::Sent.as_i64(), 0);
        assert_eq!(SmtpStatus::Bounced.as_i64(), 1);
        assert_eq!(SmtpStatus::Deferred.as_i64(), 2);
        assert_eq!(SmtpStatus::from_i64(3), Some(SmtpStatus::Expired));
        assert_eq!(SmtpStatus::from_i64(4), None);
        assert_eq!(SmtpStatus::Deferred.to_string(), "deferred");
    }
}
