//! Queue-manager payloads
//!
//! Two shapes matter for tracking: the expiry notice
//! `QUEUE: from=<sender>, status=expired, returned to sender` and the
//! active-queue notice `QUEUE: from=<sender>, size=N, nrcpt=M (queue active)`.

use crate::scan::{is_digit, is_queue_char, parse_u64, to_str, Scanner};
use crate::smtp::MailAddress;
use crate::Payload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QmgrReturnedToSender {
    pub queue: String,
    pub sender: MailAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QmgrMailQueued {
    pub queue: String,
    pub sender: MailAddress,
    pub size: u64,
    pub nrcpt: u64,
}

pub(crate) fn parse_qmgr(payload: &[u8]) -> Option<Payload> {
    let mut s = Scanner::new(payload);

    let queue = to_str(s.take_while(is_queue_char)?)?.to_owned();
    s.tag(b": from=<")?;
    let sender = parse_sender(&mut s)?;
    s.eat(b'>')?;

    if s.starts_with(b", status=expired, returned to sender") {
        return Some(Payload::QmgrReturnedToSender(QmgrReturnedToSender {
            queue,
            sender,
        }));
    }

    s.tag(b", size=")?;
    let size = parse_u64(s.take_while(is_digit)?)?;
    s.tag(b", nrcpt=")?;
    let nrcpt = parse_u64(s.take_while(is_digit)?)?;
    s.tag(b" (queue active)")?;

    Some(Payload::QmgrMailQueued(QmgrMailQueued {
        queue,
        sender,
        size,
        nrcpt,
    }))
}

// bounce notifications are queued with an empty sender `from=<>`
fn parse_sender(s: &mut Scanner) -> Option<MailAddress> {
    let raw = s.until_maybe_empty(b'>')?;

    if raw.is_empty() {
        return Some(MailAddress {
            local: String::new(),
            domain: String::new(),
        });
    }

    let at = raw.iter().position(|&b| b == b'@')?;

    Some(MailAddress {
        local: to_str(&raw[..at])?.to_owned(),
        domain: to_str(&raw[at + 1..])?.to_owned(),
    })
}
