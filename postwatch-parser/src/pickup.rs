//! Pickup-daemon payload: `QUEUE: uid=N from=<sender>`
//!
//! Locally submitted mail (sendmail binary, cron) enters through pickup
//! instead of an smtpd connection.

use crate::scan::{is_digit, is_queue_char, parse_u64, to_str, Scanner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pickup {
    pub queue: String,
    pub uid: u32,
    /// Raw sender; local submissions often lack a domain part
    pub sender: String,
}

pub(crate) fn parse_pickup(payload: &[u8]) -> Option<Pickup> {
    let mut s = Scanner::new(payload);

    let queue = to_str(s.take_while(is_queue_char)?)?.to_owned();
    s.tag(b": uid=")?;
    let uid = parse_u64(s.take_while(is_digit)?)?;
    s.tag(b" from=<")?;
    let sender = to_str(s.until_maybe_empty(b'>')?)?.to_owned();
    s.eat(b'>')?;

    Some(Pickup {
        queue,
        uid: uid as u32,
        sender,
    })
}
