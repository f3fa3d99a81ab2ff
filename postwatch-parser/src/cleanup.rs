//! Cleanup-daemon payload: `QUEUE: message-id=<id>`
//!
//! The message id is usually e-mail shaped and angle bracketed, but some
//! senders produce free-form ids without brackets.

use crate::scan::{is_queue_char, to_str, Scanner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupMessageAccepted {
    pub queue: String,
    pub message_id: String,
}

pub(crate) fn parse_cleanup(payload: &[u8]) -> Option<CleanupMessageAccepted> {
    let mut s = Scanner::new(payload);

    let queue = to_str(s.take_while(is_queue_char)?)?.to_owned();
    s.tag(b": message-id=")?;

    let message_id = match s.peek()? {
        b'<' => {
            s.eat(b'<')?;
            let id = to_str(s.until(b'>')?)?.to_owned();
            s.eat(b'>')?;
            id
        }
        _ => to_str(s.rest())?.to_owned(),
    };

    if message_id.is_empty() {
        return None;
    }

    Some(CleanupMessageAccepted { queue, message_id })
}
