//! # Postwatch Log Parser
//!
//! Streaming parser for MTA (Postfix-style) syslog lines. A line is parsed
//! in two stages: a strictly positional header parser, then a payload
//! dispatcher keyed on the `(process, daemon)` pair of the header. Both
//! stages are hand-rolled byte scanners; no line ever causes a panic.
//!
//! Unsupported payloads are recoverable: the caller keeps the parsed
//! header (the timestamp still advances the reader's clock) and discards
//! the rest of the line.

mod cleanup;
mod header;
mod pickup;
mod qmgr;
mod scan;
mod smtp;
mod smtpd;

pub use header::Header;
pub use smtp::{Delays, MailAddress, Relay, SentQueued, SmtpSentStatus, SmtpStatus};

use thiserror::Error;

/// A fully parsed log line
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub header: Header,
    pub payload: Payload,
}

/// Closed set of supported payload variants
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    SmtpSentStatus(smtp::SmtpSentStatus),
    QmgrReturnedToSender(qmgr::QmgrReturnedToSender),
    QmgrMailQueued(qmgr::QmgrMailQueued),
    CleanupMessageAccepted(cleanup::CleanupMessageAccepted),
    Pickup(pickup::Pickup),
    SmtpdConnect(smtpd::SmtpdConnect),
    SmtpdDisconnect(smtpd::SmtpdDisconnect),
    SmtpdMailAccepted(smtpd::SmtpdMailAccepted),
    SmtpdReject(smtpd::SmtpdReject),
}

pub use cleanup::CleanupMessageAccepted;
pub use pickup::Pickup;
pub use qmgr::{QmgrMailQueued, QmgrReturnedToSender};
pub use smtpd::{SmtpdConnect, SmtpdDisconnect, SmtpdMailAccepted, SmtpdReject};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The line does not even carry a syslog header. Nothing recoverable.
    #[error("invalid header line")]
    InvalidHeader,

    /// The header parsed but the payload grammar is unknown or malformed.
    /// The header is still usable.
    #[error("unsupported log line")]
    Unsupported(Header),
}

impl ParseError {
    /// Header of the line, when one could be recovered
    pub fn header(&self) -> Option<&Header> {
        match self {
            ParseError::InvalidHeader => None,
            ParseError::Unsupported(h) => Some(h),
        }
    }
}

/// Parse one log line. The year is supplied by the caller, as MTA logs
/// omit it. Leading NUL bytes (seen on logs recovered after a crash) are
/// stripped before header parsing.
pub fn parse(line: &[u8], year: i32) -> Result<Record, ParseError> {
    let line = strip_leading_nuls(line);

    let (h, payload_line) = header::parse_header(line, year).ok_or(ParseError::InvalidHeader)?;

    let parsed = match (h.process.as_str(), h.daemon.as_deref()) {
        ("postfix", Some("smtp")) | ("postfix", Some("lmtp")) => {
            smtp::parse_sent_status(payload_line).map(Payload::SmtpSentStatus)
        }
        ("postfix", Some("qmgr")) => qmgr::parse_qmgr(payload_line),
        ("postfix", Some("pickup")) => pickup::parse_pickup(payload_line).map(Payload::Pickup),
        ("postfix", Some(daemon)) if is_cleanup_daemon(daemon) => {
            cleanup::parse_cleanup(payload_line).map(Payload::CleanupMessageAccepted)
        }
        ("postfix", Some(daemon)) if is_smtpd_daemon(daemon) => smtpd::parse_smtpd(payload_line),
        _ => None,
    };

    match parsed {
        Some(payload) => Ok(Record { header: h, payload }),
        None => Err(ParseError::Unsupported(h)),
    }
}

fn is_cleanup_daemon(daemon: &str) -> bool {
    daemon == "cleanup" || daemon.ends_with("/cleanup")
}

// the multi-segment names come from submission ports and from zimbra setups
fn is_smtpd_daemon(daemon: &str) -> bool {
    matches!(
        daemon,
        "smtpd" | "submission/smtpd" | "smtps/smtpd" | "amavisd/smtpd" | "dkimmilter/smtpd"
    )
}

fn strip_leading_nuls(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|&b| b != 0).unwrap_or(line.len());
    &line[start..]
}
