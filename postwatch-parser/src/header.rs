//! Positional syslog header parser
//!
//! Grammar: `MMM  d HH:MM:SS host ident: payload` where `ident` is
//! `name(-ipv4)?(/daemon(/segment)*)?([pid])?`. The day field is two
//! characters wide, space padded. The `-ipv4` suffix on the process name
//! identifies the MTA instance that emitted the line.

use crate::scan::{is_digit, parse_u64, to_str, Scanner};
use chrono::{DateTime, TimeZone, Utc};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Line timestamp, year-qualified by the caller
    pub time: DateTime<Utc>,
    pub host: String,
    pub process: String,
    pub daemon: Option<String>,
    pub process_ip: Option<Ipv4Addr>,
    /// 0 when the line carries no `[pid]`
    pub pid: i64,
}

pub(crate) fn parse_header(line: &[u8], year: i32) -> Option<(Header, &[u8])> {
    let mut s = Scanner::new(line);

    let month = parse_month(s.take_while(|b| b.is_ascii_alphabetic())?)?;
    s.eat(b' ')?;

    let day = parse_padded_day(&mut s)?;
    s.eat(b' ')?;

    let hour = parse_two_digits(&mut s)?;
    s.eat(b':')?;
    let minute = parse_two_digits(&mut s)?;
    s.eat(b':')?;
    let second = parse_two_digits(&mut s)?;
    s.eat(b' ')?;

    let host = to_str(s.take_while(|b| b != b' ')?)?.to_owned();
    s.eat(b' ')?;

    let ident = s.until(b':')?;
    s.eat(b':')?;
    s.eat(b' ')?;

    let (process, daemon, process_ip, pid) = parse_ident(ident)?;

    let time = Utc
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()?;

    let header = Header {
        time,
        host,
        process,
        daemon,
        process_ip,
        pid,
    };

    Some((header, s.rest()))
}

fn parse_month(name: &[u8]) -> Option<u32> {
    let n = match name {
        b"Jan" => 1,
        b"Feb" => 2,
        b"Mar" => 3,
        b"Apr" => 4,
        b"May" => 5,
        b"Jun" => 6,
        b"Jul" => 7,
        b"Aug" => 8,
        b"Sep" => 9,
        b"Oct" => 10,
        b"Nov" => 11,
        b"Dec" => 12,
        _ => return None,
    };
    Some(n)
}

// two characters: " 5" or "16"
fn parse_padded_day(s: &mut Scanner) -> Option<u32> {
    let first = s.peek()?;

    if first == b' ' {
        s.eat(b' ')?;
        let d = s.take_while(is_digit)?;
        if d.len() != 1 {
            return None;
        }
        return parse_u64(d).map(|v| v as u32);
    }

    let d = s.take_while(is_digit)?;
    if d.len() != 2 {
        return None;
    }
    parse_u64(d).map(|v| v as u32)
}

fn parse_two_digits(s: &mut Scanner) -> Option<u32> {
    let d = s.take_while(is_digit)?;
    if d.len() != 2 {
        return None;
    }
    parse_u64(d).map(|v| v as u32)
}

// `name(-ipv4)?(/daemon)*([pid])?`, leading `/` tolerated
fn parse_ident(ident: &[u8]) -> Option<(String, Option<String>, Option<Ipv4Addr>, i64)> {
    let ident = ident.strip_prefix(b"/").unwrap_or(ident);

    if ident.is_empty() {
        return None;
    }

    let (name_part, pid) = match ident.iter().position(|&b| b == b'[') {
        Some(open) => {
            let closed = ident.last() == Some(&b']');
            if !closed {
                return None;
            }
            let pid = parse_u64(&ident[open + 1..ident.len() - 1])? as i64;
            (&ident[..open], pid)
        }
        None => (ident, 0),
    };

    if name_part.is_empty() {
        return None;
    }

    let (process_part, daemon) = match name_part.iter().position(|&b| b == b'/') {
        Some(slash) => (
            &name_part[..slash],
            Some(to_str(&name_part[slash + 1..])?.to_owned()),
        ),
        None => (name_part, None),
    };

    // an `-ipv4` suffix on the process name; anything that is not a
    // parseable address stays part of the name (e.g. `postfix-script`)
    let (process, process_ip) = match process_part.iter().position(|&b| b == b'-') {
        Some(dash) => match to_str(&process_part[dash + 1..])?.parse::<Ipv4Addr>() {
            Ok(ip) => (to_str(&process_part[..dash])?.to_owned(), Some(ip)),
            Err(_) => (to_str(process_part)?.to_owned(), None),
        },
        None => (to_str(process_part)?.to_owned(), None),
    };

    if process.is_empty() {
        return None;
    }

    Some((process, daemon, process_ip, pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn header(line: &str) -> Header {
        let (h, _) = parse_header(line.as_bytes(), 2020).expect("header must parse");
        h
    }

    #[test]
    fn full_header_with_instance_ip() {
        let h = header("Jun 16 00:07:43 smtpnode07 postfix-10.20.30.40/smtp[3022]: payload");
        assert_eq!(h.time.month(), 6);
        assert_eq!(h.time.day(), 16);
        assert_eq!(h.time.hour(), 0);
        assert_eq!(h.time.minute(), 7);
        assert_eq!(h.time.second(), 43);
        assert_eq!(h.host, "smtpnode07");
        assert_eq!(h.process, "postfix");
        assert_eq!(h.daemon.as_deref(), Some("smtp"));
        assert_eq!(h.process_ip, Some("10.20.30.40".parse().unwrap()));
        assert_eq!(h.pid, 3022);
    }

    #[test]
    fn single_digit_day_is_double_space_padded() {
        let h = header("Jul  5 17:24:35 mail postfix/smtp[9635]: x");
        assert_eq!(h.time.day(), 5);
        assert_eq!(h.process_ip, None);
    }

    #[test]
    fn payload_starts_after_the_separator() {
        let (_, payload) = parse_header(b"Jul  5 17:24:35 mail postfix/smtp[9635]: D298F2C60812: x", 2020).unwrap();
        assert_eq!(payload, b"D298F2C60812: x");
    }

    #[test]
    fn year_is_taken_from_the_caller() {
        let (h, _) = parse_header(b"May 25 05:12:22 mail postfix/smtp[1]: x", 2008).unwrap();
        assert_eq!(h.time.timestamp(), 1211692342);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_header(b"", 2020).is_none());
        assert!(parse_header(b"Not a header at all", 2020).is_none());
        assert!(parse_header(b"Xxx 16 00:07:43 host proc: x", 2020).is_none());
        assert!(parse_header(b"Jun 16 00:07 host proc: x", 2020).is_none());
    }

    #[test]
    fn rejects_invalid_date() {
        assert!(parse_header(b"Feb 30 00:00:00 host proc: x", 2020).is_none());
    }
}
