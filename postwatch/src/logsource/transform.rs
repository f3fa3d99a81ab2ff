//! Line-to-record transformation with year synthesis
//!
//! MTA logs omit the year, so the transformer carries one, seeded by the
//! caller, and increments it whenever the month of a line jumps backward
//! (December wrapping into January). Header-only lines (unsupported
//! payloads) still advance the synthesized clock.

use chrono::Datelike;
use postwatch_common::{Error, Result};
use postwatch_parser::{Header, ParseError, Record};

pub struct Transformer {
    year: i32,
    last_month: u32,
}

impl Transformer {
    pub fn new(year: i32) -> Transformer {
        Transformer {
            year,
            last_month: 0,
        }
    }

    pub fn transform(&mut self, line: &[u8]) -> std::result::Result<Record, ParseError> {
        match postwatch_parser::parse(line, self.year) {
            Ok(mut record) => {
                self.roll_year(&mut record.header);
                Ok(record)
            }
            Err(ParseError::Unsupported(mut header)) => {
                self.roll_year(&mut header);
                Err(ParseError::Unsupported(header))
            }
            Err(e) => Err(e),
        }
    }

    fn roll_year(&mut self, header: &mut Header) {
        let month = header.time.month();

        if month < self.last_month {
            self.year += 1;
            if let Some(adjusted) = header.time.with_year(self.year) {
                header.time = adjusted;
            }
        }

        self.last_month = month;
    }
}

/// Look up a transformer builder by log format name. Only the default
/// MTA syslog format is built in; the name exists so external formats
/// can be refused with a clear startup error.
pub fn get(format: &str, year: i32) -> Result<Transformer> {
    match format {
        "default" | "postfix" => Ok(Transformer::new(year)),
        other => Err(Error::Config(format!("unknown log format {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn year_stays_within_one_year() {
        let mut t = Transformer::new(2020);
        let r = t
            .transform(b"Jun 16 00:07:41 mail postfix/pickup[12]: 9AE361855DA0: uid=0 from=<root>")
            .unwrap();
        assert_eq!(r.header.time.year(), 2020);

        let r = t
            .transform(b"Jul  1 00:00:00 mail postfix/pickup[12]: 9AE361855DA1: uid=0 from=<root>")
            .unwrap();
        assert_eq!(r.header.time.year(), 2020);
    }

    #[test]
    fn december_to_january_increments_the_year() {
        let mut t = Transformer::new(2020);
        t.transform(b"Dec 31 23:59:59 mail postfix/pickup[12]: 9AE361855DA0: uid=0 from=<root>")
            .unwrap();

        let r = t
            .transform(b"Jan  1 00:00:12 mail postfix/pickup[12]: 9AE361855DA1: uid=0 from=<root>")
            .unwrap();
        assert_eq!(r.header.time.year(), 2021);
    }

    #[test]
    fn unsupported_lines_still_roll_the_year() {
        let mut t = Transformer::new(2020);
        t.transform(b"Dec 31 23:59:59 mail dovecot: something").unwrap_err();

        let err = t
            .transform(b"Jan  1 00:00:12 mail dovecot: something else")
            .unwrap_err();
        let header = err.header().expect("header must be recovered");
        assert_eq!(header.time.year(), 2021);

        // and a supported line afterwards keeps the new year
        let r = t
            .transform(b"Jan  2 00:00:00 mail postfix/pickup[12]: 9AE361855DA0: uid=0 from=<root>")
            .unwrap();
        assert_eq!(r.header.time.year(), 2021);
    }

    #[test]
    fn unknown_format_is_a_configuration_error() {
        assert!(get("logstash", 2020).is_err());
        assert!(get("default", 2020).is_ok());
    }
}
