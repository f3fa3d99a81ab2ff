//! Log ingestion
//!
//! Byte lines come from a file, stdin, a directory of rotated logs, or a
//! socket; the reader task parses them, synthesizes the year, announces
//! import progress, and publishes typed records onto a bounded channel.
//! The reader never touches a database.

pub mod announcer;
pub mod file;
pub mod socket;
pub mod transform;

pub use announcer::{Announcer, Progress};
pub use socket::SocketSpec;
pub use transform::Transformer;

use chrono::{DateTime, Utc};
use postwatch_common::time::Clock;
use postwatch_common::Result;
use postwatch_parser::{ParseError, Record};
use tokio::sync::mpsc;
use tracing::debug;

const PROGRESS_STEPS: i64 = 100;

/// Consume byte lines, publish parsed records, and announce import
/// progress until the line channel closes.
///
/// Lines older than the instant the reader started are considered
/// imported history and drive the progress notches; once a line crosses
/// that instant the import is announced as finished and the stream is
/// live.
pub async fn run_reader(
    mut lines: mpsc::Receiver<Vec<u8>>,
    mut transformer: Transformer,
    records_tx: mpsc::Sender<Record>,
    mut announcer: Announcer,
    clock: &dyn Clock,
) -> Result<()> {
    let expected_import_end = clock.now();

    let mut completed = [false; PROGRESS_STEPS as usize];
    let mut initial_time: Option<DateTime<Utc>> = None;
    let mut last_time: Option<DateTime<Utc>> = None;
    let mut end_announced = false;

    while let Some(line) = lines.recv().await {
        let header_time = match transformer.transform(&line) {
            Ok(record) => {
                let time = record.header.time;
                if records_tx.send(record).await.is_err() {
                    return Ok(());
                }
                time
            }
            Err(ParseError::Unsupported(header)) => {
                debug!(process = %header.process, "unsupported log line");
                header.time
            }
            Err(ParseError::InvalidHeader) => {
                debug!("discarding malformed log line");
                continue;
            }
        };

        last_time = Some(header_time);

        let initial = match initial_time {
            Some(t) => t,
            None => {
                initial_time = Some(header_time);
                announcer.announce_start(header_time).await;
                header_time
            }
        };

        let is_past_import_end = header_time > expected_import_end;

        if !is_past_import_end {
            let span = (expected_import_end.timestamp() - initial.timestamp()).max(1);
            let elapsed = (header_time.timestamp() - initial.timestamp()).max(0);
            let notch = ((elapsed * PROGRESS_STEPS) / span).clamp(0, PROGRESS_STEPS - 1);

            if !completed[notch as usize] {
                completed[notch as usize] = true;
                announcer
                    .announce_progress(Progress {
                        finished: false,
                        time: header_time,
                        progress: notch,
                    })
                    .await;
            }
        } else if !end_announced {
            end_announced = true;
            announcer.announce_end(header_time).await;
        }
    }

    if !end_announced {
        announcer
            .announce_end(last_time.unwrap_or(expected_import_end))
            .await;
    }

    Ok(())
}
