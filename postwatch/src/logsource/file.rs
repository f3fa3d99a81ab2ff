//! File-backed line sources: stdin, a single log file, or every log
//! file of a directory imported in name order

use postwatch_common::Result;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Split a byte stream into lines (terminators stripped) until EOF
pub async fn feed_lines<R>(reader: R, lines_tx: &mpsc::Sender<Vec<u8>>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        let n = reader.read_until(b'\n', &mut buffer).await?;
        if n == 0 {
            return Ok(());
        }

        while buffer.last() == Some(&b'\n') || buffer.last() == Some(&b'\r') {
            buffer.pop();
        }

        if buffer.is_empty() {
            continue;
        }

        if lines_tx.send(buffer.clone()).await.is_err() {
            return Ok(());
        }
    }
}

/// Import the MTA log files of a directory in chronological order.
/// Rotated files carry numeric suffixes (`mail.log.2`, `mail.log.1`),
/// so descending name order is oldest-first, with the live `mail.log`
/// last.
pub async fn feed_dir(dir: &Path, lines_tx: &mpsc::Sender<Vec<u8>>) -> Result<()> {
    let mut paths = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && is_mail_log(&path) {
            paths.push(path);
        }
    }

    paths.sort();
    paths.reverse();
    info!(count = paths.len(), dir = %dir.display(), "importing log files");

    for path in paths {
        debug!(file = %path.display(), "reading log file");
        let file = tokio::fs::File::open(&path).await?;
        feed_lines(file, lines_tx).await?;
    }

    Ok(())
}

fn is_mail_log(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    name.starts_with("mail.log") || name.starts_with("mail.info") || name.ends_with(".log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_lines_and_strips_terminators() {
        let (tx, mut rx) = mpsc::channel(16);
        let input: &[u8] = b"first line\r\nsecond line\n\nthird";

        feed_lines(input, &tx).await.unwrap();
        drop(tx);

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }

        assert_eq!(
            lines,
            vec![
                b"first line".to_vec(),
                b"second line".to_vec(),
                b"third".to_vec()
            ]
        );
    }

    #[tokio::test]
    async fn imports_rotated_files_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mail.log.1"), "old\n").unwrap();
        std::fs::write(dir.path().join("mail.log"), "new\n").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "nope\n").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        feed_dir(dir.path(), &tx).await.unwrap();
        drop(tx);

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(String::from_utf8(line).unwrap());
        }

        assert_eq!(lines, vec!["old".to_string(), "new".to_string()]);
    }
}
