//! Line drains forwarding child output to the diagnostic log.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Which output stream a drain reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Spawn a task that logs `reader` line by line until end-of-stream.
///
/// Lines are split on `\n`; a trailing partial line is still emitted.
/// Non-UTF-8 output is logged lossily rather than ending the drain.
pub(crate) fn spawn_drain<R>(program: String, stream: OutputStream, reader: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let lines = drain_lines(reader, |line| {
            tracing::info!(program = %program, stream = stream.as_str(), "{}", line);
        })
        .await;
        tracing::trace!(program = %program, stream = stream.as_str(), lines, "output drain finished");
    })
}

/// Read `reader` to end-of-stream, handing each line (trailing whitespace
/// trimmed) to `sink`. Returns the number of lines seen.
pub(crate) async fn drain_lines<R, F>(reader: R, mut sink: F) -> usize
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink(line.trim_end());
                count += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "output drain read failed");
                break;
            }
        }
    }

    count
}
