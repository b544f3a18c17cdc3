//! Replay Sampling Source
//!
//! Feeds recorded fixes into the tracker. Input is newline-delimited JSON:
//! each line is one fix object or an array of fixes, and becomes one batch.
//!
//! ```text
//! {"timestamp_millis_since_epoch":1700000000000,"latitude":1.0,"longitude":2.0}
//! [{"t":1700000060000,"lat":1.001,"lon":2.001,"acc":4.0,"alt":11.0}, ...]
//! ```
//!
//! Blank lines are skipped. Malformed lines are logged and skipped.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use geotrack_core::{FixBatchSink, PlatformError, PositionFix, SamplingParams, SamplingSource};

/// Where replayed fixes come from
#[derive(Debug, Clone)]
pub enum ReplayInput {
    /// Standard input
    Stdin,
    /// An NDJSON file
    File(PathBuf),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Batch(Vec<PositionFix>),
    Single(PositionFix),
}

/// Parse one input line; `Ok(None)` for blank lines
pub fn parse_line(line: &str) -> Result<Option<Vec<PositionFix>>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    Ok(Some(match serde_json::from_str(line)? {
        ReplayLine::Batch(fixes) => fixes,
        ReplayLine::Single(fix) => vec![fix],
    }))
}

/// Sampling source that replays NDJSON fixes
pub struct ReplaySource {
    input: ReplayInput,
    pace: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
    finished: Arc<Notify>,
}

impl ReplaySource {
    /// Replay `input`, pausing `pace` between batches
    pub fn new(input: ReplayInput, pace: Duration) -> Self {
        Self {
            input,
            pace,
            reader: Mutex::new(None),
            finished: Arc::new(Notify::new()),
        }
    }

    /// Resolves once the input is exhausted
    pub async fn finished(&self) {
        self.finished.notified().await;
    }
}

impl SamplingSource for ReplaySource {
    fn attach(&self, params: &SamplingParams, sink: FixBatchSink) -> Result<(), PlatformError> {
        let mut reader = self.reader.lock();
        if reader.is_some() {
            return Err(PlatformError::new("replay source already attached"));
        }

        info!(
            input = ?self.input,
            interval_secs = params.interval.as_secs(),
            "Replay source attached"
        );

        let input = self.input.clone();
        let pace = self.pace;
        let finished = Arc::clone(&self.finished);
        let deliver = move |fixes: Vec<PositionFix>| sink.deliver(fixes);
        *reader = Some(tokio::spawn(async move {
            match input {
                ReplayInput::Stdin => {
                    let lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
                    replay_lines(lines, deliver, pace).await;
                }
                ReplayInput::File(path) => match tokio::fs::File::open(&path).await {
                    Ok(file) => {
                        replay(BufReader::new(file), deliver, pace).await;
                    }
                    Err(e) => warn!(path = ?path, error = %e, "Cannot open replay input"),
                },
            }
            finished.notify_one();
        }));

        Ok(())
    }

    fn detach(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
            info!("Replay source detached");
        }
    }
}

/// Read lines of a blocking input on a dedicated thread
///
/// A read blocked on an open pipe cannot be cancelled. It runs outside the
/// runtime so that shutdown never waits for it; the thread ends with the
/// process or once the receiver is dropped and the next line arrives.
pub fn spawn_line_reader<R>(input: R) -> mpsc::UnboundedReceiver<io::Result<String>>
where
    R: io::BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in io::BufRead::lines(input) {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

/// Line-by-line replay state
struct Replayer<F> {
    deliver: F,
    pace: Duration,
    line_no: usize,
    batches: usize,
}

impl<F> Replayer<F>
where
    F: FnMut(Vec<PositionFix>),
{
    fn new(deliver: F, pace: Duration) -> Self {
        Self {
            deliver,
            pace,
            line_no: 0,
            batches: 0,
        }
    }

    async fn feed(&mut self, line: &str) {
        self.line_no += 1;

        match parse_line(line) {
            Ok(Some(fixes)) => {
                debug!(line = self.line_no, fixes = fixes.len(), "Replaying batch");
                (self.deliver)(fixes);
                self.batches += 1;
                if !self.pace.is_zero() {
                    tokio::time::sleep(self.pace).await;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(line = self.line_no, error = %e, "Skipping malformed replay line"),
        }
    }

    fn finish(self) -> usize {
        info!(batches = self.batches, lines = self.line_no, "Replay input exhausted");
        self.batches
    }
}

/// Deliver each line of `input` as one batch; returns the number of batches
pub async fn replay<R, F>(input: R, deliver: F, pace: Duration) -> usize
where
    R: AsyncBufRead + Unpin,
    F: FnMut(Vec<PositionFix>),
{
    let mut lines = input.lines();
    let mut replayer = Replayer::new(deliver, pace);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => replayer.feed(&line).await,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Replay input read failed");
                break;
            }
        }
    }

    replayer.finish()
}

/// Same as [`replay`], for lines produced by [`spawn_line_reader`]
pub async fn replay_lines<F>(
    mut lines: mpsc::UnboundedReceiver<io::Result<String>>,
    deliver: F,
    pace: Duration,
) -> usize
where
    F: FnMut(Vec<PositionFix>),
{
    let mut replayer = Replayer::new(deliver, pace);

    while let Some(line) = lines.recv().await {
        match line {
            Ok(line) => replayer.feed(&line).await,
            Err(e) => {
                warn!(error = %e, "Replay input read failed");
                break;
            }
        }
    }

    replayer.finish()
}
