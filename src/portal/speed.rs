//! Live bandwidth feed
//!
//! The portal answers the speed endpoint with a response that never ends:
//! every second or so it appends `<download>,<upload>` in bits per second,
//! with nothing between consecutive pairs (`1234.0,5678.0900.0,100.0`).
//! A download value always ends at the comma. Where the upload ends is only
//! recoverable from the number format, so the decoder assumes the upload
//! carries as many fractional digits as the download of the same pair.

use crate::config::{PortalSettings, SpeedSettings};
use crate::error::PortalResult;
use crate::http::{ChunkSource, Transport};
use crate::models::LiveSpeedSample;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Unterminated data kept beyond this is garbage, not a slow pair
const MAX_PENDING: usize = 64 * 1024;
const CHANNEL_CAPACITY: usize = 16;
pub const DEFAULT_WINDOW: usize = 50;

/// Outcome of reading one pair at the front of the buffer
#[derive(Debug, PartialEq)]
enum Step {
    Pair { download: f64, upload: f64, len: usize },
    /// Front byte cannot start a pair
    Skip,
    /// Need more bytes
    Incomplete,
}

/// Incremental decoder for the delimiter-free pair feed
#[derive(Debug, Default)]
pub struct SpeedDecoder {
    pending: Vec<u8>,
    consumed: u64,
    latest: Option<(f64, f64)>,
}

impl SpeedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        self.decode(false);
    }

    /// End of a read batch: settle a trailing pair whose upload has no
    /// fractional part to delimit it. A download still waiting for its
    /// comma stays buffered.
    pub fn finish(&mut self) {
        self.decode(true);
    }

    /// Most recent pair decoded since the last call; older ones are superseded
    pub fn take_latest(&mut self) -> Option<LiveSpeedSample> {
        self.latest
            .take()
            .map(|(download, upload)| LiveSpeedSample::from_raw(download, upload))
    }

    /// Total bytes consumed so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    fn decode(&mut self, at_end: bool) {
        let mut cursor = 0;

        while cursor < self.pending.len() {
            match parse_pair(&self.pending[cursor..], at_end) {
                Step::Pair {
                    download,
                    upload,
                    len,
                } => {
                    self.latest = Some((download, upload));
                    cursor += len;
                }
                Step::Skip => cursor += 1,
                Step::Incomplete => break,
            }
        }

        if self.pending.len() - cursor > MAX_PENDING {
            tracing::debug!("Dropping {} undecodable speed bytes", self.pending.len() - cursor);
            cursor = self.pending.len();
        }

        self.pending.drain(..cursor);
        self.consumed += cursor as u64;
    }
}

/// Last pair in a complete piece of feed text, in kbps
pub fn extract_last_pair(text: &str) -> Option<LiveSpeedSample> {
    let mut decoder = SpeedDecoder::new();
    decoder.push(text.as_bytes());
    decoder.finish();
    decoder.take_latest()
}

fn digits(input: &[u8], from: usize) -> usize {
    input[from..].iter().take_while(|b| b.is_ascii_digit()).count()
}

fn number(bytes: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(bytes).ok()?.trim_end_matches('.');
    text.parse().ok()
}

fn parse_pair(input: &[u8], at_end: bool) -> Step {
    let int_len = digits(input, 0);
    if int_len == 0 {
        return if input.is_empty() {
            Step::Incomplete
        } else {
            Step::Skip
        };
    }

    // download: digits [. digits] ,
    let mut pos = int_len;
    let mut fraction = 0;
    if pos < input.len() && input[pos] == b'.' {
        fraction = digits(input, pos + 1);
        pos += 1 + fraction;
    }
    if pos >= input.len() {
        return Step::Incomplete;
    }
    if input[pos] != b',' {
        return Step::Skip;
    }
    let download = &input[..pos];
    pos += 1;

    // upload: digits, then the same number of fractional digits
    let upload_start = pos;
    let up_int = digits(input, pos);
    if up_int == 0 {
        return if pos >= input.len() {
            Step::Incomplete
        } else {
            Step::Skip
        };
    }
    pos += up_int;

    let has_dot = pos < input.len() && input[pos] == b'.';
    if fraction > 0 {
        if pos >= input.len() {
            if !at_end {
                return Step::Incomplete;
            }
        } else if has_dot {
            let available = digits(input, pos + 1);
            if available < fraction && pos + 1 + available >= input.len() && !at_end {
                return Step::Incomplete;
            }
            pos += 1 + available.min(fraction);
        }
    } else {
        // Integer download: nothing tells where the upload stops, take the
        // longest number and wait for a terminator
        if has_dot {
            pos += 1 + digits(input, pos + 1);
        }
        if pos >= input.len() && !at_end {
            return Step::Incomplete;
        }
    }

    match (number(download), number(&input[upload_start..pos])) {
        (Some(download), Some(upload)) => Step::Pair {
            download,
            upload,
            len: pos,
        },
        _ => Step::Skip,
    }
}

pub(crate) fn feed_headers(portal: &PortalSettings) -> PortalResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    headers.insert(
        REFERER,
        HeaderValue::from_str(&portal.url(&portal.report_path))?,
    );
    Ok(headers)
}

/// Ask the portal to start filling the speed feed. Best effort.
pub(crate) async fn prime<T: Transport>(transport: &T, portal: &PortalSettings) {
    if let Err(e) = try_prime(transport, portal).await {
        tracing::debug!("Speed feed priming failed (ignored): {}", e);
    }
}

async fn try_prime<T: Transport>(transport: &T, portal: &PortalSettings) -> PortalResult<()> {
    transport
        .get(&portal.url(&portal.report_path), HeaderMap::new())
        .await?;
    transport
        .get(&portal.speed_url(portal.speed_prime_type), feed_headers(portal)?)
        .await?;
    Ok(())
}

/// Append every chunk that is already available without waiting.
/// Returns `false` once the server has closed the body.
async fn drain_ready(source: &mut dyn ChunkSource, batch: &mut Vec<u8>) -> PortalResult<bool> {
    loop {
        match tokio::time::timeout(Duration::ZERO, source.next_chunk()).await {
            Ok(Ok(Some(chunk))) => batch.extend_from_slice(&chunk),
            Ok(Ok(None)) => return Ok(false),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(true),
        }
    }
}

/// One-shot read: open, take what arrives within the wait, close
pub(crate) async fn poll_once<T: Transport>(
    transport: &T,
    portal: &PortalSettings,
    settings: &SpeedSettings,
) -> PortalResult<LiveSpeedSample> {
    let url = portal.speed_url(portal.speed_stream_type);
    let mut source = transport.open_stream(&url, feed_headers(portal)?).await?;
    let mut batch = Vec::new();

    match tokio::time::timeout(settings.poll_wait(), source.next_chunk()).await {
        Ok(chunk) => {
            if let Some(chunk) = chunk? {
                batch = chunk;
                drain_ready(source.as_mut(), &mut batch).await?;
            }
        }
        Err(_) => tracing::debug!("No speed data within {:?}", settings.poll_wait()),
    }

    let text = String::from_utf8_lossy(&batch);
    Ok(extract_last_pair(&text).unwrap_or(LiveSpeedSample::ZERO))
}

enum FeedEnd {
    Closed,
    ReceiverGone,
}

/// Handle to a running live speed feed.
///
/// Samples arrive through [`SpeedStream::next`]. [`SpeedStream::cancel`] or
/// dropping the handle stops the feed and closes its connection.
pub struct SpeedStream {
    samples: mpsc::Receiver<LiveSpeedSample>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SpeedStream {
    /// Must be called from within a tokio runtime
    pub(crate) fn spawn<T: Transport>(
        transport: Arc<T>,
        portal: PortalSettings,
        settings: SpeedSettings,
    ) -> Self {
        let (tx, samples) = mpsc::channel(CHANNEL_CAPACITY);
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_feed(transport, portal, settings, tx, cancel_rx));

        Self {
            samples,
            cancel,
            task,
        }
    }

    /// Next sample; `None` after cancellation
    pub async fn next(&mut self) -> Option<LiveSpeedSample> {
        self.samples.recv().await
    }

    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

impl Drop for SpeedStream {
    fn drop(&mut self) {
        self.cancel();
        self.task.abort();
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender counts as cancellation too
    let _ = cancel.wait_for(|stop| *stop).await;
}

async fn run_feed<T: Transport>(
    transport: Arc<T>,
    portal: PortalSettings,
    settings: SpeedSettings,
    tx: mpsc::Sender<LiveSpeedSample>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            outcome = read_feed(transport.as_ref(), &portal, &settings, &tx) => outcome,
        };

        match outcome {
            Ok(FeedEnd::ReceiverGone) => break,
            Ok(FeedEnd::Closed) => tracing::debug!("Speed feed closed by portal, reopening"),
            Err(e) => tracing::warn!("Speed feed error: {}", e),
        }

        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            _ = tokio::time::sleep(settings.retry_backoff()) => {}
        }
    }

    tracing::debug!("Speed feed stopped");
}

async fn read_feed<T: Transport>(
    transport: &T,
    portal: &PortalSettings,
    settings: &SpeedSettings,
    tx: &mpsc::Sender<LiveSpeedSample>,
) -> PortalResult<FeedEnd> {
    prime(transport, portal).await;

    let url = portal.speed_url(portal.speed_stream_type);
    let mut source = transport.open_stream(&url, feed_headers(portal)?).await?;
    let mut decoder = SpeedDecoder::new();

    loop {
        let Some(mut batch) = source.next_chunk().await? else {
            return Ok(FeedEnd::Closed);
        };
        let open = drain_ready(source.as_mut(), &mut batch).await?;
        decoder.push(&batch);
        decoder.finish();

        let sample = decoder.take_latest().unwrap_or(LiveSpeedSample::ZERO);
        if tx.send(sample).await.is_err() {
            return Ok(FeedEnd::ReceiverGone);
        }
        if !open {
            tracing::debug!("Speed feed ended after {} bytes", decoder.consumed());
            return Ok(FeedEnd::Closed);
        }

        tokio::time::sleep(settings.poll_interval()).await;
    }
}

/// Rolling history of recent samples
#[derive(Debug, Clone)]
pub struct SampleWindow {
    capacity: usize,
    samples: VecDeque<LiveSpeedSample>,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, sample: LiveSpeedSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Highest download or upload rate in the window
    pub fn peak(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.download.max(s.upload))
            .fold(0.0, f64::max)
    }
}
