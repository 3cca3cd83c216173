// src/capture.rs

use crate::payload;
use crate::record::CaptureFields;
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("frame source io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame source failed: {0}")]
    Source(String),
}

/// Result of asking a source for its next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead<F> {
    Frame(F),
    /// No frame this time (camera warming up, dropped frame). Try again later.
    NotReady,
    /// The source is exhausted; the session ends.
    Ended,
}

/// A camera (or anything else) that yields frames one at a time.
pub trait FrameSource {
    type Frame;

    fn read_frame(&mut self) -> Result<FrameRead<Self::Frame>, CaptureError>;

    /// Give the device back. Called exactly once per session.
    fn release(&mut self);
}

/// Turns a frame into the text of a QR code, if one is visible.
pub trait QrDecoder<F> {
    fn decode(&mut self, frame: &F) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new payload was decoded and mapped onto the form fields.
    Decoded(CaptureFields),
    /// Same payload as the previous frame; the form is left alone.
    Unchanged,
    /// Frames were read but none carried a code.
    NoCode,
    /// The source had no frame ready this tick.
    Idle,
    /// The session is over; further ticks do nothing.
    Closed,
}

/// Lets another owner stop a running session.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One scanning session. Owns the source until closed or dropped.
pub struct ScanSession<S: FrameSource, D> {
    source: Option<S>,
    decoder: D,
    cancel: CancelHandle,
    max_frames_per_tick: usize,
    last_payload: Option<String>,
    decoded: usize,
}

impl<S, D> ScanSession<S, D>
where
    S: FrameSource,
    D: QrDecoder<S::Frame>,
{
    pub fn new(source: S, decoder: D) -> Self {
        info!("Scan session started");
        Self {
            source: Some(source),
            decoder,
            cancel: CancelHandle::default(),
            max_frames_per_tick: 1,
            last_payload: None,
            decoded: 0,
        }
    }

    /// Cap on frames read per tick (at least one).
    pub fn with_max_frames_per_tick(mut self, n: usize) -> Self {
        self.max_frames_per_tick = n.max(1);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Number of payloads decoded so far (back-to-back repeats excluded).
    pub fn decoded_count(&self) -> usize {
        self.decoded
    }

    /// Read up to the per-tick frame cap and try to decode each frame.
    ///
    /// Source errors close the session before being returned.
    pub fn tick(&mut self) -> Result<TickOutcome, CaptureError> {
        if self.cancel.is_cancelled() {
            self.close();
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(TickOutcome::Closed);
        };

        let mut outcome = TickOutcome::Idle;
        for _ in 0..self.max_frames_per_tick {
            let frame = match source.read_frame() {
                Ok(FrameRead::Frame(frame)) => frame,
                Ok(FrameRead::NotReady) => break,
                Ok(FrameRead::Ended) => {
                    self.close();
                    return Ok(match outcome {
                        TickOutcome::Idle | TickOutcome::NoCode => TickOutcome::Closed,
                        other => other,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Frame read failed");
                    self.close();
                    return Err(e);
                }
            };

            // a code counts as repeated only on back-to-back frames
            let Some(raw) = self.decoder.decode(&frame) else {
                self.last_payload = None;
                outcome = TickOutcome::NoCode;
                continue;
            };

            if self.last_payload.as_deref() == Some(raw.as_str()) {
                outcome = TickOutcome::Unchanged;
                continue;
            }

            let fields = payload::parse(&raw);
            let (filled, total) = fields.coverage();
            debug!(filled, total, "QR payload decoded");
            self.last_payload = Some(raw);
            self.decoded += 1;
            return Ok(TickOutcome::Decoded(fields));
        }
        Ok(outcome)
    }

    /// Release the source. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            info!(decoded = self.decoded, "Scan session closed");
        }
    }
}

impl<S: FrameSource, D> Drop for ScanSession<S, D> {
    fn drop(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
    }
}

/// Tick the session every `interval` until it closes, handing each newly
/// decoded payload to `on_decoded`.
pub fn run_ticks<S, D, F>(
    session: &mut ScanSession<S, D>,
    interval: Duration,
    mut on_decoded: F,
) -> Result<usize, CaptureError>
where
    S: FrameSource,
    D: QrDecoder<S::Frame>,
    F: FnMut(CaptureFields),
{
    loop {
        let started = Instant::now();
        match session.tick()? {
            TickOutcome::Closed => break,
            TickOutcome::Decoded(fields) => on_decoded(fields),
            TickOutcome::Unchanged | TickOutcome::NoCode | TickOutcome::Idle => {}
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
    Ok(session.decoded_count())
}

/// Frames are text lines: keyboard-wedge QR scanners, replay files, stdin.
pub struct LineSource<R> {
    reader: R,
    released: bool,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            released: false,
        }
    }
}

impl<R: BufRead> FrameSource for LineSource<R> {
    type Frame = String;

    fn read_frame(&mut self) -> Result<FrameRead<String>, CaptureError> {
        if self.released {
            return Ok(FrameRead::Ended);
        }
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(FrameRead::Ended);
        }
        Ok(FrameRead::Frame(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// The frame already is the decoded text; blank lines carry no code.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextDecoder;

impl QrDecoder<String> for TextDecoder {
    fn decode(&mut self, frame: &String) -> Option<String> {
        let t = frame.trim();
        (!t.is_empty()).then(|| t.to_string())
    }
}
