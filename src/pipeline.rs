//! One display cycle from fetching the source to releasing the panel
//!
//! ```text
//! init -> [clear] -> acquire (retry) -> encode -> display -> settle -> sleep
//!                                                                      |
//! every exit path, success or not --------------------------------> shutdown
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::codec::{self, EncodeOptions, FrameFormat, PanelBuffer};
use crate::error::PipelineError;
use crate::session::{PanelSession, PanelState};
use crate::source::ImageSource;
use crate::traits::{PanelDriver, PanelMode};

/// Granularity in which waits look at the [`CancelToken`]
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Shared flag an operator interrupt flips
///
/// Clones observe the same flag, so one clone can live in a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the running cycle to stop at the next checkpoint
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancelToken::cancel`] was called on any clone
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded retry of transient acquisition failures
///
/// Hardware operations are never retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one, 0 disables retrying
    pub max_retries: u32,
    /// Wait before the first retry
    pub backoff: Duration,
    /// Growth factor of the wait between consecutive retries
    pub multiplier: f64,
    /// Upper bound of any single wait
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        backoff: Duration::from_secs(1),
        multiplier: 2.0,
        max_backoff: Duration::from_secs(60),
    };

    /// Wait before retry number `retry` (counting from 0), at most `max_backoff`
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(self.backoff.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// Knobs of a display cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    /// Blank the panel after init, before fetching
    pub clear_before_display: bool,
    /// Acquisition retry
    pub retry: RetryPolicy,
    /// Pause between the refresh and deep sleep
    pub settle: Duration,
    /// What the source delivers
    pub format: FrameFormat,
    /// Error diffusion while quantizing
    pub dither: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            clear_before_display: true,
            retry: RetryPolicy::default(),
            settle: Duration::from_secs(3),
            format: FrameFormat::Image,
            dither: false,
        }
    }
}

/// Summary of a successful cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Fetch attempts, 1 unless retries were needed
    pub attempts: u32,
    /// Size of the acquired payload
    pub bytes_fetched: usize,
    /// Whether the panel was blanked first
    pub cleared: bool,
}

/// Sequences the stages of a display cycle and owns the failure handling
#[derive(Debug, Clone)]
pub struct Pipeline {
    options: PipelineOptions,
    cancel: CancelToken,
}

impl Pipeline {
    /// Creates a pipeline that stops early once `cancel` is flipped
    pub fn new(options: PipelineOptions, cancel: CancelToken) -> Self {
        Pipeline { options, cancel }
    }

    /// The configured options
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Runs a full display cycle
    ///
    /// The session is shut down on every path. Acquisition and codec failures put the
    /// panel to sleep first, hardware failures skip straight to the shutdown.
    pub fn run<D: PanelDriver>(
        &self,
        session: &mut PanelSession<D>,
        source: &dyn ImageSource,
    ) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();
        let result = self.cycle(session, source, &mut report);
        release(session);

        match result {
            Ok(()) => {
                info!(
                    origin = %source.describe(),
                    attempts = report.attempts,
                    bytes = report.bytes_fetched,
                    "frame displayed"
                );
                Ok(report)
            }
            Err(err) => Err(log_failure(err)),
        }
    }

    /// Blanks the panel: init, clear, sleep and shutdown
    pub fn clear_only<D: PanelDriver>(
        &self,
        session: &mut PanelSession<D>,
    ) -> Result<(), PipelineError> {
        let result = self.blank(session);
        release(session);

        match result {
            Ok(()) => {
                info!("panel cleared");
                Ok(())
            }
            Err(err) => Err(log_failure(err)),
        }
    }

    /// Acquires and encodes a frame for `mode` without touching any hardware
    pub fn convert(
        &self,
        source: &dyn ImageSource,
        mode: PanelMode,
    ) -> Result<PanelBuffer, PipelineError> {
        let mut report = RunReport::default();
        let result = self.acquire(source, &mut report).and_then(|bytes| {
            self.checkpoint()?;
            Ok(codec::encode(&bytes, &self.encode_options(mode))?)
        });
        result.map_err(log_failure)
    }

    fn cycle<D: PanelDriver>(
        &self,
        session: &mut PanelSession<D>,
        source: &dyn ImageSource,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        self.checkpoint()?;
        session.init()?;
        info!(mode = ?session.mode(), "panel initialised");

        if self.options.clear_before_display {
            self.checkpoint()?;
            session.clear()?;
            report.cleared = true;
            info!("panel cleared");
        }

        let bytes = self.acquire(source, report)?;

        self.checkpoint()?;
        let buffer = codec::encode(&bytes, &self.encode_options(session.mode()))?;
        info!(len = buffer.len(), "frame encoded");

        self.checkpoint()?;
        session.display(buffer.as_bytes())?;
        info!("frame transmitted");

        // the frame is on the panel, an interrupt only cuts the pause short
        if !self.wait(self.options.settle) {
            info!("interrupted while settling");
        }
        session.sleep()?;
        Ok(())
    }

    fn blank<D: PanelDriver>(&self, session: &mut PanelSession<D>) -> Result<(), PipelineError> {
        self.checkpoint()?;
        session.init()?;
        self.checkpoint()?;
        session.clear()?;
        session.sleep()?;
        Ok(())
    }

    fn acquire(
        &self,
        source: &dyn ImageSource,
        report: &mut RunReport,
    ) -> Result<Vec<u8>, PipelineError> {
        let origin = source.describe();
        let policy = self.options.retry;
        let mut retry = 0;
        loop {
            self.checkpoint()?;
            report.attempts += 1;
            match source.fetch() {
                Ok(bytes) => {
                    info!(%origin, len = bytes.len(), attempt = report.attempts, "frame acquired");
                    report.bytes_fetched = bytes.len();
                    return Ok(bytes);
                }
                Err(err) if err.is_transient() && retry < policy.max_retries => {
                    let delay = policy.delay(retry);
                    warn!(
                        %origin,
                        kind = err.kind(),
                        error = %err,
                        retry = retry + 1,
                        max_retries = policy.max_retries,
                        ?delay,
                        "acquisition failed, retrying"
                    );
                    if !self.wait(delay) {
                        return Err(PipelineError::Interrupted);
                    }
                    retry += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn encode_options(&self, mode: PanelMode) -> EncodeOptions {
        EncodeOptions {
            mode,
            format: self.options.format,
            dither: self.options.dither,
        }
    }

    fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration`, returns false when cancelled on the way
    ///
    /// A duration past what the clock can represent waits until cancelled.
    fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            let step = match deadline {
                Some(deadline) if now >= deadline => return true,
                Some(deadline) => CANCEL_POLL.min(deadline - now),
                None => CANCEL_POLL,
            };
            thread::sleep(step);
        }
    }
}

/// Last step of every cycle: deep sleep where still possible, then give back the handles
fn release<D: PanelDriver>(session: &mut PanelSession<D>) {
    match session.state() {
        PanelState::Initialized | PanelState::Cleared | PanelState::Displaying => {
            if let Err(err) = session.sleep() {
                warn!(error = %err, "could not put the panel to sleep");
            }
        }
        PanelState::Uninitialized
        | PanelState::Sleeping
        | PanelState::Failed
        | PanelState::Released => {}
    }
    session.shutdown(true);
}

fn log_failure(err: PipelineError) -> PipelineError {
    match &err {
        PipelineError::Acquire(source) => error!(
            stage = err.stage().as_str(),
            kind = source.kind(),
            error = %source,
            "display cycle failed"
        ),
        PipelineError::Interrupted => {
            warn!(stage = err.stage().as_str(), "display cycle interrupted")
        }
        PipelineError::Codec(source) => {
            error!(stage = err.stage().as_str(), error = %source, "display cycle failed")
        }
        PipelineError::Session(source) => {
            error!(stage = err.stage().as_str(), error = %source, "display cycle failed")
        }
    }
    err
}
