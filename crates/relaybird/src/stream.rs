//! Resilient stream connection.
//!
//! [`StreamConnector`] owns one long-lived streaming request at a time. It splits
//! the body into newline-delimited records, hands each decoded event to an
//! [`EventHandler`] in wire order, and reconnects with exponential backoff when
//! the connection faults.
//!
//! # State machine
//!
//! ```text
//!  Idle ──start──▶ Connecting ──ok──▶ Streaming ──clean end, reconnect off──▶ Idle
//!                     ▲   │               │
//!                     │   │ fault         │ fault (reconnect on, retries left)
//!                     │   ▼               ▼
//!                     └── Backoff ◀───────┘
//!
//!  any state ──stop()──▶ Stopped
//!  fault with retries exhausted, or unauthorized ──▶ Stopped (error returned)
//! ```
//!
//! A 429 additionally asks the upstream to drop every connection held by the
//! credential before the next attempt, since only one stream per credential
//! is allowed and a lingering one would reject every retry.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::event::{Enrichment, StreamEvent};
use crate::twitter::{Frame, decode_frame};

/// Longest record accepted before the connection is dropped.
pub const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Raw body of a streaming response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

// ============================================================================
// Seams
// ============================================================================

/// Opens the physical streaming connection.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open the stream. Non-success statuses are returned as errors.
    async fn connect(&self) -> Result<ByteStream, StreamError>;

    /// Ask the upstream to drop every connection held by this credential.
    async fn terminate_connections(&self) -> Result<(), StreamError>;
}

/// Receives decoded events, one at a time, in wire order.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: StreamEvent, enrichment: Enrichment);
}

// ============================================================================
// Errors
// ============================================================================

/// Faults raised while connecting to or reading from the stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Connection-level failure (reset, timeout, TLS).
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success response.
    #[error("stream rejected (status {status}): {message}")]
    Http { status: u16, message: String },

    /// 429 from the upstream.
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// Bad or revoked credential.
    #[error("unauthorized (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// The upstream closed the body.
    #[error("stream closed by remote")]
    Closed,

    /// Nothing, not even a heartbeat, arrived in time.
    #[error("no data received for {0:?}")]
    Stalled(Duration),

    /// The stream sent an error record instead of data.
    #[error("stream disconnected: {0}")]
    Disconnected(String),
}

impl StreamError {
    /// Faults that no amount of retrying can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::Unauthorized { .. })
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, StreamError::RateLimited { .. })
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Reconnect behaviour, fixed for the lifetime of a connector.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Reconnect after faults and clean closes.
    pub enabled: bool,
    /// Retries before giving up; negative means unlimited.
    pub max_retries: i64,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: -1,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn is_unlimited(&self) -> bool {
        self.max_retries < 0
    }

    /// Whether `retry_count` failed attempts use up the budget.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        !self.is_unlimited() && i64::from(retry_count) >= self.max_retries
    }

    /// Delay before retry `attempt` (0-indexed):
    /// `min(initial_delay * multiplier^attempt, max_delay)`.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_millis() as f64;

        if !millis.is_finite() || millis >= cap {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }
}

// ============================================================================
// Connection state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Streaming,
    Backoff,
    Stopped,
}

/// State shared between the read loop and any [`StopHandle`].
struct Shared {
    state: Mutex<ConnectionState>,
    cancel: CancellationToken,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` unless a stop already happened.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ConnectionState::Stopped {
            return false;
        }
        if *state != next {
            debug!(from = ?*state, to = ?next, "Stream state change");
        }
        *state = next;
        true
    }

    fn stop(&self) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, ConnectionState::Stopped)
        };
        self.cancel.cancel();
        if previous != ConnectionState::Stopped {
            info!(from = ?previous, "Stream stop requested");
        }
    }
}

/// Cloneable handle that stops a connector from another task.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Same as [`StreamConnector::stop`].
    pub fn stop(&self) {
        self.shared.stop();
    }
}

// ============================================================================
// Connector
// ============================================================================

enum ReadOutcome {
    /// The remote ended the body.
    Ended,
    /// `stop()` was called while reading.
    Stopped,
}

/// Keeps a single stream connection alive and feeds its events to a handler.
///
/// A connector is single-use: once stopped, [`StreamConnector::start_stream`]
/// returns immediately.
pub struct StreamConnector<T> {
    transport: T,
    policy: RetryPolicy,
    stall_timeout: Duration,
    max_line_bytes: usize,
    shared: Arc<Shared>,
    retry_count: AtomicU32,
}

impl<T: StreamTransport> StreamConnector<T> {
    pub fn new(transport: T, policy: RetryPolicy, stall_timeout: Duration) -> Self {
        Self {
            transport,
            policy,
            stall_timeout,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Idle),
                cancel: CancellationToken::new(),
            }),
            retry_count: AtomicU32::new(0),
        }
    }

    /// Override the pending-line limit (default [`DEFAULT_MAX_LINE_BYTES`]).
    #[must_use]
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Failed attempts since the last successful connection.
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: self.shared.clone(),
        }
    }

    /// Tear down the current connection and prevent further reconnects.
    ///
    /// An in-flight handler call finishes; no new one starts. Idempotent.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Run the stream until stopped, cleanly ended with reconnect disabled, or
    /// failed fatally.
    ///
    /// Returns `Ok(())` after `stop()` or a clean end, and the original fault
    /// when retries are exhausted or the credential is rejected.
    pub async fn start_stream<H>(&self, handler: &H) -> Result<(), StreamError>
    where
        H: EventHandler + ?Sized,
    {
        loop {
            if !self.shared.transition(ConnectionState::Connecting) {
                return Ok(());
            }
            info!(retry_count = self.retry_count(), "Connecting to stream");

            let connected = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return Ok(()),
                result = self.transport.connect() => result,
            };

            let fault = match connected {
                Ok(body) => {
                    if !self.shared.transition(ConnectionState::Streaming) {
                        return Ok(());
                    }
                    self.retry_count.store(0, Ordering::SeqCst);
                    info!("Stream connected");

                    match self.read(body, handler).await {
                        Ok(ReadOutcome::Stopped) => return Ok(()),
                        Ok(ReadOutcome::Ended) if !self.policy.enabled => {
                            self.shared.transition(ConnectionState::Idle);
                            info!("Stream ended and reconnect is disabled");
                            return Ok(());
                        }
                        Ok(ReadOutcome::Ended) => StreamError::Closed,
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            if !self.back_off(fault).await? {
                return Ok(());
            }
        }
    }

    /// Decide what to do after a fault.
    ///
    /// Returns `Ok(true)` to reconnect, `Ok(false)` if stopped while waiting,
    /// and the fault itself when it is terminal.
    async fn back_off(&self, fault: StreamError) -> Result<bool, StreamError> {
        if fault.is_fatal() {
            error!(error = %fault, "Stream credential rejected");
            self.shared.stop();
            return Err(fault);
        }
        if !self.policy.enabled {
            error!(error = %fault, "Stream failed and reconnect is disabled");
            self.shared.stop();
            return Err(fault);
        }

        if fault.is_rate_limit() {
            self.clear_remote_connections().await;
        }

        let retry_count = self.retry_count();
        if self.policy.is_exhausted(retry_count) {
            error!(
                retries = retry_count,
                max_retries = self.policy.max_retries,
                error = %fault,
                "Stream reconnect retries exhausted"
            );
            self.shared.stop();
            return Err(fault);
        }

        let delay = self.policy.delay_for(retry_count);
        self.retry_count.store(retry_count + 1, Ordering::SeqCst);
        if !self.shared.transition(ConnectionState::Backoff) {
            return Ok(false);
        }
        warn!(
            attempt = retry_count + 1,
            delay_ms = delay.as_millis() as u64,
            error = %fault,
            "Stream fault, reconnecting after delay"
        );

        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Ok(false),
            _ = tokio::time::sleep(delay) => Ok(true),
        }
    }

    /// Best-effort: failures are logged and otherwise ignored.
    async fn clear_remote_connections(&self) {
        match self.transport.terminate_connections().await {
            Ok(()) => info!("Terminated lingering stream connections after rate limit"),
            Err(e) => warn!(error = %e, "Failed to terminate stream connections"),
        }
    }

    async fn read<H>(&self, mut body: ByteStream, handler: &H) -> Result<ReadOutcome, StreamError>
    where
        H: EventHandler + ?Sized,
    {
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return Ok(ReadOutcome::Stopped),
                next = tokio::time::timeout(self.stall_timeout, body.next()) => next,
            };

            let chunk = match next {
                Err(_) => return Err(StreamError::Stalled(self.stall_timeout)),
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                self.dispatch_line(&line, handler).await?;
                if self.shared.cancel.is_cancelled() {
                    return Ok(ReadOutcome::Stopped);
                }
            }

            if buffer.len() > self.max_line_bytes {
                return Err(StreamError::Disconnected(format!(
                    "record exceeds {} bytes without a newline",
                    self.max_line_bytes
                )));
            }
        }

        if !buffer.is_empty() {
            self.dispatch_line(&buffer, handler).await?;
        }
        Ok(ReadOutcome::Ended)
    }

    async fn dispatch_line<H>(&self, line: &[u8], handler: &H) -> Result<(), StreamError>
    where
        H: EventHandler + ?Sized,
    {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        match decode_frame(text) {
            Ok(Frame::Event(parsed)) => {
                if self.shared.cancel.is_cancelled() {
                    return Ok(());
                }
                let parsed = *parsed;
                debug!(event_id = %parsed.event.id, "Stream event received");
                handler.on_event(parsed.event, parsed.enrichment).await;
            }
            Ok(Frame::Heartbeat) => {}
            Ok(Frame::Fault(detail)) => return Err(StreamError::Disconnected(detail)),
            Err(e) => warn!(error = %e, line = %text, "Skipping undecodable stream record"),
        }
        Ok(())
    }
}
