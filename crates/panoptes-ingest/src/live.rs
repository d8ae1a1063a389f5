//! Live network sources with reconnect-and-backoff.

use async_trait::async_trait;
use chrono::Utc;
use tokio::time;
use tracing::{debug, info, warn};

use panoptes_models::{CameraConfig, CameraId, Frame, FrameId, ReconnectPolicy};

use crate::error::{ConnectionError, ConnectionResult};
use crate::source::FrameSource;

/// Dials a camera uri and yields an established session.
///
/// Implementations wrap whatever transport the camera actually speaks
/// (RTSP, SRT, a test double); the live source only cares that dialing
/// can fail transiently and that sessions can drop mid-stream.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    type Connection: StreamConnection;

    async fn connect(&self, uri: &str) -> ConnectionResult<Self::Connection>;
}

/// An established stream session producing raw frame payloads.
///
/// Dropping a connection releases the session; there is no separate
/// teardown call.
#[async_trait]
pub trait StreamConnection: Send {
    /// Next payload; `Ok(None)` when the remote side ends the stream
    /// cleanly.
    async fn recv_payload(&mut self) -> ConnectionResult<Option<Vec<u8>>>;
}

/// A [`FrameSource`] over a live network stream.
///
/// Transient failures (refused dials, dropped sessions) are absorbed by
/// reconnecting with exponential backoff up to the camera's
/// [`ReconnectPolicy`]; only after the attempt budget is spent does a
/// fatal error surface to the pipeline. Frame sequence numbers keep
/// increasing across reconnects, so downstream consumers can rely on
/// per-camera monotonicity no matter how flaky the network is.
pub struct LiveSource<C: StreamConnector> {
    camera: CameraId,
    uri: String,
    reconnect: ReconnectPolicy,
    connector: C,
    connection: Option<C::Connection>,
    sequence: u64,
    /// Sessions dropped since the last delivered frame. Guards against a
    /// connection that establishes fine but never produces anything.
    barren_reconnects: u32,
    failures: FailureWindow,
}

impl<C: StreamConnector> LiveSource<C> {
    pub fn new(config: &CameraConfig, connector: C) -> Self {
        Self {
            camera: config.id.clone(),
            uri: config.uri.clone(),
            reconnect: config.reconnect.clone(),
            connector,
            connection: None,
            sequence: 0,
            barren_reconnects: 0,
            failures: FailureWindow::default(),
        }
    }

    /// Dial until connected or the attempt budget is spent.
    async fn establish(&mut self) -> ConnectionResult<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.connector.connect(&self.uri).await {
                Ok(connection) => {
                    let prior_failures = self.failures.reset();
                    if prior_failures > 0 {
                        info!(
                            camera = %self.camera,
                            failures = prior_failures,
                            "stream connected after retries"
                        );
                    } else {
                        debug!(camera = %self.camera, uri = %self.uri, "stream connected");
                    }
                    self.connection = Some(connection);
                    return Ok(());
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    attempt += 1;
                    metrics::counter!(
                        "panoptes_source_reconnects_total",
                        "camera" => self.camera.to_string()
                    )
                    .increment(1);
                    if attempt >= self.reconnect.max_attempts {
                        return Err(ConnectionError::fatal(&self.uri, attempt, err.reason()));
                    }
                    let delay = self.reconnect.backoff.delay_for_attempt(attempt - 1);
                    if self.failures.record() {
                        warn!(
                            camera = %self.camera,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "connect failed; backing off"
                        );
                    } else {
                        debug!(camera = %self.camera, attempt, error = %err, "connect failed");
                    }
                    time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl<C: StreamConnector> FrameSource for LiveSource<C> {
    async fn next_frame(&mut self) -> ConnectionResult<Option<Frame>> {
        loop {
            let connection = match self.connection.as_mut() {
                Some(connection) => connection,
                None => {
                    self.establish().await?;
                    continue;
                }
            };

            match connection.recv_payload().await {
                Ok(Some(payload)) => {
                    self.barren_reconnects = 0;
                    self.sequence += 1;
                    let frame = Frame::new(
                        FrameId::new(self.camera.clone(), self.sequence),
                        payload,
                        Utc::now(),
                    );
                    return Ok(Some(frame));
                }
                Ok(None) => {
                    info!(camera = %self.camera, frames = self.sequence, "stream ended");
                    self.connection = None;
                    return Ok(None);
                }
                Err(err) if err.is_fatal() => {
                    self.connection = None;
                    return Err(err);
                }
                Err(err) => {
                    self.connection = None;
                    self.barren_reconnects += 1;
                    metrics::counter!(
                        "panoptes_source_reconnects_total",
                        "camera" => self.camera.to_string()
                    )
                    .increment(1);
                    if self.barren_reconnects > self.reconnect.max_attempts {
                        return Err(ConnectionError::fatal(
                            &self.uri,
                            self.barren_reconnects,
                            format!("session keeps dropping before a frame arrives: {}", err.reason()),
                        ));
                    }
                    warn!(camera = %self.camera, error = %err, "stream lost; reconnecting");
                }
            }
        }
    }

    fn camera(&self) -> &CameraId {
        &self.camera
    }

    async fn close(&mut self) {
        if self.connection.take().is_some() {
            debug!(camera = %self.camera, "stream session released");
        }
    }
}

/// Suppresses repeated failure logs during a long outage: the first
/// failure and every fifth after it log at warn, the rest at debug.
#[derive(Debug, Default)]
struct FailureWindow {
    consecutive: u32,
}

impl FailureWindow {
    const LOG_EVERY: u32 = 5;

    /// Count a failure; true when this one deserves a warn-level log.
    fn record(&mut self) -> bool {
        let log = self.consecutive % Self::LOG_EVERY == 0;
        self.consecutive += 1;
        log
    }

    /// Clear the window, returning how many failures it held.
    fn reset(&mut self) -> u32 {
        std::mem::take(&mut self.consecutive)
    }
}
