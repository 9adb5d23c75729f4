//! Periodic frame streaming for live viewers.
//!
//! A [`FrameStream`] owns a background task that captures, encodes and
//! forwards frames at a fixed interval. Failed captures are reported as
//! [`StreamEvent::Error`] and the task keeps going; after `retry_budget`
//! consecutive failures it pauses for `backoff` and says so with
//! [`StreamEvent::Backoff`]. The task ends when the receiver is dropped,
//! [`FrameStream::stop`] is called (or the handle is dropped), or the session
//! is disconnected.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::ScreenSource;
use crate::config::{PollingConfig, ScreenshotConfig};
use crate::frame::{self, EncodedFrame};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Frame {
        seq: u64,
        #[serde(flatten)]
        frame: EncodedFrame,
    },
    Error {
        message: String,
        code: &'static str,
        consecutive: u32,
    },
    Backoff {
        #[serde(with = "crate::classifier::duration_secs")]
        pause: Duration,
    },
    Closed {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub interval: Duration,
    pub max_width: u32,
    pub quality: u8,
    pub capture_timeout: Duration,
    pub retry_budget: u32,
    pub backoff: Duration,
    /// Events buffered before the stream waits on a slow receiver.
    pub buffer: usize,
}

impl StreamOptions {
    pub fn new(screenshot: &ScreenshotConfig, polling: &PollingConfig, interval: Duration) -> Self {
        Self {
            interval,
            max_width: screenshot.max_width,
            quality: screenshot.quality,
            capture_timeout: Duration::from_secs(polling.capture_timeout_secs),
            retry_budget: polling.retry_budget,
            backoff: Duration::from_secs(polling.backoff_secs),
            buffer: 4,
        }
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::new(
            &ScreenshotConfig::default(),
            &PollingConfig::default(),
            Duration::from_secs(1),
        )
    }
}

pub struct FrameStream {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl FrameStream {
    /// Start streaming from `screen`. Events arrive on the returned receiver.
    pub fn start(
        screen: Arc<dyn ScreenSource>,
        options: StreamOptions,
    ) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (event_tx, event_rx) = mpsc::channel(options.buffer.max(1));
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let label = screen.label().to_string();
            info!(session = %label, interval_ms = options.interval.as_millis() as u64, "Frame stream started");
            tokio::select! {
                reason = stream_loop(screen, &options, &event_tx) => {
                    if let Some(reason) = reason {
                        let _ = event_tx.send(StreamEvent::Closed { reason }).await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = event_tx
                        .send(StreamEvent::Closed { reason: "stopped".to_string() })
                        .await;
                }
            }
            info!(session = %label, "Frame stream ended");
        });

        (Self { shutdown_tx, handle }, event_rx)
    }

    /// Stop the stream and wait for the task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Returns a close reason, or `None` when the receiver went away.
async fn stream_loop(
    screen: Arc<dyn ScreenSource>,
    options: &StreamOptions,
    tx: &mpsc::Sender<StreamEvent>,
) -> Option<String> {
    let mut seq = 0u64;
    let mut consecutive = 0u32;

    loop {
        let pause = match screen.capture_frame(options.capture_timeout).await {
            Ok(raw) => {
                consecutive = 0;
                let (max_width, quality) = (options.max_width, options.quality);
                let encoded =
                    tokio::task::spawn_blocking(move || frame::encode(&raw, max_width, quality))
                        .await;
                let event = match encoded {
                    Ok(Ok(frame)) => {
                        seq += 1;
                        StreamEvent::Frame { seq, frame }
                    }
                    Ok(Err(e)) => StreamEvent::Error {
                        message: e.to_string(),
                        code: e.code(),
                        consecutive: 0,
                    },
                    Err(e) => StreamEvent::Error {
                        message: e.to_string(),
                        code: "worker_error",
                        consecutive: 0,
                    },
                };
                if tx.send(event).await.is_err() {
                    return None;
                }
                options.interval
            }
            Err(e) if e.ends_polling() => {
                debug!(session = %screen.label(), error = %e, "Frame stream source gone");
                return Some(e.to_string());
            }
            Err(e) => {
                consecutive += 1;
                warn!(session = %screen.label(), error = %e, consecutive, "Stream capture failed");
                let event = StreamEvent::Error {
                    message: e.to_string(),
                    code: e.code(),
                    consecutive,
                };
                if tx.send(event).await.is_err() {
                    return None;
                }
                if consecutive >= options.retry_budget.max(1) {
                    consecutive = 0;
                    if tx.send(StreamEvent::Backoff { pause: options.backoff }).await.is_err() {
                        return None;
                    }
                    options.backoff
                } else {
                    options.interval
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = tx.closed() => return None,
        }
    }
}
