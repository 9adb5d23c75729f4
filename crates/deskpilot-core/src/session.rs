//! Remote Session - one live connection to a remote display server
//!
//! State machine: `Disconnected -> Connecting -> Connected -> Disconnected`.
//! There is no automatic reconnect; a fatal transport error drops the
//! connection and later calls fail with `NotConnected` until the owner
//! reconnects or replaces the session.
//!
//! # Concurrency
//! - `io` is held for the whole of every operation, so calls on one session
//!   run one at a time in lock-acquisition order.
//! - The display itself sits behind a std mutex taken inside the worker job.
//!   A caller that times out releases `io`, but the next job still waits for
//!   the abandoned one to finish with the connection.
//! - `snapshot` is only held for field reads/writes and never across I/O.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Connector, MouseButton, RemoteDisplay};
use crate::config::{PacingConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::frame::{self, EncodedFrame, RawFrame};
use crate::keys::KeyToken;
use crate::pool::WorkerPool;

type DisplayHandle = Arc<std::sync::Mutex<Box<dyn RemoteDisplay>>>;

// ========== Types ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Fixed delays applied inside primitive input operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTiming {
    /// Between repeated presses of one key.
    pub key_delay: Duration,
    /// Between a pointer move and the button event that follows it.
    pub pointer_delay: Duration,
    /// Between the two clicks of a double click.
    pub double_click_gap: Duration,
}

impl SessionTiming {
    /// No delays; for tests and scripted backends.
    pub fn immediate() -> Self {
        Self {
            key_delay: Duration::ZERO,
            pointer_delay: Duration::ZERO,
            double_click_gap: Duration::ZERO,
        }
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self::from(&PacingConfig::default())
    }
}

impl From<&PacingConfig> for SessionTiming {
    fn from(p: &PacingConfig) -> Self {
        Self {
            key_delay: Duration::from_millis(p.key_delay_ms),
            pointer_delay: Duration::from_millis(p.pointer_delay_ms),
            double_click_gap: Duration::from_millis(p.double_click_gap_ms),
        }
    }
}

/// Externally visible session status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub connected: bool,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_capture_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_height: Option<u32>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    state: SessionState,
    connection_id: Option<Uuid>,
    connected_at: Option<DateTime<Utc>>,
    last_capture_at: Option<DateTime<Utc>>,
    last_frame: Option<Arc<RawFrame>>,
}

impl Snapshot {
    fn disconnected() -> Self {
        Self {
            state: SessionState::Disconnected,
            connection_id: None,
            connected_at: None,
            last_capture_at: None,
            last_frame: None,
        }
    }
}

// ========== RemoteSession ==========

pub struct RemoteSession {
    name: String,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    pool: WorkerPool,
    timing: SessionTiming,
    io: Mutex<Option<DisplayHandle>>,
    snapshot: RwLock<Snapshot>,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl RemoteSession {
    /// Create a session in the `Disconnected` state.
    pub fn new(
        name: impl Into<String>,
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        pool: WorkerPool,
        timing: SessionTiming,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            connector,
            pool,
            timing,
            io: Mutex::new(None),
            snapshot: RwLock::new(Snapshot::disconnected()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.read_snapshot().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Most recent successful capture, full resolution.
    pub fn last_frame(&self) -> Option<Arc<RawFrame>> {
        self.read_snapshot().last_frame.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let snap = self.read_snapshot();
        SessionStatus {
            name: self.name.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            connected: snap.state == SessionState::Connected,
            state: snap.state,
            connection_id: snap.connection_id.map(|id| id.to_string()),
            connected_at: snap.connected_at,
            last_capture_at: snap.last_capture_at,
            frame_width: snap.last_frame.as_ref().map(|f| f.width),
            frame_height: snap.last_frame.as_ref().map(|f| f.height),
        }
    }

    fn read_snapshot(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn update_snapshot(&self, f: impl FnOnce(&mut Snapshot)) {
        let mut snap = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        f(&mut snap);
    }

    // ---------- lifecycle ----------

    /// Connect. A no-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        if io.is_some() && self.is_connected() {
            return Ok(());
        }

        self.update_snapshot(|s| s.state = SessionState::Connecting);
        info!(session = %self.name, endpoint = %self.config.endpoint(), "Connecting");

        let connector = Arc::clone(&self.connector);
        let config = self.config.clone();
        let attempt = self.pool.run(move || connector.connect(&config));
        let result = match tokio::time::timeout(self.config.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(Error::connection(
                self.config.endpoint(),
                format!("timed out after {:?}", self.config.connect_timeout),
            )),
        };

        match result {
            Ok(display) => {
                *io = Some(Arc::new(std::sync::Mutex::new(display)));
                let id = Uuid::new_v4();
                self.update_snapshot(|s| {
                    *s = Snapshot::disconnected();
                    s.state = SessionState::Connected;
                    s.connection_id = Some(id);
                    s.connected_at = Some(Utc::now());
                });
                info!(session = %self.name, connection_id = %id, "Session connected");
                Ok(())
            }
            Err(e) => {
                self.update_snapshot(|s| s.state = SessionState::Disconnected);
                warn!(session = %self.name, error = %e, "Connect failed");
                Err(match e {
                    Error::Connection { .. } => e,
                    other => Error::connection(self.config.endpoint(), other.to_string()),
                })
            }
        }
    }

    /// Close the connection. Always ends `Disconnected`; safe to repeat.
    pub async fn disconnect(&self) {
        let mut io = self.io.lock().await;
        let handle = io.take();
        self.update_snapshot(|s| s.state = SessionState::Disconnected);
        if let Some(handle) = handle {
            self.close_handle(handle).await;
            info!(session = %self.name, "Session disconnected");
        }
    }

    async fn close_handle(&self, handle: DisplayHandle) {
        let closed = self
            .pool
            .run(move || {
                if let Ok(mut display) = handle.lock() {
                    display.close();
                }
                Ok(())
            })
            .await;
        if let Err(e) = closed {
            warn!(session = %self.name, error = %e, "Close failed");
        }
    }

    /// Run one blocking call against the connection. Caller holds `io`.
    async fn call<T, F>(&self, io: &mut Option<DisplayHandle>, job: F) -> Result<T>
    where
        F: FnOnce(&mut dyn RemoteDisplay) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = match io.as_ref() {
            Some(handle) if self.is_connected() => Arc::clone(handle),
            _ => return Err(Error::NotConnected(self.name.clone())),
        };

        let result = self
            .pool
            .run(move || {
                let mut display = handle
                    .lock()
                    .map_err(|_| Error::ConnectionLost("display lock poisoned".to_string()))?;
                job(&mut **display)
            })
            .await;

        let fatal = match &result {
            Err(e) if e.is_fatal() => {
                warn!(session = %self.name, error = %e, "Connection lost");
                true
            }
            _ => false,
        };
        if fatal {
            self.update_snapshot(|s| s.state = SessionState::Disconnected);
            if let Some(handle) = io.take() {
                self.close_handle(handle).await;
            }
        }
        result
    }

    fn ensure_connected(&self, io: &Option<DisplayHandle>) -> Result<()> {
        if io.is_some() && self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected(self.name.clone()))
        }
    }

    // ---------- capture ----------

    /// Fetch the current framebuffer. Does not retry.
    pub async fn capture(&self) -> Result<Arc<RawFrame>> {
        let mut io = self.io.lock().await;
        let frame = Arc::new(self.call(&mut io, |d| d.capture()).await?);
        self.update_snapshot(|s| {
            s.last_frame = Some(Arc::clone(&frame));
            s.last_capture_at = Some(Utc::now());
        });
        debug!(session = %self.name, width = frame.width, height = frame.height, "Captured");
        Ok(frame)
    }

    /// [`capture`](Self::capture) bounded by `timeout`.
    pub async fn capture_with_timeout(&self, timeout: Duration) -> Result<Arc<RawFrame>> {
        tokio::time::timeout(timeout, self.capture())
            .await
            .map_err(|_| Error::timeout("capture", timeout))?
    }

    /// Capture and encode for transport.
    pub async fn screenshot(&self, max_width: u32, quality: u8) -> Result<EncodedFrame> {
        let raw = self.capture().await?;
        tokio::task::spawn_blocking(move || frame::encode(&raw, max_width, quality)).await?
    }

    // ---------- keyboard ----------

    /// Press and release `key` `repeat` times, `key_delay` apart.
    /// `repeat == 0` sends nothing.
    pub async fn send_key(&self, key: &KeyToken, repeat: u32) -> Result<()> {
        let mut io = self.io.lock().await;
        self.ensure_connected(&io)?;
        for i in 0..repeat {
            if i > 0 {
                pause(self.timing.key_delay).await;
            }
            let key = key.clone();
            self.call(&mut io, move |d| {
                d.key_event(&key, true)?;
                d.key_event(&key, false)
            })
            .await?;
        }
        debug!(session = %self.name, key = %key, repeat, "Key sent");
        Ok(())
    }

    pub async fn key_down(&self, key: &KeyToken) -> Result<()> {
        let mut io = self.io.lock().await;
        let key = key.clone();
        self.call(&mut io, move |d| d.key_event(&key, true)).await
    }

    pub async fn key_up(&self, key: &KeyToken) -> Result<()> {
        let mut io = self.io.lock().await;
        let key = key.clone();
        self.call(&mut io, move |d| d.key_event(&key, false)).await
    }

    /// Type `text` one key press per character, `char_delay` apart.
    ///
    /// Stops at the first character with no key mapping; characters before it
    /// have already been sent.
    pub async fn type_text(&self, text: &str, char_delay: Duration) -> Result<()> {
        let mut io = self.io.lock().await;
        self.ensure_connected(&io)?;
        for (i, c) in text.chars().enumerate() {
            let key = KeyToken::for_char(c)?;
            if i > 0 {
                pause(char_delay).await;
            }
            self.call(&mut io, move |d| {
                d.key_event(&key, true)?;
                d.key_event(&key, false)
            })
            .await?;
        }
        debug!(session = %self.name, chars = text.chars().count(), "Text typed");
        Ok(())
    }

    /// Press a combination: modifiers down in order, last key pressed,
    /// modifiers released in reverse order.
    pub async fn key_combo(&self, keys: &[KeyToken]) -> Result<()> {
        let Some((last, modifiers)) = keys.split_last() else {
            return Err(Error::invalid("empty key combination"));
        };
        let mut io = self.io.lock().await;
        let modifiers = modifiers.to_vec();
        let last = last.clone();
        self.call(&mut io, move |d| {
            let mut held = Vec::with_capacity(modifiers.len());
            let mut outcome = Ok(());
            for m in &modifiers {
                outcome = d.key_event(m, true);
                if outcome.is_err() {
                    break;
                }
                held.push(m);
            }
            if outcome.is_ok() {
                outcome = d.key_event(&last, true).and_then(|_| d.key_event(&last, false));
            }
            // Release whatever was pressed even if a later event failed.
            for m in held.iter().rev() {
                let released = d.key_event(m, false);
                if outcome.is_ok() {
                    outcome = released;
                }
            }
            outcome
        })
        .await
    }

    // ---------- pointer ----------

    pub async fn move_pointer(&self, x: u16, y: u16) -> Result<()> {
        let mut io = self.io.lock().await;
        self.call(&mut io, move |d| d.pointer_move(x, y)).await
    }

    /// Move to `(x, y)` then click. The move always comes first.
    pub async fn click(&self, x: u16, y: u16, button: MouseButton, double: bool) -> Result<()> {
        let mut io = self.io.lock().await;
        self.call(&mut io, move |d| d.pointer_move(x, y)).await?;
        pause(self.timing.pointer_delay).await;
        let clicks = if double { 2 } else { 1 };
        for i in 0..clicks {
            if i > 0 {
                pause(self.timing.double_click_gap).await;
            }
            self.call(&mut io, move |d| {
                d.button(button, true)?;
                d.button(button, false)
            })
            .await?;
        }
        debug!(session = %self.name, x, y, button = %button, double, "Clicked");
        Ok(())
    }

    /// Move, press, move, release; `pointer_delay` between each step.
    pub async fn drag(&self, from: (u16, u16), to: (u16, u16), button: MouseButton) -> Result<()> {
        let mut io = self.io.lock().await;
        let gap = self.timing.pointer_delay;
        self.call(&mut io, move |d| d.pointer_move(from.0, from.1)).await?;
        pause(gap).await;
        self.call(&mut io, move |d| d.button(button, true)).await?;
        pause(gap).await;
        self.call(&mut io, move |d| d.pointer_move(to.0, to.1)).await?;
        pause(gap).await;
        self.call(&mut io, move |d| d.button(button, false)).await?;
        debug!(session = %self.name, ?from, ?to, "Dragged");
        Ok(())
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}
