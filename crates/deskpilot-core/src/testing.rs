//! Test doubles
//!
//! [`MockConnector`] hands out in-memory displays that record every
//! primitive event in one shared, ordered log. [`RecordingSequencer`] records
//! macro-level calls without touching any display.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{Connector, MouseButton, RemoteDisplay};
use crate::classifier::{Classification, Detection, OsType, StateClassifier, SystemState};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::frame::RawFrame;
use crate::keys::KeyToken;
use crate::sequencer::{Direction, Sequencer};

// ========== Display ==========

/// One primitive call observed by a mock display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Connect(String),
    Capture,
    KeyDown(KeyToken),
    KeyUp(KeyToken),
    Move(u16, u16),
    ButtonDown(MouseButton),
    ButtonUp(MouseButton),
    Close,
}

struct Script {
    refuse: Option<String>,
    frame: RawFrame,
    capture_failures: VecDeque<Error>,
    fail_all_captures: Option<Error>,
    broken: bool,
    delay: Duration,
}

#[derive(Clone)]
struct Shared {
    events: Arc<Mutex<Vec<DisplayEvent>>>,
    script: Arc<Mutex<Script>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn record(&self, event: DisplayEvent) {
        lock(&self.events).push(event);
    }

    /// Apply the scripted delay and report a broken transport.
    fn before_call(&self) -> Result<()> {
        let (delay, broken) = {
            let script = lock(&self.script);
            (script.delay, script.broken)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if broken {
            return Err(Error::ConnectionLost("mock transport broken".to_string()));
        }
        Ok(())
    }
}

/// Scripted [`Connector`] for tests.
pub struct MockConnector {
    shared: Shared,
    connects: AtomicUsize,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Accepts every connection and serves a 64x48 gradient.
    pub fn new() -> Self {
        Self {
            shared: Shared {
                events: Arc::new(Mutex::new(Vec::new())),
                script: Arc::new(Mutex::new(Script {
                    refuse: None,
                    frame: gradient(64, 48),
                    capture_failures: VecDeque::new(),
                    fail_all_captures: None,
                    broken: false,
                    delay: Duration::ZERO,
                })),
            },
            connects: AtomicUsize::new(0),
        }
    }

    pub fn refuse_connections(&self, reason: impl Into<String>) {
        lock(&self.shared.script).refuse = Some(reason.into());
    }

    pub fn allow_connections(&self) {
        lock(&self.shared.script).refuse = None;
    }

    pub fn set_frame(&self, frame: RawFrame) {
        lock(&self.shared.script).frame = frame;
    }

    /// The next `n` captures fail with `err`.
    pub fn fail_next_captures(&self, n: usize, err: Error) {
        let mut script = lock(&self.shared.script);
        for _ in 0..n {
            script.capture_failures.push_back(err.clone());
        }
    }

    /// Every capture fails with `err` until cleared with `None`.
    pub fn fail_all_captures(&self, err: Option<Error>) {
        lock(&self.shared.script).fail_all_captures = err;
    }

    /// Every call on every open display reports a lost connection.
    pub fn break_connections(&self) {
        lock(&self.shared.script).broken = true;
    }

    /// Blocking delay applied to every display call and to connect.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.shared.script).delay = delay;
    }

    pub fn events(&self) -> Vec<DisplayEvent> {
        lock(&self.shared.events).clone()
    }

    pub fn clear_events(&self) {
        lock(&self.shared.events).clear();
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(&self, config: &SessionConfig) -> Result<Box<dyn RemoteDisplay>> {
        let (refuse, delay) = {
            let script = lock(&self.shared.script);
            (script.refuse.clone(), script.delay)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if let Some(reason) = refuse {
            return Err(Error::connection(config.endpoint(), reason));
        }
        {
            let mut script = lock(&self.shared.script);
            script.broken = false;
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.record(DisplayEvent::Connect(config.endpoint()));
        Ok(Box::new(MockDisplay {
            shared: self.shared.clone(),
            closed: false,
        }))
    }
}

struct MockDisplay {
    shared: Shared,
    closed: bool,
}

impl MockDisplay {
    fn check(&self) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionLost("mock display closed".to_string()));
        }
        self.shared.before_call()
    }
}

impl RemoteDisplay for MockDisplay {
    fn capture(&mut self) -> Result<RawFrame> {
        self.check()?;
        let mut script = lock(&self.shared.script);
        if let Some(err) = script.capture_failures.pop_front() {
            return Err(err);
        }
        if let Some(err) = &script.fail_all_captures {
            return Err(err.clone());
        }
        let frame = script.frame.clone();
        drop(script);
        self.shared.record(DisplayEvent::Capture);
        Ok(frame)
    }

    fn key_event(&mut self, key: &KeyToken, down: bool) -> Result<()> {
        self.check()?;
        if key.keysym().is_none() {
            return Err(Error::UnsupportedKey(key.name()));
        }
        self.shared.record(if down {
            DisplayEvent::KeyDown(key.clone())
        } else {
            DisplayEvent::KeyUp(key.clone())
        });
        Ok(())
    }

    fn pointer_move(&mut self, x: u16, y: u16) -> Result<()> {
        self.check()?;
        self.shared.record(DisplayEvent::Move(x, y));
        Ok(())
    }

    fn button(&mut self, button: MouseButton, down: bool) -> Result<()> {
        self.check()?;
        self.shared.record(if down {
            DisplayEvent::ButtonDown(button)
        } else {
            DisplayEvent::ButtonUp(button)
        });
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.record(DisplayEvent::Close);
        }
    }
}

/// Events for `count` full presses of `key`.
pub fn key_presses(key: &KeyToken, count: usize) -> Vec<DisplayEvent> {
    (0..count)
        .flat_map(|_| [DisplayEvent::KeyDown(key.clone()), DisplayEvent::KeyUp(key.clone())])
        .collect()
}

/// Deterministic RGB gradient.
pub fn gradient(width: u32, height: u32) -> RawFrame {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            pixels.push((x * 255 / width.max(1)) as u8);
            pixels.push((y * 255 / height.max(1)) as u8);
            pixels.push(((x ^ y) & 0xff) as u8);
        }
    }
    RawFrame {
        width,
        height,
        pixels,
    }
}

// ========== Sequencer ==========

/// One macro-level call observed by [`RecordingSequencer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerCall {
    Key(KeyToken, u32),
    Type(String),
    Combo(Vec<KeyToken>),
    Navigate(Direction, u32),
    Confirm,
    Cancel,
}

impl SequencerCall {
    pub fn key(name: &str) -> Self {
        SequencerCall::Key(KeyToken::normalize(name), 1)
    }

    pub fn typed(text: &str) -> Self {
        SequencerCall::Type(text.to_string())
    }
}

/// [`Sequencer`] that records calls and can fail on a chosen call.
#[derive(Default)]
pub struct RecordingSequencer {
    calls: Mutex<Vec<SequencerCall>>,
    fail_at: Mutex<Option<(usize, Error)>>,
}

impl RecordingSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The call with 0-based index `index` fails with `err` and is not recorded.
    pub fn fail_at(&self, index: usize, err: Error) {
        *lock(&self.fail_at) = Some((index, err));
    }

    pub fn calls(&self) -> Vec<SequencerCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: SequencerCall) -> Result<()> {
        let mut calls = lock(&self.calls);
        if let Some((index, err)) = lock(&self.fail_at).as_ref() {
            if *index == calls.len() {
                return Err(err.clone());
            }
        }
        calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl Sequencer for RecordingSequencer {
    async fn key(&self, key: &KeyToken, count: u32) -> Result<()> {
        self.record(SequencerCall::Key(key.clone(), count))
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.record(SequencerCall::Type(text.to_string()))
    }

    async fn press_combo(&self, keys: &[KeyToken]) -> Result<()> {
        self.record(SequencerCall::Combo(keys.to_vec()))
    }

    async fn navigate(&self, direction: Direction, steps: u32) -> Result<()> {
        self.record(SequencerCall::Navigate(direction, steps))
    }

    async fn confirm(&self) -> Result<()> {
        self.record(SequencerCall::Confirm)
    }

    async fn cancel(&self) -> Result<()> {
        self.record(SequencerCall::Cancel)
    }
}

// ========== Classifier ==========

/// [`StateClassifier`] that answers from a script, one entry per call.
///
/// The last entry repeats once the script runs out; an empty script answers
/// `Unknown`.
pub struct ScriptedClassifier {
    states: Mutex<VecDeque<SystemState>>,
    last: Mutex<SystemState>,
    os: OsType,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(states: Vec<SystemState>) -> Self {
        Self {
            states: Mutex::new(states.into()),
            last: Mutex::new(SystemState::Unknown),
            os: OsType::Unknown,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_os(mut self, os: OsType) -> Self {
        self.os = os;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateClassifier for ScriptedClassifier {
    async fn classify(&self, _frame: &RawFrame) -> Classification {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = lock(&self.last);
        if let Some(next) = lock(&self.states).pop_front() {
            *last = next;
        }
        let confidence = if *last == SystemState::Unknown { 0.0 } else { 0.9 };
        Detection::new(*last, confidence)
    }

    async fn detect_os(&self, _frame: &RawFrame) -> Detection<OsType> {
        let confidence = if self.os == OsType::Unknown { 0.0 } else { 0.9 };
        Detection::new(self.os, confidence)
    }
}
