//! State Classifier
//!
//! Maps a captured frame to a coarse [`SystemState`] with a confidence score.
//! The default [`NullClassifier`] always answers `Unknown` with zero
//! confidence; real recognition is a pluggable capability. Callers must treat
//! `Unknown` as "nothing can safely be done automatically" and fall back to
//! time-based progression.
//!
//! ## Keyword detection
//!
//! [`KeywordClassifier`] runs an external [`TextRecognizer`] (OCR) over the
//! frame and scores the text against ordered indicator tables. Each matched
//! indicator halves the remaining doubt: one hit is 0.5, two are 0.75.
//! Ties go to the state listed first.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::error::{Error, Result};
use crate::frame::RawFrame;
use crate::session::RemoteSession;

// ========== Labels ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    FirmwareSetup,
    BootLoader,
    #[serde(rename = "os_loading")]
    OSLoading,
    LoginScreen,
    Desktop,
    LockScreen,
    TextConsole,
    Unknown,
}

impl SystemState {
    pub const ALL: [SystemState; 8] = [
        SystemState::FirmwareSetup,
        SystemState::BootLoader,
        SystemState::OSLoading,
        SystemState::LoginScreen,
        SystemState::Desktop,
        SystemState::LockScreen,
        SystemState::TextConsole,
        SystemState::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::FirmwareSetup => "firmware_setup",
            SystemState::BootLoader => "boot_loader",
            SystemState::OSLoading => "os_loading",
            SystemState::LoginScreen => "login_screen",
            SystemState::Desktop => "desktop",
            SystemState::LockScreen => "lock_screen",
            SystemState::TextConsole => "text_console",
            SystemState::Unknown => "unknown",
        }
    }

    /// Parse a state name; `"uefi_bios"`/`"bios"` are accepted for `FirmwareSetup`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "uefi_bios" | "bios" | "uefi" | "firmware" => return Ok(SystemState::FirmwareSetup),
            "login" => return Ok(SystemState::LoginScreen),
            "console" | "prompt" => return Ok(SystemState::TextConsole),
            _ => {}
        }
        SystemState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::invalid(format!("unknown system state: {}", s)))
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Windows,
    #[serde(rename = "macos")]
    MacOs,
    Unknown,
}

impl OsType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "linux" => Ok(OsType::Linux),
            "windows" | "win" => Ok(OsType::Windows),
            "macos" | "mac" | "osx" => Ok(OsType::MacOs),
            "unknown" | "" => Ok(OsType::Unknown),
            other => Err(Error::invalid(format!("unknown os type: {}", other))),
        }
    }
}

/// Top-level firmware setup menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareMenu {
    Main,
    Advanced,
    Boot,
    Security,
    SaveExit,
    Unknown,
}

/// A label with a confidence in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection<T> {
    pub label: T,
    pub confidence: f32,
}

impl<T> Detection<T> {
    pub fn new(label: T, confidence: f32) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

pub type Classification = Detection<SystemState>;

// ========== Capability ==========

#[async_trait]
pub trait StateClassifier: Send + Sync {
    async fn classify(&self, frame: &RawFrame) -> Classification;

    async fn detect_os(&self, _frame: &RawFrame) -> Detection<OsType> {
        Detection::new(OsType::Unknown, 0.0)
    }

    async fn detect_menu(&self, _frame: &RawFrame) -> Detection<FirmwareMenu> {
        Detection::new(FirmwareMenu::Unknown, 0.0)
    }
}

/// Always `Unknown`, zero confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClassifier;

#[async_trait]
impl StateClassifier for NullClassifier {
    async fn classify(&self, _frame: &RawFrame) -> Classification {
        Detection::new(SystemState::Unknown, 0.0)
    }
}

/// Extracts on-screen text from a frame (OCR).
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, frame: &RawFrame) -> Result<String>;
}

// ========== Keyword tables ==========

fn patterns(list: &[&str]) -> Vec<Regex> {
    list.iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
        .collect()
}

static STATE_INDICATORS: Lazy<Vec<(SystemState, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            SystemState::FirmwareSetup,
            patterns(&[
                r"\bBIOS\b",
                r"\bUEFI\b",
                r"Setup Utility",
                r"Boot Menu",
                r"F10\W{0,3}Save",
            ]),
        ),
        (
            SystemState::BootLoader,
            patterns(&[r"GNU GRUB", r"\bGRUB\b", r"Windows Boot Manager", r"GNU/Linux"]),
        ),
        (
            SystemState::TextConsole,
            patterns(&[
                r"(?m)\blogin:\s*$",
                r"(?m)^Password:\s*$",
                r"(?m)[\w~\]]\s?[$#]\s*$",
            ]),
        ),
        (
            SystemState::LockScreen,
            patterns(&[r"\bLocked\b", r"\bUnlock\b", r"Lock screen", r"锁定", r"输入密码"]),
        ),
        (
            SystemState::LoginScreen,
            patterns(&[r"\bSign in\b", r"\bLog in\b", r"\bUser ?name\b", r"\bPassword\b", r"登录", r"用户名"]),
        ),
        (
            SystemState::Desktop,
            patterns(&[r"\bDesktop\b", r"\bTaskbar\b", r"\bRecycle Bin\b", r"\bActivities\b", r"桌面", r"任务栏"]),
        ),
        (
            SystemState::OSLoading,
            patterns(&[r"\bLoading\b", r"\bStarting\b", r"Please wait", r"\bBooting\b"]),
        ),
    ]
});

static OS_INDICATORS: Lazy<Vec<(OsType, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            OsType::Windows,
            patterns(&[r"\bWindows\b", r"\bMicrosoft\b", r"Ctrl\s*\+\s*Alt\s*\+\s*Del"]),
        ),
        (OsType::MacOs, patterns(&[r"\bmacOS\b", r"\bFinder\b", r"\bApple\b"])),
        (
            OsType::Linux,
            patterns(&[
                r"\bLinux\b",
                r"\bUbuntu\b",
                r"\bDebian\b",
                r"\bFedora\b",
                r"\bCentOS\b",
                r"\bGNOME\b",
            ]),
        ),
    ]
});

static MENU_INDICATORS: Lazy<Vec<(FirmwareMenu, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            FirmwareMenu::SaveExit,
            patterns(&[r"Save\s*&\s*Exit", r"Save Changes", r"Discard Changes"]),
        ),
        (
            FirmwareMenu::Boot,
            patterns(&[r"Boot Priority", r"Boot Order", r"Boot Mode", r"Boot Option #\d"]),
        ),
        (
            FirmwareMenu::Security,
            patterns(&[r"Secure Boot", r"Administrator Password", r"\bSecurity\b"]),
        ),
        (
            FirmwareMenu::Advanced,
            patterns(&[r"CPU Configuration", r"\bChipset\b", r"Virtuali[sz]ation", r"\bAdvanced\b"]),
        ),
        (
            FirmwareMenu::Main,
            patterns(&[r"System Overview", r"System Information", r"System Date", r"System Time"]),
        ),
    ]
});

/// Best label from `table` for `text`; `fallback` when nothing matches.
fn score<T: Copy>(table: &[(T, Vec<Regex>)], text: &str, fallback: T) -> Detection<T> {
    let mut best: Option<(T, usize)> = None;
    for (label, regexes) in table {
        let hits = regexes.iter().filter(|r| r.is_match(text)).count();
        if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
            best = Some((*label, hits));
        }
    }
    match best {
        Some((label, hits)) => Detection::new(label, 1.0 - 0.5f32.powi(hits as i32)),
        None => Detection::new(fallback, 0.0),
    }
}

/// Scores recognized text against keyword tables.
pub struct KeywordClassifier<R> {
    recognizer: R,
    min_confidence: f32,
}

impl<R: TextRecognizer> KeywordClassifier<R> {
    pub fn new(recognizer: R) -> Self {
        Self {
            recognizer,
            min_confidence: 0.5,
        }
    }

    /// Detections below `min` are reported as `Unknown`.
    pub fn with_min_confidence(mut self, min: f32) -> Self {
        self.min_confidence = min;
        self
    }

    async fn text(&self, frame: &RawFrame) -> Option<String> {
        match self.recognizer.recognize(frame).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(error = %e, "Text recognition failed");
                None
            }
        }
    }

    fn gate<T>(&self, d: Detection<T>, unknown: T) -> Detection<T> {
        if d.confidence < self.min_confidence {
            Detection::new(unknown, 0.0)
        } else {
            d
        }
    }

    pub fn classify_text(&self, text: &str) -> Classification {
        self.gate(
            score(&STATE_INDICATORS, text, SystemState::Unknown),
            SystemState::Unknown,
        )
    }
}

#[async_trait]
impl<R: TextRecognizer> StateClassifier for KeywordClassifier<R> {
    async fn classify(&self, frame: &RawFrame) -> Classification {
        match self.text(frame).await {
            Some(text) => self.classify_text(&text),
            None => Detection::new(SystemState::Unknown, 0.0),
        }
    }

    async fn detect_os(&self, frame: &RawFrame) -> Detection<OsType> {
        match self.text(frame).await {
            Some(text) => self.gate(score(&OS_INDICATORS, &text, OsType::Unknown), OsType::Unknown),
            None => Detection::new(OsType::Unknown, 0.0),
        }
    }

    async fn detect_menu(&self, frame: &RawFrame) -> Detection<FirmwareMenu> {
        match self.text(frame).await {
            Some(text) => self.gate(
                score(&MENU_INDICATORS, &text, FirmwareMenu::Unknown),
                FirmwareMenu::Unknown,
            ),
            None => Detection::new(FirmwareMenu::Unknown, 0.0),
        }
    }
}

// ========== Polling ==========

/// Source of fresh frames for polling loops.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    fn label(&self) -> &str;

    async fn capture_frame(&self, timeout: Duration) -> Result<Arc<RawFrame>>;
}

#[async_trait]
impl ScreenSource for RemoteSession {
    fn label(&self) -> &str {
        self.name()
    }

    async fn capture_frame(&self, timeout: Duration) -> Result<Arc<RawFrame>> {
        self.capture_with_timeout(timeout).await
    }
}

/// Budget for [`wait_for_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Bound on each individual capture.
    pub capture_timeout: Duration,
    /// Consecutive failed polls before backing off.
    pub retry_budget: u32,
    pub backoff: Duration,
}

impl WaitOptions {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
            ..Self::default()
        }
    }

    pub fn from_polling(polling: &PollingConfig, timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Duration::from_secs(polling.poll_interval_secs),
            capture_timeout: Duration::from_secs(polling.capture_timeout_secs),
            retry_budget: polling.retry_budget,
            backoff: Duration::from_secs(polling.backoff_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::from_polling(&PollingConfig::default(), Duration::from_secs(120))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WaitOutcome {
    Reached {
        state: SystemState,
        confidence: f32,
        #[serde(with = "duration_secs")]
        elapsed: Duration,
        polls: u32,
    },
    TimedOut {
        last_state: SystemState,
        #[serde(with = "duration_secs")]
        elapsed: Duration,
        polls: u32,
        failed_polls: u32,
    },
}

impl WaitOutcome {
    pub fn reached(&self) -> bool {
        matches!(self, WaitOutcome::Reached { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            WaitOutcome::Reached { elapsed, .. } | WaitOutcome::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

pub(crate) mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Poll capture + classify until one of `targets` is seen or the timeout passes.
///
/// A failed poll counts as "not yet"; after `retry_budget` consecutive
/// failures the loop pauses for `backoff` instead of `poll_interval`. Only a
/// disconnected or lost session ends the loop early (as an error). A
/// timed-out result is returned no earlier than `timeout` and no later than
/// `timeout + poll_interval`.
pub async fn wait_for_state(
    screen: &dyn ScreenSource,
    classifier: &dyn StateClassifier,
    targets: &[SystemState],
    options: &WaitOptions,
) -> Result<WaitOutcome> {
    let start = Instant::now();
    let deadline = start + options.timeout;
    let mut polls = 0u32;
    let mut failed_polls = 0u32;
    let mut consecutive_failures = 0u32;
    let mut last_state = SystemState::Unknown;

    info!(
        session = %screen.label(),
        targets = ?targets,
        timeout_secs = options.timeout.as_secs_f64(),
        "Waiting for state"
    );

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let remaining = deadline - now;
        polls += 1;

        let pause = match screen.capture_frame(options.capture_timeout.min(remaining)).await {
            Ok(frame) => {
                consecutive_failures = 0;
                let classification =
                    match tokio::time::timeout(remaining, classifier.classify(&frame)).await {
                        Ok(c) => c,
                        Err(_) => Detection::new(SystemState::Unknown, 0.0),
                    };
                last_state = classification.label;
                if targets.contains(&classification.label) {
                    let elapsed = start.elapsed();
                    info!(
                        session = %screen.label(),
                        state = %classification.label,
                        confidence = classification.confidence,
                        polls,
                        "State reached"
                    );
                    return Ok(WaitOutcome::Reached {
                        state: classification.label,
                        confidence: classification.confidence,
                        elapsed,
                        polls,
                    });
                }
                options.poll_interval
            }
            Err(e) if e.ends_polling() => return Err(e),
            Err(e) => {
                failed_polls += 1;
                consecutive_failures += 1;
                warn!(
                    session = %screen.label(),
                    error = %e,
                    consecutive = consecutive_failures,
                    "Poll capture failed"
                );
                if consecutive_failures >= options.retry_budget.max(1) {
                    consecutive_failures = 0;
                    options.backoff
                } else {
                    options.poll_interval
                }
            }
        };

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(pause.min(deadline - now)).await;
    }

    let elapsed = start.elapsed();
    info!(
        session = %screen.label(),
        last_state = %last_state,
        polls,
        failed_polls,
        "Wait for state timed out"
    );
    Ok(WaitOutcome::TimedOut {
        last_state,
        elapsed,
        polls,
        failed_polls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::pool::WorkerPool;
    use crate::session::SessionTiming;
    use crate::testing::{MockConnector, ScriptedClassifier};

    struct FixedText(&'static str);

    #[async_trait]
    impl TextRecognizer for FixedText {
        async fn recognize(&self, _frame: &RawFrame) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingText;

    #[async_trait]
    impl TextRecognizer for FailingText {
        async fn recognize(&self, _frame: &RawFrame) -> Result<String> {
            Err(Error::Capture("ocr offline".into()))
        }
    }

    async fn session(connector: &Arc<MockConnector>) -> RemoteSession {
        let session = RemoteSession::new(
            "lab",
            SessionConfig::default(),
            connector.clone(),
            WorkerPool::new(2),
            SessionTiming::immediate(),
        );
        session.connect().await.unwrap();
        session
    }

    fn fast(timeout_ms: u64, interval_ms: u64) -> WaitOptions {
        WaitOptions {
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(interval_ms),
            capture_timeout: Duration::from_millis(100),
            retry_budget: 3,
            backoff: Duration::from_millis(interval_ms * 4),
        }
    }

    #[test]
    fn test_state_names() {
        for state in SystemState::ALL {
            assert_eq!(SystemState::parse(state.as_str()).unwrap(), state);
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
        assert_eq!(SystemState::parse("uefi_bios").unwrap(), SystemState::FirmwareSetup);
        assert!(SystemState::parse("hibernating").is_err());
        assert_eq!(OsType::parse("Windows").unwrap(), OsType::Windows);
        assert_eq!(serde_json::to_string(&OsType::MacOs).unwrap(), "\"macos\"");
    }

    #[tokio::test]
    async fn test_null_classifier_is_unknown() {
        let frame = RawFrame::solid(4, 4, [0, 0, 0]);
        let c = NullClassifier.classify(&frame).await;
        assert_eq!(c.label, SystemState::Unknown);
        assert_eq!(c.confidence, 0.0);
        assert_eq!(NullClassifier.detect_os(&frame).await.label, OsType::Unknown);
        assert_eq!(NullClassifier.detect_menu(&frame).await.label, FirmwareMenu::Unknown);
    }

    #[test]
    fn test_keyword_states() {
        let k = KeywordClassifier::new(FixedText(""));
        let grub = "GNU GRUB  version 2.06\n*Ubuntu\n Advanced options for Ubuntu";
        assert_eq!(k.classify_text(grub).label, SystemState::BootLoader);

        let console = "Ubuntu 22.04 LTS lab tty1\n\nlab login: ";
        let c = k.classify_text(console);
        assert_eq!(c.label, SystemState::TextConsole);
        assert_eq!(c.confidence, 0.5);

        let bios = "Aptio Setup Utility - Copyright (C) American Megatrends\nBIOS Information\nF10: Save & Exit";
        let c = k.classify_text(bios);
        assert_eq!(c.label, SystemState::FirmwareSetup);
        assert!(c.confidence >= 0.875);

        let shell = "root@lab:~# ";
        assert_eq!(k.classify_text(shell).label, SystemState::TextConsole);

        assert_eq!(k.classify_text("").label, SystemState::Unknown);
    }

    #[test]
    fn test_min_confidence_gate() {
        let k = KeywordClassifier::new(FixedText("")).with_min_confidence(0.7);
        let c = k.classify_text("Loading kernel");
        assert_eq!(c.label, SystemState::Unknown);
        assert_eq!(c.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_keyword_detect_os_and_menu() {
        let frame = RawFrame::solid(2, 2, [0, 0, 0]);
        let k = KeywordClassifier::new(FixedText("Boot Priority Order\nBoot Option #1 [USB]\nBoot Mode [UEFI]"));
        assert_eq!(k.detect_menu(&frame).await.label, FirmwareMenu::Boot);

        let k = KeywordClassifier::new(FixedText("Press Ctrl+Alt+Del to unlock\nWindows Server 2022"));
        assert_eq!(k.detect_os(&frame).await.label, OsType::Windows);

        let k = KeywordClassifier::new(FailingText);
        assert_eq!(k.classify(&frame).await.label, SystemState::Unknown);
    }

    #[tokio::test]
    async fn test_wait_reaches_target() {
        let connector = Arc::new(MockConnector::new());
        let session = session(&connector).await;
        let classifier = ScriptedClassifier::new(vec![
            SystemState::OSLoading,
            SystemState::OSLoading,
            SystemState::Desktop,
        ]);

        let outcome = wait_for_state(&session, &classifier, &[SystemState::Desktop], &fast(2000, 10))
            .await
            .unwrap();
        match outcome {
            WaitOutcome::Reached { state, polls, .. } => {
                assert_eq!(state, SystemState::Desktop);
                assert_eq!(polls, 3);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_timeout_bounds() {
        let connector = Arc::new(MockConnector::new());
        let session = session(&connector).await;
        let options = fast(200, 50);

        let outcome = wait_for_state(&session, &NullClassifier, &[SystemState::Desktop], &options)
            .await
            .unwrap();
        assert!(!outcome.reached());
        let elapsed = outcome.elapsed();
        assert!(elapsed >= options.timeout, "returned early: {:?}", elapsed);
        assert!(
            elapsed <= options.timeout + options.poll_interval,
            "returned late: {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_wait_tolerates_capture_failures() {
        let connector = Arc::new(MockConnector::new());
        let session = session(&connector).await;
        connector.fail_next_captures(2, Error::Capture("short read".into()));
        let classifier = ScriptedClassifier::new(vec![SystemState::LoginScreen]);

        let outcome = wait_for_state(&session, &classifier, &[SystemState::LoginScreen], &fast(2000, 10))
            .await
            .unwrap();
        assert!(outcome.reached());
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_wait_backs_off_after_budget() {
        let connector = Arc::new(MockConnector::new());
        let session = session(&connector).await;
        connector.fail_all_captures(Some(Error::Capture("no update".into())));
        let options = WaitOptions {
            timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            capture_timeout: Duration::from_millis(50),
            retry_budget: 3,
            backoff: Duration::from_secs(5),
        };

        let outcome = wait_for_state(&session, &NullClassifier, &[SystemState::Desktop], &options)
            .await
            .unwrap();
        match outcome {
            WaitOutcome::TimedOut { polls, failed_polls, elapsed, .. } => {
                // Three quick failures, then the backoff runs into the deadline.
                assert_eq!(polls, 3);
                assert_eq!(failed_polls, 3);
                assert!(elapsed >= options.timeout);
                assert!(elapsed <= options.timeout + options.poll_interval);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_ends_on_disconnect() {
        let connector = Arc::new(MockConnector::new());
        let session = session(&connector).await;
        session.disconnect().await;

        let err = wait_for_state(&session, &NullClassifier, &[SystemState::Desktop], &fast(500, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
    }
}
