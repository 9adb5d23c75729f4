//! Scenario Scripts
//!
//! Named, ordered procedures built from [`Sequencer`] calls, fixed pauses and
//! classifier-gated waits. Every script returns a [`ScenarioResult`]; the
//! first failing step stops the script and its error becomes the result.
//! Nothing is rolled back.
//!
//! Scripts never check that the remote side did what was asked. Captures
//! taken along the way are advisory.
//!
//! A run may carry a deadline. It is checked before each step starts; a step
//! that has started always runs to completion. Pauses and state waits are
//! clipped to the time left.

pub mod firmware;
pub mod system;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classifier::{
    wait_for_state, Classification, NullClassifier, OsType, ScreenSource, StateClassifier,
    SystemState, WaitOptions, WaitOutcome,
};
use crate::error::{Error, Result};
use crate::frame::RawFrame;
use crate::sequencer::{Direction, Pacing, Sequencer, SessionSequencer};
use crate::session::RemoteSession;

// ========== Result ==========

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub scenario: String,
    pub success: bool,
    pub message: String,
    /// Error code of the failing step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub steps: Vec<StepOutcome>,
    #[serde(rename = "elapsedSecs", with = "crate::classifier::duration_secs")]
    pub elapsed: Duration,
    /// Scenario-specific output, e.g. a detected state.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

/// Records steps for one scenario run.
pub struct StepRunner {
    scenario: &'static str,
    steps: Vec<StepOutcome>,
    details: Value,
    start: Instant,
    deadline: Option<Instant>,
    /// Set once a step was refused because the deadline had passed.
    expired: Option<Error>,
}

impl StepRunner {
    pub fn new(scenario: &'static str) -> Self {
        debug!(scenario, "Scenario started");
        Self {
            scenario,
            steps: Vec::new(),
            details: Value::Null,
            start: Instant::now(),
            deadline: None,
            expired: None,
        }
    }

    /// Steps not yet started when `deadline` passes are refused.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run one step and record its outcome.
    ///
    /// Fails with `Timeout` without polling `fut` when the deadline has
    /// passed; the refused step is not recorded.
    pub async fn step<T, F>(&mut self, name: impl Into<String>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let name = name.into();
        if self.deadline.map_or(false, |d| Instant::now() >= d) {
            let err = Error::timeout(
                format!("scenario {} before step '{}'", self.scenario, name),
                self.start.elapsed(),
            );
            warn!(scenario = self.scenario, step = %name, completed = self.steps.len(), "Deadline passed, stopping");
            self.expired = Some(err.clone());
            return Err(err);
        }
        let started = Instant::now();
        let result = fut.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                debug!(scenario = self.scenario, step = %name, elapsed_ms, "Step done");
                self.steps.push(StepOutcome {
                    name,
                    success: true,
                    error: None,
                    elapsed_ms,
                });
            }
            Err(e) => {
                warn!(scenario = self.scenario, step = %name, error = %e, "Step failed");
                self.steps.push(StepOutcome {
                    name,
                    success: false,
                    error: Some(e.to_string()),
                    elapsed_ms,
                });
            }
        }
        result
    }

    pub fn set_details(&mut self, details: Value) {
        self.details = details;
    }

    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }

    /// Build the result. A refused step turns any outcome that swallowed
    /// its error into the timeout.
    pub fn finish(self, outcome: Result<String>) -> ScenarioResult {
        let outcome = match (self.expired, outcome) {
            (Some(err), Ok(_)) => Err(err),
            (_, outcome) => outcome,
        };
        let elapsed = self.start.elapsed();
        let (success, message, code) = match outcome {
            Ok(message) => (true, message, None),
            Err(e) => (false, e.to_string(), Some(e.code())),
        };
        info!(
            scenario = self.scenario,
            success,
            steps = self.steps.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Scenario finished"
        );
        ScenarioResult {
            scenario: self.scenario.to_string(),
            success,
            message,
            code,
            steps: self.steps,
            elapsed,
            details: self.details,
        }
    }
}

// ========== Context ==========

/// Multiplier applied to every fixed scenario pause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioTiming {
    pub scale: f64,
}

impl ScenarioTiming {
    pub fn immediate() -> Self {
        Self { scale: 0.0 }
    }

    pub fn scaled(&self, d: Duration) -> Duration {
        d.mul_f64(self.scale.max(0.0))
    }
}

impl Default for ScenarioTiming {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

/// Everything a scenario needs: input, frames, classification, budgets.
#[derive(Clone)]
pub struct ScenarioContext {
    pub seq: Arc<dyn Sequencer>,
    pub screen: Arc<dyn ScreenSource>,
    pub classifier: Arc<dyn StateClassifier>,
    pub timing: ScenarioTiming,
    /// Template for state waits; each wait substitutes its own timeout.
    pub wait: WaitOptions,
    pub deadline: Option<Instant>,
}

impl ScenarioContext {
    pub fn new(seq: Arc<dyn Sequencer>, screen: Arc<dyn ScreenSource>) -> Self {
        Self {
            seq,
            screen,
            classifier: Arc::new(NullClassifier),
            timing: ScenarioTiming::default(),
            wait: WaitOptions::default(),
            deadline: None,
        }
    }

    /// Context driving `session` through a [`SessionSequencer`].
    pub fn for_session(session: Arc<RemoteSession>, pacing: Pacing) -> Self {
        let seq = Arc::new(SessionSequencer::new(Arc::clone(&session), pacing));
        Self::new(seq, session)
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn StateClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_timing(mut self, timing: ScenarioTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_wait(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Step recorder bound to this context's deadline.
    pub fn runner(&self, scenario: &'static str) -> StepRunner {
        StepRunner::new(scenario).with_deadline(self.deadline)
    }

    fn clip(&self, d: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => d.min(deadline.saturating_duration_since(Instant::now())),
            None => d,
        }
    }

    /// Fixed pause, scaled by [`ScenarioTiming`] and clipped to the deadline.
    pub async fn pause(&self, d: Duration) {
        let d = self.clip(self.timing.scaled(d));
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }

    pub async fn capture(&self) -> Result<Arc<RawFrame>> {
        self.screen.capture_frame(self.wait.capture_timeout).await
    }

    /// Capture once and classify.
    pub async fn classify_now(&self) -> Result<(Arc<RawFrame>, Classification)> {
        let frame = self.capture().await?;
        let classification = self.classifier.classify(&frame).await;
        Ok((frame, classification))
    }

    pub async fn wait_for(&self, targets: &[SystemState], timeout: Duration) -> Result<WaitOutcome> {
        let options = self.wait.clone().with_timeout(self.clip(timeout));
        wait_for_state(self.screen.as_ref(), self.classifier.as_ref(), targets, &options).await
    }
}

pub(crate) fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ========== Catalogue ==========

/// A password that never shows up in `Debug` output or serialized results.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

fn default_entry_key() -> String {
    "f2".to_string()
}

fn one() -> u32 {
    1
}

/// Every scenario the automation core can run, with its parameters.
///
/// Parameters are flattened next to the `id`, e.g.
/// `{"id": "set_boot_order", "devices": ["usb", "disk"]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "id", rename_all = "snake_case")]
pub enum Scenario {
    EnterFirmwareSetup {
        #[serde(default = "default_entry_key", alias = "key")]
        entry_key: String,
    },
    NavigateMenu {
        direction: Direction,
        #[serde(default = "one")]
        steps: u32,
    },
    SelectOption,
    GoBack,
    SetBootOrder {
        devices: Vec<String>,
    },
    EnableVirtualization,
    DisableSecureBoot,
    SaveAndExit,
    DiscardAndExit,
    BootToOs {
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    DetectFirmwareScreen,
    DetectMenu,
    DetectState,
    DetectOs,
    WaitForState {
        state: SystemState,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    WaitForLogin {
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    WaitForDesktop {
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    WaitForPrompt {
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Login {
        #[serde(default)]
        username: String,
        password: Secret,
        /// Skip detection and use this state's login path.
        #[serde(default)]
        state: Option<SystemState>,
        /// Pick the login path by OS instead of by screen state.
        #[serde(default)]
        os: Option<OsType>,
    },
    ExecuteCommand {
        command: String,
    },
    OpenTerminal {
        #[serde(default = "default_os")]
        os: OsType,
    },
    SendShortcut {
        #[serde(alias = "shortcut")]
        combo: String,
    },
}

fn default_os() -> OsType {
    OsType::Linux
}

impl Scenario {
    pub const IDS: [&'static str; 22] = [
        "enter_firmware_setup",
        "navigate_menu",
        "select_option",
        "go_back",
        "set_boot_order",
        "enable_virtualization",
        "disable_secure_boot",
        "save_and_exit",
        "discard_and_exit",
        "boot_to_os",
        "detect_firmware_screen",
        "detect_menu",
        "detect_state",
        "detect_os",
        "wait_for_state",
        "wait_for_login",
        "wait_for_desktop",
        "wait_for_prompt",
        "login",
        "execute_command",
        "open_terminal",
        "send_shortcut",
    ];

    /// Build from a scenario id and a JSON object of parameters.
    pub fn from_parts(id: &str, params: Value) -> Result<Self> {
        let mut object = match params {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(Error::invalid(format!(
                    "scenario params must be an object, got {}",
                    other
                )))
            }
        };
        object.insert("id".to_string(), Value::String(id.to_string()));
        serde_json::from_value(Value::Object(object))
            .map_err(|e| Error::invalid(format!("scenario {}: {}", id, e)))
    }

    pub fn id(&self) -> &'static str {
        match self {
            Scenario::EnterFirmwareSetup { .. } => "enter_firmware_setup",
            Scenario::NavigateMenu { .. } => "navigate_menu",
            Scenario::SelectOption => "select_option",
            Scenario::GoBack => "go_back",
            Scenario::SetBootOrder { .. } => "set_boot_order",
            Scenario::EnableVirtualization => "enable_virtualization",
            Scenario::DisableSecureBoot => "disable_secure_boot",
            Scenario::SaveAndExit => "save_and_exit",
            Scenario::DiscardAndExit => "discard_and_exit",
            Scenario::BootToOs { .. } => "boot_to_os",
            Scenario::DetectFirmwareScreen => "detect_firmware_screen",
            Scenario::DetectMenu => "detect_menu",
            Scenario::DetectState => "detect_state",
            Scenario::DetectOs => "detect_os",
            Scenario::WaitForState { .. } => "wait_for_state",
            Scenario::WaitForLogin { .. } => "wait_for_login",
            Scenario::WaitForDesktop { .. } => "wait_for_desktop",
            Scenario::WaitForPrompt { .. } => "wait_for_prompt",
            Scenario::Login { .. } => "login",
            Scenario::ExecuteCommand { .. } => "execute_command",
            Scenario::OpenTerminal { .. } => "open_terminal",
            Scenario::SendShortcut { .. } => "send_shortcut",
        }
    }
}

fn secs_or(secs: Option<u64>, default: Duration) -> Duration {
    secs.map(Duration::from_secs).unwrap_or(default)
}

/// Dispatch `scenario` to its script.
pub async fn execute(ctx: &ScenarioContext, scenario: &Scenario) -> ScenarioResult {
    match scenario {
        Scenario::EnterFirmwareSetup { entry_key } => {
            firmware::enter_firmware_setup(ctx, entry_key).await
        }
        Scenario::NavigateMenu { direction, steps } => {
            firmware::navigate_menu(ctx, *direction, *steps).await
        }
        Scenario::SelectOption => firmware::select_option(ctx).await,
        Scenario::GoBack => firmware::go_back(ctx).await,
        Scenario::SetBootOrder { devices } => firmware::set_boot_order(ctx, devices).await,
        Scenario::EnableVirtualization => firmware::enable_virtualization(ctx).await,
        Scenario::DisableSecureBoot => firmware::disable_secure_boot(ctx).await,
        Scenario::SaveAndExit => firmware::save_and_exit(ctx).await,
        Scenario::DiscardAndExit => firmware::discard_and_exit(ctx).await,
        Scenario::BootToOs { timeout_secs } => {
            firmware::boot_to_os(ctx, secs_or(*timeout_secs, system::LOGIN_WAIT)).await
        }
        Scenario::DetectFirmwareScreen => firmware::detect_firmware_screen(ctx).await,
        Scenario::DetectMenu => firmware::detect_menu(ctx).await,
        Scenario::DetectState => system::detect_state(ctx).await,
        Scenario::DetectOs => system::detect_os(ctx).await,
        Scenario::WaitForState { state, timeout_secs } => {
            system::wait_for(ctx, *state, secs_or(*timeout_secs, system::LOGIN_WAIT)).await
        }
        Scenario::WaitForLogin { timeout_secs } => {
            system::wait_for_login(ctx, secs_or(*timeout_secs, system::LOGIN_WAIT)).await
        }
        Scenario::WaitForDesktop { timeout_secs } => {
            system::wait_for_desktop(ctx, secs_or(*timeout_secs, system::DESKTOP_WAIT)).await
        }
        Scenario::WaitForPrompt { timeout_secs } => {
            system::wait_for_prompt(ctx, secs_or(*timeout_secs, system::PROMPT_WAIT)).await
        }
        Scenario::Login {
            username,
            password,
            state,
            os,
        } => match (state, os) {
            (Some(state), _) => system::login(ctx, username, password.expose(), Some(*state)).await,
            (None, Some(os)) => system::login_for_os(ctx, *os, username, password.expose()).await,
            (None, None) => system::login_detected(ctx, username, password.expose()).await,
        },
        Scenario::ExecuteCommand { command } => system::execute_command(ctx, command).await,
        Scenario::OpenTerminal { os } => system::open_terminal(ctx, *os).await,
        Scenario::SendShortcut { combo } => system::send_shortcut(ctx, combo).await,
    }
}

/// Run `scenario`, bounded by `timeout` when given.
///
/// The timeout stops the script between steps, never inside one. The result
/// keeps every step that ran; the remote side is left wherever the last of
/// them left it.
pub async fn run(ctx: &ScenarioContext, scenario: &Scenario, timeout: Option<Duration>) -> ScenarioResult {
    info!(session = %ctx.screen.label(), scenario = scenario.id(), "Running scenario");
    match timeout {
        None => execute(ctx, scenario).await,
        Some(limit) => {
            let ctx = ctx.clone().with_deadline(Instant::now() + limit);
            execute(&ctx, scenario).await
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::SessionConfig;
    use crate::pool::WorkerPool;
    use crate::session::SessionTiming;
    use crate::testing::{MockConnector, RecordingSequencer};

    /// A recording sequencer over a connected mock session, no pauses.
    pub async fn context(
        classifier: Arc<dyn StateClassifier>,
    ) -> (Arc<RecordingSequencer>, Arc<MockConnector>, ScenarioContext) {
        let connector = Arc::new(MockConnector::new());
        let session = Arc::new(RemoteSession::new(
            "lab",
            SessionConfig::default(),
            connector.clone(),
            WorkerPool::new(2),
            SessionTiming::immediate(),
        ));
        session.connect().await.unwrap();
        let seq = Arc::new(RecordingSequencer::new());
        let ctx = ScenarioContext::new(seq.clone(), session)
            .with_classifier(classifier)
            .with_timing(ScenarioTiming::immediate())
            .with_wait(WaitOptions {
                timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(10),
                capture_timeout: Duration::from_millis(100),
                retry_budget: 3,
                backoff: Duration::from_millis(40),
            });
        (seq, connector, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::context;
    use super::*;
    use crate::config::SessionConfig;
    use crate::keys::KeyToken;
    use crate::pool::WorkerPool;
    use crate::session::SessionTiming;
    use crate::testing::{DisplayEvent, MockConnector, SequencerCall};
    use serde_json::json;

    #[test]
    fn test_scenario_from_parts() {
        let s = Scenario::from_parts("set_boot_order", json!({"devices": ["usb", "disk"]})).unwrap();
        assert_eq!(
            s,
            Scenario::SetBootOrder {
                devices: vec!["usb".into(), "disk".into()]
            }
        );

        let s = Scenario::from_parts("enter_firmware_setup", Value::Null).unwrap();
        assert_eq!(s, Scenario::EnterFirmwareSetup { entry_key: "f2".into() });

        let s = Scenario::from_parts("save_and_exit", json!({})).unwrap();
        assert_eq!(s.id(), "save_and_exit");

        let s = Scenario::from_parts("wait_for_desktop", json!({"timeout_secs": 30})).unwrap();
        assert_eq!(s, Scenario::WaitForDesktop { timeout_secs: Some(30) });

        assert!(Scenario::from_parts("reformat_disk", json!({})).is_err());
        assert!(Scenario::from_parts("set_boot_order", json!([1, 2])).is_err());
        assert!(Scenario::from_parts("navigate_menu", json!({"direction": "sideways"})).is_err());
    }

    #[test]
    fn test_ids_cover_catalogue() {
        for id in Scenario::IDS {
            let params = match id {
                "navigate_menu" => json!({"direction": "down"}),
                "set_boot_order" => json!({"devices": []}),
                "wait_for_state" => json!({"state": "desktop"}),
                "login" => json!({"username": "root", "password": "pw"}),
                "execute_command" => json!({"command": "ls"}),
                "send_shortcut" => json!({"combo": "ctrl+c"}),
                _ => json!({}),
            };
            let scenario = Scenario::from_parts(id, params).unwrap();
            assert_eq!(scenario.id(), id);
        }
    }

    #[test]
    fn test_password_is_redacted() {
        let s = Scenario::from_parts("login", json!({"username": "root", "password": "hunter2"})).unwrap();
        let debug = format!("{:?}", s);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }

    #[tokio::test]
    async fn test_first_failing_step_stops_scenario() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;
        seq.fail_at(1, Error::ConnectionLost("reset by peer".into()));

        let result = run(&ctx, &Scenario::SaveAndExit, None).await;
        assert!(!result.success);
        assert_eq!(result.code, Some("connection_lost"));
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps[0].success);
        assert!(!result.steps[1].success);
        assert_eq!(seq.calls(), vec![SequencerCall::Key(KeyToken::F(10), 1)]);
    }

    #[tokio::test]
    async fn test_run_timeout_stops_between_steps() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;
        let ctx = ctx.with_timing(ScenarioTiming::default());

        let result = run(&ctx, &Scenario::SaveAndExit, Some(Duration::from_millis(50))).await;
        assert!(!result.success);
        assert_eq!(result.code, Some("timeout"));
        assert!(result.elapsed < Duration::from_millis(900));
        // F10 ran before the deadline and stays recorded; Enter never started
        assert_eq!(result.steps.len(), 1);
        assert!(result.steps[0].success);
        assert_eq!(seq.calls(), vec![SequencerCall::Key(KeyToken::F(10), 1)]);
    }

    #[tokio::test]
    async fn test_run_timeout_lets_started_step_finish() {
        let connector = Arc::new(MockConnector::new());
        let session = Arc::new(RemoteSession::new(
            "lab",
            SessionConfig::default(),
            connector.clone(),
            WorkerPool::new(2),
            SessionTiming::immediate(),
        ));
        session.connect().await.unwrap();
        connector.clear_events();
        let pacing = Pacing {
            char_delay: Duration::from_millis(20),
            ..Pacing::immediate()
        };
        let ctx = ScenarioContext::for_session(session, pacing).with_timing(ScenarioTiming::immediate());
        let command = "echo hello world";
        assert_eq!(command.chars().count(), 16);

        let scenario = Scenario::ExecuteCommand {
            command: command.to_string(),
        };
        let result = run(&ctx, &scenario, Some(Duration::from_millis(100))).await;

        assert!(!result.success);
        assert_eq!(result.code, Some("timeout"));
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].name, "type command");
        assert!(result.steps[0].success);

        let downs: Vec<_> = connector
            .events()
            .into_iter()
            .filter_map(|e| match e {
                DisplayEvent::KeyDown(k) => Some(k),
                _ => None,
            })
            .collect();
        assert_eq!(downs.len(), 16);
        assert!(!downs.contains(&KeyToken::Enter));
    }

    #[tokio::test]
    async fn test_run_without_deadline_pressure_succeeds() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let result = run(&ctx, &Scenario::SaveAndExit, Some(Duration::from_secs(5))).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(seq.calls().len(), 2);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let mut runner = StepRunner::new("demo");
        runner.set_details(json!({"state": "desktop"}));
        let result = runner.finish(Ok("done".into()));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["details"]["state"], "desktop");
        assert!(value.get("elapsedSecs").is_some());
        assert!(value.get("code").is_none());
    }
}
