//! Automation - the call surface exposed to gateways.
//!
//! Wraps one [`SessionRegistry`] together with the process configuration and
//! the state classifier, and resolves every call by session name.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::backend::{Connector, MouseButton};
use crate::classifier::{NullClassifier, StateClassifier, SystemState, WaitOptions, WaitOutcome};
use crate::config::{DeskpilotConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::frame::EncodedFrame;
use crate::keys::{self, KeyToken};
use crate::pool::WorkerPool;
use crate::registry::{RemoveOutcome, SessionRegistry};
use crate::scenario::{self, Scenario, ScenarioContext, ScenarioResult, ScenarioTiming};
use crate::sequencer::Pacing;
use crate::session::{RemoteSession, SessionStatus, SessionTiming};
use crate::stream::{FrameStream, StreamEvent, StreamOptions};

pub struct Automation {
    registry: SessionRegistry,
    config: DeskpilotConfig,
    classifier: Arc<dyn StateClassifier>,
    scenario_timing: ScenarioTiming,
}

impl Automation {
    pub fn new(config: DeskpilotConfig, connector: Arc<dyn Connector>) -> Self {
        let pool = WorkerPool::new(config.worker_threads);
        let registry = SessionRegistry::new(connector, pool, SessionTiming::from(&config.pacing));
        Self {
            registry,
            config,
            classifier: Arc::new(NullClassifier),
            scenario_timing: ScenarioTiming::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn StateClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Scale every fixed scenario pause; `ScenarioTiming::immediate()` in tests.
    pub fn with_scenario_timing(mut self, timing: ScenarioTiming) -> Self {
        self.scenario_timing = timing;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DeskpilotConfig {
        &self.config
    }

    // ========== Sessions ==========

    pub async fn create_session(&self, name: &str, config: SessionConfig) -> Result<SessionStatus> {
        let session = self.registry.create_or_replace(name, config).await?;
        Ok(session.status())
    }

    /// Connect the preset called `name` from the config file.
    pub async fn connect_preset(&self, name: &str) -> Result<SessionStatus> {
        let preset = self
            .config
            .preset(name)
            .ok_or_else(|| Error::NotFound(format!("preset {}", name)))?;
        let config = preset.to_session_config(self.config.connect_timeout());
        self.create_session(&preset.name, config).await
    }

    /// Connect every preset marked `autoconnect`. Failures are logged and
    /// skipped; returns how many connected.
    pub async fn autoconnect(&self) -> usize {
        let mut connected = 0;
        for preset in self.config.sessions.iter().filter(|p| p.autoconnect) {
            let config = preset.to_session_config(self.config.connect_timeout());
            match self.create_session(&preset.name, config).await {
                Ok(_) => connected += 1,
                Err(e) => warn!(session = %preset.name, error = %e, "Autoconnect failed"),
            }
        }
        if connected > 0 {
            info!(connected, "Autoconnected sessions");
        }
        connected
    }

    pub async fn session(&self, name: &str) -> Result<Arc<RemoteSession>> {
        self.registry.get(name).await
    }

    pub async fn status(&self, name: &str) -> Result<SessionStatus> {
        Ok(self.registry.get(name).await?.status())
    }

    pub async fn list(&self) -> Vec<SessionStatus> {
        self.registry.list().await
    }

    pub async fn disconnect(&self, name: &str) -> RemoveOutcome {
        self.registry.remove(name).await
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }

    // ========== Frames ==========

    /// Capture and encode; `None` parameters fall back to the configured defaults.
    pub async fn screenshot(&self, name: &str, max_width: Option<u32>, quality: Option<u8>) -> Result<EncodedFrame> {
        let session = self.registry.get(name).await?;
        session
            .screenshot(
                max_width.unwrap_or(self.config.screenshot.max_width),
                quality.unwrap_or(self.config.screenshot.quality),
            )
            .await
    }

    pub async fn stream(&self, name: &str, interval: Duration) -> Result<(FrameStream, mpsc::Receiver<StreamEvent>)> {
        let session = self.registry.get(name).await?;
        let options = StreamOptions::new(&self.config.screenshot, &self.config.polling, interval);
        Ok(FrameStream::start(session, options))
    }

    // ========== Input ==========

    pub async fn send_keys(&self, name: &str, key: &str, count: u32) -> Result<()> {
        let session = self.registry.get(name).await?;
        session.send_key(&KeyToken::normalize(key), count).await
    }

    pub async fn type_text(&self, name: &str, text: &str) -> Result<()> {
        let session = self.registry.get(name).await?;
        let delay = Duration::from_millis(self.config.pacing.char_delay_ms);
        session.type_text(text, delay).await
    }

    pub async fn send_shortcut(&self, name: &str, combo: &str) -> Result<()> {
        let tokens = keys::parse_combo(combo)?;
        let session = self.registry.get(name).await?;
        match tokens.as_slice() {
            [single] => session.send_key(single, 1).await,
            _ => session.key_combo(&tokens).await,
        }
    }

    pub async fn click(&self, name: &str, x: u16, y: u16, button: MouseButton, double: bool) -> Result<()> {
        let session = self.registry.get(name).await?;
        session.click(x, y, button, double).await
    }

    pub async fn move_pointer(&self, name: &str, x: u16, y: u16) -> Result<()> {
        let session = self.registry.get(name).await?;
        session.move_pointer(x, y).await
    }

    pub async fn drag(&self, name: &str, from: (u16, u16), to: (u16, u16), button: MouseButton) -> Result<()> {
        let session = self.registry.get(name).await?;
        session.drag(from, to, button).await
    }

    // ========== Scenarios ==========

    pub async fn scenario_context(&self, name: &str) -> Result<ScenarioContext> {
        let session = self.registry.get(name).await?;
        let wait = WaitOptions::from_polling(&self.config.polling, scenario::system::LOGIN_WAIT);
        Ok(ScenarioContext::for_session(session, Pacing::from(&self.config.pacing))
            .with_classifier(Arc::clone(&self.classifier))
            .with_timing(self.scenario_timing)
            .with_wait(wait))
    }

    pub async fn run_scenario(&self, name: &str, scenario: &Scenario, timeout: Option<Duration>) -> Result<ScenarioResult> {
        let ctx = self.scenario_context(name).await?;
        Ok(scenario::run(&ctx, scenario, timeout).await)
    }

    pub async fn wait_for_state(&self, name: &str, targets: &[SystemState], timeout: Duration) -> Result<WaitOutcome> {
        let ctx = self.scenario_context(name).await?;
        ctx.wait_for(targets, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PacingConfig, SessionPreset};
    use crate::testing::{DisplayEvent, MockConnector};
    use crate::frame::RawFrame;

    fn fast_config() -> DeskpilotConfig {
        DeskpilotConfig {
            pacing: PacingConfig {
                key_delay_ms: 0,
                char_delay_ms: 0,
                pointer_delay_ms: 0,
                double_click_gap_ms: 0,
                navigate_settle_ms: 0,
                confirm_settle_ms: 0,
            },
            ..DeskpilotConfig::default()
        }
    }

    async fn automation() -> (Arc<MockConnector>, Automation) {
        let connector = Arc::new(MockConnector::new());
        let automation = Automation::new(fast_config(), connector.clone())
            .with_scenario_timing(ScenarioTiming::immediate());
        automation
            .create_session("lab", SessionConfig::new("10.0.0.5", 5901))
            .await
            .unwrap();
        connector.clear_events();
        (connector, automation)
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let (_connector, automation) = automation().await;
        assert!(matches!(automation.status("nope").await, Err(Error::NotFound(_))));
        assert!(matches!(
            automation.send_keys("nope", "enter", 1).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(automation.disconnect("nope").await, RemoveOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_screenshot_uses_configured_defaults() {
        let (connector, automation) = automation().await;
        connector.set_frame(RawFrame::solid(1920, 1080, [1, 2, 3]));

        let shot = automation.screenshot("lab", None, None).await.unwrap();
        assert_eq!(shot.width, 800);
        let shot = automation.screenshot("lab", Some(400), Some(50)).await.unwrap();
        assert_eq!((shot.width, shot.height), (400, 225));
    }

    #[tokio::test]
    async fn test_input_reaches_session() {
        let (connector, automation) = automation().await;

        automation.send_keys("lab", "Esc", 2).await.unwrap();
        automation.type_text("lab", "ok").await.unwrap();
        automation.click("lab", 3, 4, MouseButton::Left, false).await.unwrap();
        automation.send_shortcut("lab", "ctrl+c").await.unwrap();

        let events = connector.events();
        assert_eq!(events[0], DisplayEvent::KeyDown(KeyToken::Escape));
        assert!(events.contains(&DisplayEvent::KeyDown(KeyToken::Char('o'))));
        assert!(events.contains(&DisplayEvent::Move(3, 4)));
        let ctrl_down = events.iter().position(|e| *e == DisplayEvent::KeyDown(KeyToken::Ctrl)).unwrap();
        let c_down = events.iter().position(|e| *e == DisplayEvent::KeyDown(KeyToken::Char('c'))).unwrap();
        assert!(ctrl_down < c_down);
    }

    #[tokio::test]
    async fn test_run_scenario_against_session() {
        let (connector, automation) = automation().await;
        let scenario = Scenario::from_parts("execute_command", serde_json::json!({"command": "ls"})).unwrap();

        let result = automation
            .run_scenario("lab", &scenario, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(result.success);
        let downs = connector
            .events()
            .into_iter()
            .filter(|e| matches!(e, DisplayEvent::KeyDown(_)))
            .count();
        assert_eq!(downs, 3);
    }

    #[tokio::test]
    async fn test_autoconnect_presets() {
        let connector = Arc::new(MockConnector::new());
        let mut config = fast_config();
        config.sessions = vec![
            SessionPreset {
                name: "bios".into(),
                host: "10.0.0.7".into(),
                port: 5900,
                password: "pw".into(),
                username: None,
                autoconnect: true,
            },
            SessionPreset {
                name: "idle".into(),
                host: "10.0.0.8".into(),
                port: 5900,
                password: String::new(),
                username: None,
                autoconnect: false,
            },
        ];
        let automation = Automation::new(config, connector.clone());

        assert_eq!(automation.autoconnect().await, 1);
        assert!(automation.status("bios").await.unwrap().connected);
        assert!(automation.status("idle").await.is_err());

        automation.connect_preset("idle").await.unwrap();
        assert_eq!(automation.list().await.len(), 2);
        assert!(matches!(automation.connect_preset("ghost").await, Err(Error::NotFound(_))));

        automation.shutdown().await;
        assert!(automation.list().await.is_empty());
    }
}
