//! Tool dispatch: MCP tool calls -> [`Automation`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use deskpilot_core::config::DEFAULT_PORT;
use deskpilot_core::frame;
use deskpilot_core::scenario::Secret;
use deskpilot_core::{
    Automation, Direction, MouseButton, OsType, RemoveOutcome, Scenario, ScenarioResult, SessionConfig,
    SystemState, WaitOutcome,
};
use deskpilot_mcp::{ToolHandler, ToolResult};

const BOOT_WAIT: Duration = Duration::from_secs(120);

/// States after which the machine counts as booted.
const BOOTED: [SystemState; 4] = [
    SystemState::LoginScreen,
    SystemState::LockScreen,
    SystemState::Desktop,
    SystemState::TextConsole,
];

pub struct DaemonHandler {
    automation: Arc<Automation>,
    screenshot_dir: PathBuf,
}

// ========== Arguments ==========

#[derive(Deserialize)]
struct SessionArgs {
    session: String,
}

#[derive(Deserialize)]
struct StatusArgs {
    #[serde(default)]
    session: Option<String>,
}

#[derive(Deserialize)]
struct ConnectArgs {
    session: String,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct ScreenshotArgs {
    session: String,
    #[serde(rename = "maxWidth", default)]
    max_width: Option<u32>,
    #[serde(default)]
    quality: Option<u8>,
    #[serde(default)]
    save: bool,
}

#[derive(Deserialize)]
struct KeyPressArgs {
    session: String,
    key: String,
    #[serde(default)]
    count: Option<u32>,
}

#[derive(Deserialize)]
struct TypeTextArgs {
    session: String,
    text: String,
}

#[derive(Deserialize)]
struct ShortcutArgs {
    session: String,
    combo: String,
}

#[derive(Deserialize)]
struct ClickArgs {
    session: String,
    x: u16,
    y: u16,
    #[serde(default)]
    button: MouseButton,
    #[serde(default)]
    double: bool,
}

#[derive(Deserialize)]
struct MoveArgs {
    session: String,
    x: u16,
    y: u16,
}

#[derive(Deserialize)]
struct DragArgs {
    session: String,
    #[serde(rename = "fromX")]
    from_x: u16,
    #[serde(rename = "fromY")]
    from_y: u16,
    #[serde(rename = "toX")]
    to_x: u16,
    #[serde(rename = "toY")]
    to_y: u16,
    #[serde(default)]
    button: MouseButton,
}

#[derive(Deserialize)]
struct EnterArgs {
    session: String,
    #[serde(default)]
    key: Option<String>,
}

#[derive(Deserialize)]
struct NavigateArgs {
    session: String,
    direction: Direction,
    #[serde(default)]
    steps: Option<u32>,
}

#[derive(Deserialize)]
struct BootOrderArgs {
    session: String,
    devices: Vec<String>,
}

#[derive(Deserialize)]
struct TimeoutArgs {
    session: String,
    #[serde(rename = "timeoutSecs", default)]
    timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
struct WaitStateArgs {
    session: String,
    state: String,
    #[serde(rename = "timeoutSecs", default)]
    timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
struct LoginArgs {
    session: String,
    #[serde(default)]
    username: Option<String>,
    password: String,
    #[serde(default)]
    os: Option<String>,
}

#[derive(Deserialize)]
struct CommandArgs {
    session: String,
    command: String,
}

#[derive(Deserialize)]
struct TerminalArgs {
    session: String,
    #[serde(default)]
    os: Option<String>,
}

#[derive(Deserialize)]
struct RunScenarioArgs {
    session: String,
    scenario: String,
    #[serde(default)]
    params: Value,
    #[serde(rename = "timeoutSecs", default)]
    timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
struct BootArgs {
    session: String,
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(rename = "loginPassword", default)]
    login_password: Option<String>,
    #[serde(default)]
    os: Option<String>,
    #[serde(rename = "timeoutSecs", default)]
    timeout_secs: Option<u64>,
}

fn parse_os(os: Option<&str>) -> Result<Option<OsType>> {
    Ok(os.map(OsType::parse).transpose()?)
}

fn ok(message: impl Into<String>, extra: Value) -> ToolResult {
    let mut body = json!({ "success": true, "message": message.into() });
    if let (Value::Object(body), Value::Object(extra)) = (&mut body, extra) {
        body.extend(extra);
    }
    ToolResult::json(&body)
}

fn scenario_result(result: &ScenarioResult) -> ToolResult {
    let mut tool = ToolResult::json(result);
    if !result.success {
        tool.is_error = Some(true);
    }
    tool
}

impl DaemonHandler {
    pub fn new(automation: Arc<Automation>, screenshot_dir: PathBuf) -> Self {
        Self {
            automation,
            screenshot_dir,
        }
    }

    async fn call_tool(&self, name: &str, args: Value) -> ToolResult {
        match self.call_tool_inner(name, args).await {
            Ok(res) => res,
            Err(e) => {
                let code = e
                    .downcast_ref::<deskpilot_core::Error>()
                    .map(|e| e.code())
                    .unwrap_or("invalid_argument");
                error!(tool = %name, code, error = %e, "Tool call failed");
                ToolResult::failure(e.to_string(), code)
            }
        }
    }

    async fn run(&self, session: &str, scenario: Scenario, timeout: Option<Duration>) -> Result<ToolResult> {
        let result = self.automation.run_scenario(session, &scenario, timeout).await?;
        Ok(scenario_result(&result))
    }

    async fn call_tool_inner(&self, name: &str, args: Value) -> Result<ToolResult> {
        let automation = &self.automation;
        match name {
            // ===== Sessions =====
            "vnc_connect" => {
                let ConnectArgs { session, host, port, password, username } = serde_json::from_value(args)?;
                let status = match host {
                    Some(host) => {
                        let mut config = SessionConfig::new(host, port.unwrap_or(DEFAULT_PORT))
                            .with_password(password.unwrap_or_default())
                            .with_connect_timeout(automation.config().connect_timeout());
                        config.username = username;
                        automation.create_session(&session, config).await?
                    }
                    None => automation.connect_preset(&session).await?,
                };
                info!(session = %session, host = %status.host, port = status.port, "Session connected");
                Ok(ok(
                    format!("Connected to {}:{}", status.host, status.port),
                    json!({ "status": status }),
                ))
            }
            "vnc_disconnect" => {
                let SessionArgs { session } = serde_json::from_value(args)?;
                match automation.disconnect(&session).await {
                    RemoveOutcome::Removed => Ok(ok(format!("Disconnected {}", session), json!({}))),
                    RemoveOutcome::NotFound => Ok(ToolResult::failure(
                        format!("No such session: {}", session),
                        "not_found",
                    )),
                }
            }
            "vnc_status" => {
                let StatusArgs { session } = serde_json::from_value(args)?;
                match session {
                    Some(session) => {
                        let status = automation.status(&session).await?;
                        Ok(ok(format!("Session {}", session), json!({ "status": status })))
                    }
                    None => {
                        let sessions = automation.list().await;
                        Ok(ok(
                            format!("{} session(s)", sessions.len()),
                            json!({ "sessions": sessions }),
                        ))
                    }
                }
            }

            // ===== Frames =====
            "vnc_screenshot" => {
                let ScreenshotArgs { session, max_width, quality, save } = serde_json::from_value(args)?;
                let shot = automation.screenshot(&session, max_width, quality).await?;
                let path = if save {
                    Some(frame::save_frame(&shot, &self.screenshot_dir, &session)?)
                } else {
                    None
                };
                let meta = json!({
                    "success": true,
                    "session": session,
                    "width": shot.width,
                    "height": shot.height,
                    "format": shot.format,
                    "bytes": shot.payload.len(),
                    "path": path,
                });
                Ok(ToolResult::image_with_json(shot.to_base64(), shot.format.mime_type(), &meta))
            }

            // ===== Input =====
            "vnc_key_press" => {
                let KeyPressArgs { session, key, count } = serde_json::from_value(args)?;
                // 0 is a valid no-op
                let count = count.unwrap_or(1);
                automation.send_keys(&session, &key, count).await?;
                Ok(ok(format!("Pressed {} x{}", key, count), json!({})))
            }
            "vnc_type_text" => {
                let TypeTextArgs { session, text } = serde_json::from_value(args)?;
                automation.type_text(&session, &text).await?;
                Ok(ok(format!("Typed {} characters", text.chars().count()), json!({})))
            }
            "vnc_send_shortcut" => {
                let ShortcutArgs { session, combo } = serde_json::from_value(args)?;
                automation.send_shortcut(&session, &combo).await?;
                Ok(ok(format!("Sent {}", combo), json!({})))
            }
            "vnc_mouse_click" => {
                let ClickArgs { session, x, y, button, double } = serde_json::from_value(args)?;
                automation.click(&session, x, y, button, double).await?;
                Ok(ok(format!("Clicked ({}, {})", x, y), json!({})))
            }
            "vnc_mouse_move" => {
                let MoveArgs { session, x, y } = serde_json::from_value(args)?;
                automation.move_pointer(&session, x, y).await?;
                Ok(ok(format!("Moved to ({}, {})", x, y), json!({})))
            }
            "vnc_mouse_drag" => {
                let DragArgs { session, from_x, from_y, to_x, to_y, button } = serde_json::from_value(args)?;
                automation
                    .drag(&session, (from_x, from_y), (to_x, to_y), button)
                    .await?;
                Ok(ok(
                    format!("Dragged ({}, {}) -> ({}, {})", from_x, from_y, to_x, to_y),
                    json!({}),
                ))
            }

            // ===== Firmware =====
            "uefi_enter" => {
                let EnterArgs { session, key } = serde_json::from_value(args)?;
                let entry_key = key.unwrap_or_else(|| "f2".to_string());
                self.run(&session, Scenario::EnterFirmwareSetup { entry_key }, None).await
            }
            "uefi_navigate" => {
                let NavigateArgs { session, direction, steps } = serde_json::from_value(args)?;
                let steps = steps.unwrap_or(1);
                self.run(&session, Scenario::NavigateMenu { direction, steps }, None).await
            }
            "uefi_set_boot_order" => {
                let BootOrderArgs { session, devices } = serde_json::from_value(args)?;
                self.run(&session, Scenario::SetBootOrder { devices }, None).await
            }
            "uefi_select" | "uefi_back" | "uefi_enable_virtualization" | "uefi_disable_secure_boot"
            | "uefi_save_exit" | "uefi_discard_exit" | "system_detect_state" => {
                let SessionArgs { session } = serde_json::from_value(args)?;
                let scenario = match name {
                    "uefi_select" => Scenario::SelectOption,
                    "uefi_back" => Scenario::GoBack,
                    "uefi_enable_virtualization" => Scenario::EnableVirtualization,
                    "uefi_disable_secure_boot" => Scenario::DisableSecureBoot,
                    "uefi_save_exit" => Scenario::SaveAndExit,
                    "uefi_discard_exit" => Scenario::DiscardAndExit,
                    _ => Scenario::DetectState,
                };
                self.run(&session, scenario, None).await
            }
            "uefi_boot_to_os" => {
                let TimeoutArgs { session, timeout_secs } = serde_json::from_value(args)?;
                self.run(&session, Scenario::BootToOs { timeout_secs }, None).await
            }

            // ===== System =====
            "system_wait_for_state" => {
                let WaitStateArgs { session, state, timeout_secs } = serde_json::from_value(args)?;
                let state = SystemState::parse(&state)?;
                self.run(&session, Scenario::WaitForState { state, timeout_secs }, None).await
            }
            "system_login" => {
                let LoginArgs { session, username, password, os } = serde_json::from_value(args)?;
                let username = match username {
                    Some(u) => u,
                    None => automation
                        .session(&session)
                        .await?
                        .config()
                        .username
                        .clone()
                        .ok_or_else(|| deskpilot_core::Error::invalid("username is required"))?,
                };
                let scenario = Scenario::Login {
                    username,
                    password: Secret::new(password),
                    state: None,
                    os: parse_os(os.as_deref())?,
                };
                self.run(&session, scenario, None).await
            }
            "system_execute_command" => {
                let CommandArgs { session, command } = serde_json::from_value(args)?;
                self.run(&session, Scenario::ExecuteCommand { command }, None).await
            }
            "system_open_terminal" => {
                let TerminalArgs { session, os } = serde_json::from_value(args)?;
                let os = parse_os(os.as_deref())?.unwrap_or(OsType::Linux);
                self.run(&session, Scenario::OpenTerminal { os }, None).await
            }

            // ===== Composite =====
            "vnc_run_scenario" => {
                let RunScenarioArgs { session, scenario, params, timeout_secs } = serde_json::from_value(args)?;
                let scenario = Scenario::from_parts(&scenario, params)?;
                self.run(&session, scenario, timeout_secs.map(Duration::from_secs)).await
            }
            "vnc_boot_to_os" => {
                let args: BootArgs = serde_json::from_value(args)?;
                self.boot_to_os(args).await
            }

            other => Ok(ToolResult::failure(format!("Unknown tool: {}", other), "not_found")),
        }
    }

    /// Connect, capture once, wait for a booted screen, log in when
    /// credentials are given and the screen is not already a desktop.
    async fn boot_to_os(&self, args: BootArgs) -> Result<ToolResult> {
        let automation = &self.automation;
        let session = args.session;

        let mut config = SessionConfig::new(&args.host, args.port.unwrap_or(DEFAULT_PORT))
            .with_password(args.password.unwrap_or_default())
            .with_connect_timeout(automation.config().connect_timeout());
        config.username = args.username.clone();
        let status = automation.create_session(&session, config).await?;

        let shot = automation.screenshot(&session, None, None).await?;
        let timeout = args.timeout_secs.map(Duration::from_secs).unwrap_or(BOOT_WAIT);
        let wait = automation.wait_for_state(&session, &BOOTED, timeout).await?;
        debug!(session = %session, reached = wait.reached(), "Boot wait finished");

        let login = match (args.username, args.login_password) {
            (Some(username), Some(password)) => {
                let state = match &wait {
                    WaitOutcome::Reached { state: SystemState::Desktop, .. } => None,
                    WaitOutcome::Reached { state, .. } => Some(Some(*state)),
                    WaitOutcome::TimedOut { .. } => Some(None),
                };
                match state {
                    Some(state) => {
                        let scenario = Scenario::Login {
                            username,
                            password: Secret::new(password),
                            state,
                            os: parse_os(args.os.as_deref())?,
                        };
                        Some(automation.run_scenario(&session, &scenario, None).await?)
                    }
                    None => None,
                }
            }
            _ => None,
        };

        let success = login.as_ref().map(|l| l.success).unwrap_or(true);
        let message = match (&login, wait.reached()) {
            (Some(l), _) => l.message.clone(),
            (None, true) => "Operating system is up".to_string(),
            (None, false) => "Connected; booted screen not confirmed before timeout".to_string(),
        };
        let mut result = ToolResult::json(&json!({
            "success": success,
            "message": message,
            "status": status,
            "screenshot": { "width": shot.width, "height": shot.height },
            "wait": wait,
            "login": login,
        }));
        if !success {
            result.is_error = Some(true);
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl ToolHandler for DaemonHandler {
    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        self.call_tool(name, arguments).await
    }
}
