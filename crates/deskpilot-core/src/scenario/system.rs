//! Operating-system level scripts: detection, waits, login, commands.

use std::time::Duration;

use serde_json::json;

use super::{ms, ScenarioContext, ScenarioResult, StepRunner};
use crate::classifier::{OsType, SystemState};
use crate::error::{Error, Result};
use crate::keys::{self, KeyToken};

pub const LOGIN_WAIT: Duration = Duration::from_secs(120);
pub const DESKTOP_WAIT: Duration = Duration::from_secs(120);
pub const PROMPT_WAIT: Duration = Duration::from_secs(60);

// ========== Detection ==========

pub async fn detect_state(ctx: &ScenarioContext) -> ScenarioResult {
    let mut run = ctx.runner("detect_state");
    let outcome = match run.step("capture and classify", ctx.classify_now()).await {
        Ok((_, c)) => {
            run.set_details(json!({ "state": c.label, "confidence": c.confidence }));
            Ok(format!("Current state: {} ({:.2})", c.label, c.confidence))
        }
        Err(e) => Err(e),
    };
    run.finish(outcome)
}

pub async fn detect_os(ctx: &ScenarioContext) -> ScenarioResult {
    let mut run = ctx.runner("detect_os");
    let outcome = match run.step("capture", ctx.capture()).await {
        Ok(frame) => {
            let os = ctx.classifier.detect_os(&frame).await;
            run.set_details(json!({ "osType": os.label, "confidence": os.confidence }));
            Ok(format!("Operating system: {:?}", os.label))
        }
        Err(e) => Err(e),
    };
    run.finish(outcome)
}

// ========== Waits ==========

/// Poll until `target` is seen. Times out as a failed result.
pub async fn wait_for(ctx: &ScenarioContext, target: SystemState, timeout: Duration) -> ScenarioResult {
    let mut run = ctx.runner("wait_for_state");
    let outcome = wait_steps(ctx, &mut run, target, timeout).await;
    run.finish(outcome)
}

async fn wait_steps(
    ctx: &ScenarioContext,
    run: &mut StepRunner,
    target: SystemState,
    timeout: Duration,
) -> Result<String> {
    let outcome = run
        .step(format!("wait for {}", target), ctx.wait_for(&[target], timeout))
        .await?;
    let elapsed = outcome.elapsed();
    run.set_details(json!({ "target": target, "wait": outcome }));
    if outcome.reached() {
        Ok(format!("Reached {} after {:.1}s", target, elapsed.as_secs_f64()))
    } else {
        Err(Error::timeout(format!("waiting for {}", target), elapsed))
    }
}

pub async fn wait_for_login(ctx: &ScenarioContext, timeout: Duration) -> ScenarioResult {
    wait_for(ctx, SystemState::LoginScreen, timeout).await
}

pub async fn wait_for_desktop(ctx: &ScenarioContext, timeout: Duration) -> ScenarioResult {
    wait_for(ctx, SystemState::Desktop, timeout).await
}

pub async fn wait_for_prompt(ctx: &ScenarioContext, timeout: Duration) -> ScenarioResult {
    wait_for(ctx, SystemState::TextConsole, timeout).await
}

// ========== Login ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginPath {
    /// Username, Enter, password, Enter.
    Console,
    /// Password and Enter; the account is assumed pre-selected.
    Graphical { settle: Duration },
}

impl LoginPath {
    fn for_state(state: Option<SystemState>) -> Self {
        match state {
            Some(SystemState::LoginScreen) | Some(SystemState::LockScreen) => {
                LoginPath::Graphical { settle: ms(2000) }
            }
            _ => LoginPath::Console,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LoginPath::Console => "console",
            LoginPath::Graphical { .. } => "graphical",
        }
    }
}

/// Log in along the path that fits `detected_state`. Never checks that the
/// login worked.
///
/// `LoginScreen` and `LockScreen` take the graphical path; anything else,
/// including no detection at all, takes the console path.
pub async fn login(
    ctx: &ScenarioContext,
    username: &str,
    password: &str,
    detected_state: Option<SystemState>,
) -> ScenarioResult {
    let mut run = ctx.runner("login");
    let path = LoginPath::for_state(detected_state);
    let outcome = login_steps(ctx, &mut run, username, password, path).await;
    run.set_details(json!({ "path": path.label(), "state": detected_state }));
    run.finish(outcome)
}

/// Classify the screen first, then log in along the matching path.
pub async fn login_detected(ctx: &ScenarioContext, username: &str, password: &str) -> ScenarioResult {
    let mut run = ctx.runner("login");
    let detected = match run.step("detect state", ctx.classify_now()).await {
        Ok((_, c)) if c.label != SystemState::Unknown => Some(c.label),
        Ok(_) => None,
        Err(e) if e.ends_polling() => return run.finish(Err(e)),
        Err(_) => None,
    };
    let path = LoginPath::for_state(detected);
    let outcome = login_steps(ctx, &mut run, username, password, path).await;
    run.set_details(json!({ "path": path.label(), "state": detected }));
    run.finish(outcome)
}

/// Pick the login path by operating system.
pub async fn login_for_os(ctx: &ScenarioContext, os: OsType, username: &str, password: &str) -> ScenarioResult {
    match os {
        OsType::Windows => {
            let mut run = ctx.runner("login");
            let path = LoginPath::Graphical { settle: ms(3000) };
            let outcome = login_steps(ctx, &mut run, username, password, path).await;
            run.set_details(json!({ "path": path.label(), "os": os }));
            run.finish(outcome)
        }
        OsType::Linux => login_detected(ctx, username, password).await,
        OsType::MacOs | OsType::Unknown => login(ctx, username, password, None).await,
    }
}

async fn login_steps(
    ctx: &ScenarioContext,
    run: &mut StepRunner,
    username: &str,
    password: &str,
    path: LoginPath,
) -> Result<String> {
    match path {
        LoginPath::Console => {
            run.step("type username", ctx.seq.type_text(username)).await?;
            run.step("press enter", ctx.seq.key(&KeyToken::Enter, 1)).await?;
            ctx.pause(ms(500)).await;
            run.step("type password", ctx.seq.type_text(password)).await?;
            run.step("press enter", ctx.seq.key(&KeyToken::Enter, 1)).await?;
            ctx.pause(ms(1000)).await;
            Ok(format!("Login sequence sent for {}", username))
        }
        LoginPath::Graphical { settle } => {
            run.step("type password", ctx.seq.type_text(password)).await?;
            run.step("press enter", ctx.seq.key(&KeyToken::Enter, 1)).await?;
            ctx.pause(settle).await;
            Ok("Password submitted".to_string())
        }
    }
}

// ========== Commands ==========

/// Type `command` and press Enter. Output is not read back.
pub async fn execute_command(ctx: &ScenarioContext, command: &str) -> ScenarioResult {
    let mut run = ctx.runner("execute_command");
    let outcome = command_steps(ctx, &mut run, command).await;
    run.finish(outcome)
}

async fn command_steps(ctx: &ScenarioContext, run: &mut StepRunner, command: &str) -> Result<String> {
    run.step("type command", ctx.seq.type_text(command)).await?;
    run.step("press enter", ctx.seq.key(&KeyToken::Enter, 1)).await?;
    ctx.pause(ms(1000)).await;
    Ok(format!("Executed: {}", preview(command)))
}

fn preview(text: &str) -> String {
    const MAX: usize = 50;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    }
}

pub async fn open_terminal(ctx: &ScenarioContext, os: OsType) -> ScenarioResult {
    let mut run = ctx.runner("open_terminal");
    let outcome = terminal_steps(ctx, &mut run, os).await;
    run.set_details(json!({ "os": os }));
    run.finish(outcome)
}

async fn terminal_steps(ctx: &ScenarioContext, run: &mut StepRunner, os: OsType) -> Result<String> {
    match os {
        OsType::Linux => {
            let combo = keys::parse_combo("ctrl+alt+t")?;
            run.step("press ctrl+alt+t", ctx.seq.press_combo(&combo)).await?;
        }
        OsType::Windows => {
            let combo = keys::parse_combo("super+r")?;
            run.step("press super+r", ctx.seq.press_combo(&combo)).await?;
            ctx.pause(ms(500)).await;
            run.step("type cmd", ctx.seq.type_text("cmd")).await?;
            run.step("press enter", ctx.seq.key(&KeyToken::Enter, 1)).await?;
        }
        OsType::MacOs => {
            let combo = keys::parse_combo("super+space")?;
            run.step("press super+space", ctx.seq.press_combo(&combo)).await?;
            ctx.pause(ms(500)).await;
            run.step("type terminal", ctx.seq.type_text("Terminal")).await?;
            run.step("press enter", ctx.seq.key(&KeyToken::Enter, 1)).await?;
        }
        OsType::Unknown => {
            return Err(Error::invalid("cannot open a terminal on an unknown OS"));
        }
    }
    ctx.pause(ms(1000)).await;
    Ok(format!("Terminal opened ({:?})", os))
}

/// Send a shortcut such as `"ctrl+alt+del"` with modifiers held.
pub async fn send_shortcut(ctx: &ScenarioContext, combo: &str) -> ScenarioResult {
    let mut run = ctx.runner("send_shortcut");
    let outcome = match keys::parse_combo(combo) {
        Ok(tokens) => run
            .step(format!("press {}", combo), ctx.seq.press_combo(&tokens))
            .await
            .map(|_| format!("Sent shortcut: {}", combo)),
        Err(e) => Err(e),
    };
    run.finish(outcome)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;
    use crate::classifier::NullClassifier;
    use crate::testing::{ScriptedClassifier, SequencerCall};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_console_login_is_exactly_four_calls() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let result = login(&ctx, "root", "pw123", Some(SystemState::TextConsole)).await;
        assert!(result.success);
        assert_eq!(
            seq.calls(),
            vec![
                SequencerCall::typed("root"),
                SequencerCall::key("enter"),
                SequencerCall::typed("pw123"),
                SequencerCall::key("enter"),
            ]
        );
        assert!(!serde_json::to_string(&result).unwrap().contains("pw123"));
    }

    #[tokio::test]
    async fn test_graphical_login_types_only_password() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let result = login(&ctx, "root", "pw123", Some(SystemState::LoginScreen)).await;
        assert!(result.success);
        assert_eq!(
            seq.calls(),
            vec![SequencerCall::typed("pw123"), SequencerCall::key("enter")]
        );
        assert_eq!(result.details["path"], "graphical");
    }

    #[tokio::test]
    async fn test_login_without_state_uses_console_path() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let result = login(&ctx, "admin", "secret", None).await;
        assert!(result.success);
        assert_eq!(seq.calls().len(), 4);
        assert_eq!(seq.calls()[0], SequencerCall::typed("admin"));
        assert_eq!(result.details["path"], "console");
    }

    #[tokio::test]
    async fn test_login_detected_follows_classifier() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![SystemState::LockScreen]));
        let (seq, _connector, ctx) = context(classifier).await;

        let result = login_detected(&ctx, "root", "pw").await;
        assert!(result.success);
        assert_eq!(seq.calls(), vec![SequencerCall::typed("pw"), SequencerCall::key("enter")]);
        assert_eq!(result.details["state"], "lock_screen");
    }

    #[tokio::test]
    async fn test_windows_login() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let result = login_for_os(&ctx, OsType::Windows, "Administrator", "pw").await;
        assert!(result.success);
        assert_eq!(seq.calls(), vec![SequencerCall::typed("pw"), SequencerCall::key("enter")]);
    }

    #[tokio::test]
    async fn test_login_stops_at_failed_step() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;
        seq.fail_at(2, Error::UnsupportedCharacter('\u{1}'));

        let result = login(&ctx, "root", "pw\u{1}", Some(SystemState::TextConsole)).await;
        assert!(!result.success);
        assert_eq!(result.code, Some("unsupported_character"));
        assert_eq!(seq.calls().len(), 2);
        assert_eq!(result.steps.last().unwrap().name, "type password");
    }

    #[tokio::test]
    async fn test_execute_command() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let result = execute_command(&ctx, "uname -a").await;
        assert!(result.success);
        assert_eq!(
            seq.calls(),
            vec![SequencerCall::typed("uname -a"), SequencerCall::key("enter")]
        );
        assert_eq!(result.message, "Executed: uname -a");
    }

    #[tokio::test]
    async fn test_open_terminal_uses_real_combos() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;
        assert!(open_terminal(&ctx, OsType::Linux).await.success);
        assert_eq!(
            seq.calls(),
            vec![SequencerCall::Combo(vec![KeyToken::Ctrl, KeyToken::Alt, KeyToken::Char('t')])]
        );

        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;
        assert!(open_terminal(&ctx, OsType::Windows).await.success);
        assert_eq!(
            seq.calls(),
            vec![
                SequencerCall::Combo(vec![KeyToken::Super, KeyToken::Char('r')]),
                SequencerCall::typed("cmd"),
                SequencerCall::key("enter"),
            ]
        );

        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;
        let result = open_terminal(&ctx, OsType::Unknown).await;
        assert!(!result.success);
        assert!(seq.calls().is_empty());
    }

    #[tokio::test]
    async fn test_send_shortcut() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        assert!(send_shortcut(&ctx, "ctrl+alt+del").await.success);
        assert_eq!(
            seq.calls(),
            vec![SequencerCall::Combo(vec![KeyToken::Ctrl, KeyToken::Alt, KeyToken::Delete])]
        );

        let result = send_shortcut(&ctx, "ctrl+").await;
        assert!(!result.success);
        assert_eq!(result.code, Some("invalid_argument"));
        assert_eq!(seq.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_desktop() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![
            SystemState::LoginScreen,
            SystemState::Desktop,
        ]));
        let (_seq, _connector, ctx) = context(classifier).await;

        let result = wait_for_desktop(&ctx, Duration::from_secs(2)).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.details["wait"]["outcome"], "reached");
    }

    #[tokio::test]
    async fn test_wait_timeout_is_failure() {
        let (_seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let result = wait_for_prompt(&ctx, Duration::from_millis(60)).await;
        assert!(!result.success);
        assert_eq!(result.code, Some("timeout"));
        assert_eq!(result.details["wait"]["outcome"], "timed_out");
    }

    #[tokio::test]
    async fn test_detect_state_and_os() {
        let classifier = Arc::new(
            ScriptedClassifier::new(vec![SystemState::TextConsole]).with_os(OsType::Linux),
        );
        let (_seq, _connector, ctx) = context(classifier).await;

        let result = detect_state(&ctx).await;
        assert!(result.success);
        assert_eq!(result.details["state"], "text_console");

        let result = detect_os(&ctx).await;
        assert_eq!(result.details["osType"], "linux");
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(80);
        assert_eq!(preview(&long).len(), 53);
        assert_eq!(preview("ls"), "ls");
    }
}
