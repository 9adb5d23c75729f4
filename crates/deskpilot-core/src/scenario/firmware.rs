//! Firmware setup (UEFI/BIOS) scripts.
//!
//! Menu paths are fixed key sequences for one vendor's layout (Main, Advanced,
//! Boot, Security, Save & Exit tabs left to right). Nothing here discovers
//! where the cursor actually is, so on other firmware the same keys may land
//! somewhere else.

use serde_json::json;

use super::{ms, ScenarioContext, ScenarioResult, StepRunner};
use crate::classifier::SystemState;
use crate::error::Result;
use crate::keys::KeyToken;
use crate::sequencer::Direction;

/// Fixed wait after leaving setup before the OS is polled.
const BOOT_INITIAL_WAIT_MS: u64 = 10_000;

/// States that count as "the OS came up".
pub const OS_READY: [SystemState; 3] = [
    SystemState::LoginScreen,
    SystemState::Desktop,
    SystemState::TextConsole,
];

// ========== Entry & basic navigation ==========

pub async fn enter_firmware_setup(ctx: &ScenarioContext, entry_key: &str) -> ScenarioResult {
    let mut run = ctx.runner("enter_firmware_setup");
    let outcome = enter_steps(ctx, &mut run, entry_key).await;
    run.finish(outcome)
}

async fn enter_steps(ctx: &ScenarioContext, run: &mut StepRunner, entry_key: &str) -> Result<String> {
    let key = KeyToken::normalize(entry_key);
    run.step(format!("press {}", key), ctx.seq.key(&key, 1)).await?;
    ctx.pause(ms(2000)).await;

    // Advisory: a failed or unrecognised capture does not fail the entry.
    match run.step("capture", ctx.classify_now()).await {
        Ok((frame, c)) => {
            run.set_details(json!({
                "state": c.label,
                "confidence": c.confidence,
                "width": frame.width,
                "height": frame.height,
            }));
        }
        Err(e) if e.ends_polling() => return Err(e),
        Err(_) => {}
    }
    Ok(format!("Sent {} to enter firmware setup", key))
}

pub async fn navigate_menu(ctx: &ScenarioContext, direction: Direction, steps: u32) -> ScenarioResult {
    let mut run = ctx.runner("navigate_menu");
    let outcome = run
        .step(format!("navigate {} x{}", direction, steps), ctx.seq.navigate(direction, steps))
        .await
        .map(|_| format!("Moved {} {} step(s)", direction, steps));
    run.finish(outcome)
}

pub async fn select_option(ctx: &ScenarioContext) -> ScenarioResult {
    let mut run = ctx.runner("select_option");
    let outcome = run
        .step("confirm", ctx.seq.confirm())
        .await
        .map(|_| "Selected current option".to_string());
    run.finish(outcome)
}

pub async fn go_back(ctx: &ScenarioContext) -> ScenarioResult {
    let mut run = ctx.runner("go_back");
    let outcome = run
        .step("cancel", ctx.seq.cancel())
        .await
        .map(|_| "Went back".to_string());
    run.finish(outcome)
}

// ========== Settings ==========

async fn press(ctx: &ScenarioContext, run: &mut StepRunner, key: KeyToken, count: u32) -> Result<()> {
    let name = if count == 1 {
        format!("press {}", key)
    } else {
        format!("press {} x{}", key, count)
    };
    run.step(name, ctx.seq.key(&key, count)).await
}

async fn tab_right(ctx: &ScenarioContext, run: &mut StepRunner, tabs: u32) -> Result<()> {
    run.step(format!("navigate right x{}", tabs), ctx.seq.navigate(Direction::Right, tabs))
        .await?;
    ctx.pause(ms(500)).await;
    Ok(())
}

/// Open the boot priority list and promote one entry per requested device.
pub async fn set_boot_order(ctx: &ScenarioContext, devices: &[String]) -> ScenarioResult {
    let mut run = ctx.runner("set_boot_order");
    let outcome = boot_order_steps(ctx, &mut run, devices).await;
    run.set_details(json!({ "devices": devices }));
    run.finish(outcome)
}

async fn boot_order_steps(ctx: &ScenarioContext, run: &mut StepRunner, devices: &[String]) -> Result<String> {
    tab_right(ctx, run, 2).await?;
    press(ctx, run, KeyToken::Down, 2).await?;
    ctx.pause(ms(300)).await;
    press(ctx, run, KeyToken::Enter, 1).await?;
    ctx.pause(ms(300)).await;

    for device in devices {
        run.step(format!("select {}", device), ctx.seq.key(&KeyToken::Down, 1))
            .await?;
        ctx.pause(ms(200)).await;
        run.step(format!("promote {}", device), ctx.seq.key(&KeyToken::F(5), 1))
            .await?;
        ctx.pause(ms(200)).await;
    }
    Ok(format!("Boot order sequence sent for {} device(s)", devices.len()))
}

/// Walk the CPU configuration page and switch each virtualisation option on.
pub async fn enable_virtualization(ctx: &ScenarioContext) -> ScenarioResult {
    let mut run = ctx.runner("enable_virtualization");
    let outcome = virtualization_steps(ctx, &mut run).await;
    run.finish(outcome)
}

async fn virtualization_steps(ctx: &ScenarioContext, run: &mut StepRunner) -> Result<String> {
    tab_right(ctx, run, 1).await?;
    press(ctx, run, KeyToken::Down, 2).await?;
    ctx.pause(ms(300)).await;
    press(ctx, run, KeyToken::Enter, 1).await?;
    ctx.pause(ms(500)).await;

    for _ in 0..5 {
        for key in [KeyToken::Down, KeyToken::Enter, KeyToken::Down, KeyToken::Enter] {
            press(ctx, run, key, 1).await?;
            ctx.pause(ms(200)).await;
        }
    }
    Ok("Virtualization options enabled".to_string())
}

pub async fn disable_secure_boot(ctx: &ScenarioContext) -> ScenarioResult {
    let mut run = ctx.runner("disable_secure_boot");
    let outcome = secure_boot_steps(ctx, &mut run).await;
    run.finish(outcome)
}

async fn secure_boot_steps(ctx: &ScenarioContext, run: &mut StepRunner) -> Result<String> {
    tab_right(ctx, run, 2).await?;
    press(ctx, run, KeyToken::Down, 4).await?;
    ctx.pause(ms(300)).await;
    press(ctx, run, KeyToken::Enter, 1).await?;
    ctx.pause(ms(300)).await;
    press(ctx, run, KeyToken::Down, 1).await?;
    ctx.pause(ms(200)).await;
    press(ctx, run, KeyToken::Enter, 1).await?;
    ctx.pause(ms(200)).await;
    Ok("Secure Boot disabled".to_string())
}

// ========== Exit ==========

/// F10 then confirm. Succeeds once both keys are sent.
pub async fn save_and_exit(ctx: &ScenarioContext) -> ScenarioResult {
    let mut run = ctx.runner("save_and_exit");
    let outcome = save_steps(ctx, &mut run).await;
    run.finish(outcome)
}

async fn save_steps(ctx: &ScenarioContext, run: &mut StepRunner) -> Result<String> {
    press(ctx, run, KeyToken::F(10), 1).await?;
    ctx.pause(ms(1000)).await;
    press(ctx, run, KeyToken::Enter, 1).await?;
    ctx.pause(ms(2000)).await;
    Ok("Saved settings, system restarting".to_string())
}

pub async fn discard_and_exit(ctx: &ScenarioContext) -> ScenarioResult {
    let mut run = ctx.runner("discard_and_exit");
    let outcome = discard_steps(ctx, &mut run).await;
    run.finish(outcome)
}

async fn discard_steps(ctx: &ScenarioContext, run: &mut StepRunner) -> Result<String> {
    tab_right(ctx, run, 4).await?;
    press(ctx, run, KeyToken::Down, 2).await?;
    ctx.pause(ms(300)).await;
    press(ctx, run, KeyToken::Enter, 1).await?;
    ctx.pause(ms(500)).await;
    press(ctx, run, KeyToken::Enter, 1).await?;
    ctx.pause(ms(2000)).await;
    Ok("Discarded changes, exiting setup".to_string())
}

/// Save and exit, then wait (best effort) for a login prompt or desktop.
///
/// Succeeds once save-and-exit succeeded; whether the OS was seen within
/// `timeout` is reported in the details.
pub async fn boot_to_os(ctx: &ScenarioContext, timeout: std::time::Duration) -> ScenarioResult {
    let mut run = ctx.runner("boot_to_os");
    let outcome = boot_steps(ctx, &mut run, timeout).await;
    run.finish(outcome)
}

async fn boot_steps(
    ctx: &ScenarioContext,
    run: &mut StepRunner,
    timeout: std::time::Duration,
) -> Result<String> {
    save_steps(ctx, run).await?;
    ctx.pause(ms(BOOT_INITIAL_WAIT_MS)).await;

    match run.step("wait for os", ctx.wait_for(&OS_READY, timeout)).await {
        Ok(outcome) => {
            let reached = outcome.reached();
            run.set_details(json!({ "osReady": reached, "wait": outcome }));
            if reached {
                Ok("Left firmware setup, OS is up".to_string())
            } else {
                Ok("Left firmware setup, OS state not confirmed".to_string())
            }
        }
        Err(e) if e.ends_polling() => Err(e),
        Err(_) => Ok("Left firmware setup, OS state not confirmed".to_string()),
    }
}

// ========== Detection ==========

/// Capture and report whether the screen looks like firmware setup.
pub async fn detect_firmware_screen(ctx: &ScenarioContext) -> ScenarioResult {
    let mut run = ctx.runner("detect_firmware_screen");
    let outcome = match run.step("capture and classify", ctx.classify_now()).await {
        Ok((_, c)) => {
            let in_setup = c.label == SystemState::FirmwareSetup;
            run.set_details(json!({
                "inFirmware": in_setup,
                "state": c.label,
                "confidence": c.confidence,
            }));
            Ok(if in_setup {
                "Firmware setup screen detected".to_string()
            } else {
                format!("Screen classified as {}", c.label)
            })
        }
        Err(e) => Err(e),
    };
    run.finish(outcome)
}

pub async fn detect_menu(ctx: &ScenarioContext) -> ScenarioResult {
    let mut run = ctx.runner("detect_menu");
    let outcome = match run.step("capture", ctx.capture()).await {
        Ok(frame) => {
            let menu = ctx.classifier.detect_menu(&frame).await;
            run.set_details(json!({ "menu": menu.label, "confidence": menu.confidence }));
            Ok(format!("Menu: {:?}", menu.label))
        }
        Err(e) => Err(e),
    };
    run.finish(outcome)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;
    use crate::classifier::NullClassifier;
    use crate::error::Error;
    use crate::testing::{ScriptedClassifier, SequencerCall};
    use std::sync::Arc;
    use std::time::Duration;

    fn key(name: &str, count: u32) -> SequencerCall {
        SequencerCall::Key(KeyToken::normalize(name), count)
    }

    #[tokio::test]
    async fn test_enter_firmware_setup() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![SystemState::FirmwareSetup]));
        let (seq, _connector, ctx) = context(classifier).await;

        let result = enter_firmware_setup(&ctx, "DEL").await;
        assert!(result.success);
        assert_eq!(seq.calls(), vec![key("delete", 1)]);
        assert_eq!(result.details["state"], "firmware_setup");
    }

    #[tokio::test]
    async fn test_enter_survives_failed_capture() {
        let (seq, connector, ctx) = context(Arc::new(NullClassifier)).await;
        connector.fail_next_captures(1, Error::Capture("no update".into()));

        let result = enter_firmware_setup(&ctx, "f2").await;
        assert!(result.success);
        assert_eq!(seq.calls(), vec![key("f2", 1)]);
        assert_eq!(result.steps.len(), 2);
        assert!(!result.steps[1].success);
    }

    #[tokio::test]
    async fn test_set_boot_order_sequence() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let devices = vec!["usb".to_string(), "nvme".to_string()];
        let result = set_boot_order(&ctx, &devices).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(
            seq.calls(),
            vec![
                SequencerCall::Navigate(Direction::Right, 2),
                key("down", 2),
                key("enter", 1),
                key("down", 1),
                key("f5", 1),
                key("down", 1),
                key("f5", 1),
            ]
        );
        assert_eq!(result.steps[4].name, "promote usb");
    }

    #[tokio::test]
    async fn test_enable_virtualization_sequence() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let result = enable_virtualization(&ctx).await;
        assert!(result.success);
        let calls = seq.calls();
        assert_eq!(calls.len(), 3 + 20);
        assert_eq!(calls[0], SequencerCall::Navigate(Direction::Right, 1));
        assert_eq!(
            &calls[3..7],
            &[key("down", 1), key("enter", 1), key("down", 1), key("enter", 1)]
        );
    }

    #[tokio::test]
    async fn test_disable_secure_boot_and_discard() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        assert!(disable_secure_boot(&ctx).await.success);
        assert_eq!(
            seq.calls(),
            vec![
                SequencerCall::Navigate(Direction::Right, 2),
                key("down", 4),
                key("enter", 1),
                key("down", 1),
                key("enter", 1),
            ]
        );

        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;
        assert!(discard_and_exit(&ctx).await.success);
        assert_eq!(
            seq.calls(),
            vec![
                SequencerCall::Navigate(Direction::Right, 4),
                key("down", 2),
                key("enter", 1),
                key("enter", 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_save_and_exit() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let result = save_and_exit(&ctx).await;
        assert!(result.success);
        assert_eq!(seq.calls(), vec![key("f10", 1), key("enter", 1)]);
    }

    #[tokio::test]
    async fn test_boot_to_os_reports_os_ready() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![
            SystemState::OSLoading,
            SystemState::LoginScreen,
        ]));
        let (seq, _connector, ctx) = context(classifier).await;

        let result = boot_to_os(&ctx, Duration::from_secs(2)).await;
        assert!(result.success);
        assert_eq!(result.details["osReady"], true);
        assert_eq!(seq.calls(), vec![key("f10", 1), key("enter", 1)]);
    }

    #[tokio::test]
    async fn test_boot_to_os_unconfirmed_is_still_success() {
        let (_seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;

        let result = boot_to_os(&ctx, Duration::from_millis(50)).await;
        assert!(result.success);
        assert_eq!(result.details["osReady"], false);
    }

    #[tokio::test]
    async fn test_navigation_failure_stops_sequence() {
        let (seq, _connector, ctx) = context(Arc::new(NullClassifier)).await;
        seq.fail_at(2, Error::UnsupportedKey("enter".into()));

        let result = set_boot_order(&ctx, &["usb".to_string()]).await;
        assert!(!result.success);
        assert_eq!(result.code, Some("unsupported_key"));
        assert_eq!(seq.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_detect_firmware_screen() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![SystemState::FirmwareSetup]));
        let (_seq, _connector, ctx) = context(classifier).await;

        let result = detect_firmware_screen(&ctx).await;
        assert!(result.success);
        assert_eq!(result.details["inFirmware"], true);

        let result = detect_menu(&ctx).await;
        assert!(result.success);
        assert_eq!(result.details["menu"], "unknown");
    }
}
