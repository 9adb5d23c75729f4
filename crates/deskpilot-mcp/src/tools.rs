//! MCP tool definitions and result shapes.
//!
//! Every tool addresses one session by name; only `vnc_status` may omit it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        /// Base64 payload.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Self {
        let text = serde_json::to_string(value)
            .unwrap_or_else(|e| json!({ "success": false, "error": e.to_string() }).to_string());
        ToolResult::text(text)
    }

    pub fn json_pretty<T: Serialize>(value: &T) -> Self {
        let text = serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| json!({ "success": false, "error": e.to_string() }).to_string());
        ToolResult::text(text)
    }

    /// An image block followed by a JSON metadata block.
    pub fn image_with_json<T: Serialize>(data: String, mime_type: impl Into<String>, meta: &T) -> Self {
        let mut result = ToolResult::json(meta);
        result.content.insert(
            0,
            ToolContent::Image {
                data,
                mime_type: mime_type.into(),
            },
        );
        result
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text { text: message.into() }],
            is_error: Some(true),
        }
    }

    /// Structured failure payload: `{"success": false, "error", "code"}`.
    pub fn failure(message: impl Into<String>, code: &str) -> Self {
        let mut result = ToolResult::json(&json!({
            "success": false,
            "error": message.into(),
            "code": code,
        }));
        result.is_error = Some(true);
        result
    }
}

// ========== Schemas ==========

fn session_prop() -> Value {
    json!({ "type": "string", "description": "Session name" })
}

/// Object schema with `session` plus `extra` properties. `required` lists
/// required extras; `session` is always required.
fn session_schema(extra: Value, required: &[&str]) -> Value {
    let mut properties = Map::new();
    properties.insert("session".to_string(), session_prop());
    if let Value::Object(extra) = extra {
        properties.extend(extra);
    }
    let mut req = vec!["session".to_string()];
    req.extend(required.iter().map(|s| s.to_string()));
    json!({
        "type": "object",
        "properties": properties,
        "required": req,
    })
}

fn timeout_prop(default_secs: u64) -> Value {
    json!({
        "type": "integer",
        "minimum": 1,
        "description": format!("Overall timeout in seconds (default {})", default_secs),
    })
}

fn state_prop() -> Value {
    json!({
        "type": "string",
        "enum": ["firmware_setup", "boot_loader", "os_loading", "login_screen", "desktop", "text_console", "lock_screen", "unknown"],
    })
}

fn os_prop() -> Value {
    json!({ "type": "string", "enum": ["linux", "windows", "macos"] })
}

fn button_prop() -> Value {
    json!({
        "oneOf": [
            { "type": "string", "enum": ["left", "middle", "right"] },
            { "type": "integer", "minimum": 1, "maximum": 3 }
        ],
        "description": "Mouse button by name or number: 1 left, 2 middle, 3 right (default left)",
    })
}

fn coord_prop(desc: &str) -> Value {
    json!({ "type": "integer", "minimum": 0, "maximum": 65535, "description": desc })
}

// ========== Tool list ==========

pub fn all_tools() -> Vec<ToolDefinition> {
    vec![
        // ===== Sessions =====
        ToolDefinition::new(
            "vnc_connect",
            "Connect a named session to a VNC server, replacing any session with the same name. Without host, the configured preset of that name is used.",
            session_schema(
                json!({
                    "host": { "type": "string", "description": "Server host" },
                    "port": { "type": "integer", "minimum": 1, "maximum": 65535, "description": "Server port (default 5900)" },
                    "password": { "type": "string", "description": "VNC password" },
                    "username": { "type": "string", "description": "OS login user remembered for the session" }
                }),
                &[],
            ),
        ),
        ToolDefinition::new(
            "vnc_disconnect",
            "Disconnect and forget a session",
            session_schema(json!({}), &[]),
        ),
        ToolDefinition::new(
            "vnc_status",
            "Status of one session, or of all sessions when session is omitted",
            json!({
                "type": "object",
                "properties": { "session": session_prop() }
            }),
        ),
        // ===== Frames =====
        ToolDefinition::new(
            "vnc_screenshot",
            "Capture the remote screen as a JPEG image",
            session_schema(
                json!({
                    "maxWidth": { "type": "integer", "minimum": 1, "description": "Downscale to this width, preserving aspect ratio" },
                    "quality": { "type": "integer", "minimum": 0, "maximum": 100, "description": "JPEG quality" },
                    "save": { "type": "boolean", "description": "Also write the image under the screenshots directory" }
                }),
                &[],
            ),
        ),
        // ===== Input =====
        ToolDefinition::new(
            "vnc_key_press",
            "Press a key one or more times (enter, esc, tab, f1-f12, up, down, a, ...)",
            session_schema(
                json!({
                    "key": { "type": "string" },
                    "count": { "type": "integer", "minimum": 0, "description": "Repeat count (default 1, 0 sends nothing)" }
                }),
                &["key"],
            ),
        ),
        ToolDefinition::new(
            "vnc_type_text",
            "Type text character by character",
            session_schema(json!({ "text": { "type": "string" } }), &["text"]),
        ),
        ToolDefinition::new(
            "vnc_send_shortcut",
            "Send a key combination such as ctrl+alt+del",
            session_schema(json!({ "combo": { "type": "string" } }), &["combo"]),
        ),
        ToolDefinition::new(
            "vnc_mouse_click",
            "Click at a framebuffer position",
            session_schema(
                json!({
                    "x": coord_prop("X coordinate"),
                    "y": coord_prop("Y coordinate"),
                    "button": button_prop(),
                    "double": { "type": "boolean", "description": "Double click" }
                }),
                &["x", "y"],
            ),
        ),
        ToolDefinition::new(
            "vnc_mouse_move",
            "Move the pointer",
            session_schema(
                json!({ "x": coord_prop("X coordinate"), "y": coord_prop("Y coordinate") }),
                &["x", "y"],
            ),
        ),
        ToolDefinition::new(
            "vnc_mouse_drag",
            "Press at one position, move to another, release",
            session_schema(
                json!({
                    "fromX": coord_prop("Start X"),
                    "fromY": coord_prop("Start Y"),
                    "toX": coord_prop("End X"),
                    "toY": coord_prop("End Y"),
                    "button": button_prop()
                }),
                &["fromX", "fromY", "toX", "toY"],
            ),
        ),
        // ===== Firmware =====
        ToolDefinition::new(
            "uefi_enter",
            "Press the firmware setup key during POST",
            session_schema(
                json!({ "key": { "type": "string", "description": "Setup key (default f2)" } }),
                &[],
            ),
        ),
        ToolDefinition::new(
            "uefi_navigate",
            "Move through firmware menus with the arrow keys",
            session_schema(
                json!({
                    "direction": { "type": "string", "enum": ["up", "down", "left", "right"] },
                    "steps": { "type": "integer", "minimum": 1, "description": "Key presses (default 1)" }
                }),
                &["direction"],
            ),
        ),
        ToolDefinition::new(
            "uefi_select",
            "Confirm the highlighted firmware option",
            session_schema(json!({}), &[]),
        ),
        ToolDefinition::new(
            "uefi_back",
            "Leave the current firmware submenu",
            session_schema(json!({}), &[]),
        ),
        ToolDefinition::new(
            "uefi_set_boot_order",
            "Promote boot devices in order on the Boot menu",
            session_schema(
                json!({ "devices": { "type": "array", "items": { "type": "string" }, "minItems": 1 } }),
                &["devices"],
            ),
        ),
        ToolDefinition::new(
            "uefi_enable_virtualization",
            "Enable CPU virtualization options on the Advanced menu",
            session_schema(json!({}), &[]),
        ),
        ToolDefinition::new(
            "uefi_disable_secure_boot",
            "Disable Secure Boot on the Security menu",
            session_schema(json!({}), &[]),
        ),
        ToolDefinition::new(
            "uefi_save_exit",
            "Save firmware settings and reset",
            session_schema(json!({}), &[]),
        ),
        ToolDefinition::new(
            "uefi_discard_exit",
            "Discard firmware changes and exit",
            session_schema(json!({}), &[]),
        ),
        ToolDefinition::new(
            "uefi_boot_to_os",
            "Save and exit firmware, then wait for the OS to come up",
            session_schema(json!({ "timeoutSecs": timeout_prop(120) }), &[]),
        ),
        // ===== System =====
        ToolDefinition::new(
            "system_detect_state",
            "Classify what the remote screen currently shows",
            session_schema(json!({}), &[]),
        ),
        ToolDefinition::new(
            "system_wait_for_state",
            "Poll the screen until it shows the given state",
            session_schema(
                json!({ "state": state_prop(), "timeoutSecs": timeout_prop(120) }),
                &["state"],
            ),
        ),
        ToolDefinition::new(
            "system_login",
            "Log in on a console or graphical login screen",
            session_schema(
                json!({
                    "username": { "type": "string", "description": "Defaults to the session's username" },
                    "password": { "type": "string" },
                    "os": os_prop()
                }),
                &["password"],
            ),
        ),
        ToolDefinition::new(
            "system_execute_command",
            "Type a command and press Enter",
            session_schema(json!({ "command": { "type": "string" } }), &["command"]),
        ),
        ToolDefinition::new(
            "system_open_terminal",
            "Open a terminal window on a desktop session",
            session_schema(json!({ "os": os_prop() }), &[]),
        ),
        // ===== Composite =====
        ToolDefinition::new(
            "vnc_run_scenario",
            "Run any scenario by id with its parameters",
            session_schema(
                json!({
                    "scenario": { "type": "string", "description": "Scenario id, e.g. set_boot_order" },
                    "params": { "type": "object", "description": "Scenario parameters" },
                    "timeoutSecs": { "type": "integer", "minimum": 1, "description": "Abort the scenario after this many seconds" }
                }),
                &["scenario"],
            ),
        ),
        ToolDefinition::new(
            "vnc_boot_to_os",
            "Connect, take a screenshot, wait for a login or desktop screen, and optionally log in",
            session_schema(
                json!({
                    "host": { "type": "string" },
                    "port": { "type": "integer", "minimum": 1, "maximum": 65535 },
                    "password": { "type": "string", "description": "VNC password" },
                    "username": { "type": "string", "description": "OS user to log in as" },
                    "loginPassword": { "type": "string", "description": "OS password; login is skipped without it" },
                    "os": os_prop(),
                    "timeoutSecs": timeout_prop(120)
                }),
                &["host"],
            ),
        ),
    ]
}

pub fn get_tool(name: &str) -> Option<ToolDefinition> {
    all_tools().into_iter().find(|t| t.name == name)
}
