//! Remote display capability
//!
//! The wire protocol sits behind these two traits. Calls are blocking and are
//! only ever made from the worker pool, one at a time per connection.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::frame::RawFrame;
use crate::keys::KeyToken;

/// Pointer button, numbered the way RFB and X11 number them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
    ScrollUp,
    ScrollDown,
}

impl MouseButton {
    /// 1-based button index.
    pub fn index(self) -> u8 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Middle => 2,
            MouseButton::Right => 3,
            MouseButton::ScrollUp => 4,
            MouseButton::ScrollDown => 5,
        }
    }

    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            1 => Ok(MouseButton::Left),
            2 => Ok(MouseButton::Middle),
            3 => Ok(MouseButton::Right),
            4 => Ok(MouseButton::ScrollUp),
            5 => Ok(MouseButton::ScrollDown),
            other => Err(Error::invalid(format!("mouse button must be 1-5, got {}", other))),
        }
    }

    /// Accepts `"left"`/`"middle"`/`"right"` or a 1-based index.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "left" | "l" => Ok(MouseButton::Left),
            "middle" | "m" => Ok(MouseButton::Middle),
            "right" | "r" => Ok(MouseButton::Right),
            "scroll_up" | "wheel_up" => Ok(MouseButton::ScrollUp),
            "scroll_down" | "wheel_down" => Ok(MouseButton::ScrollDown),
            other => other
                .parse::<u8>()
                .map_err(|_| Error::invalid(format!("unknown mouse button: {}", s)))
                .and_then(Self::from_index),
        }
    }

    /// Bit in the RFB pointer-event button mask.
    pub fn mask(self) -> u8 {
        1 << (self.index() - 1)
    }
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Accepts a name (`"left"`) or a 1-based index (`1`, `"1"`).
impl<'de> Deserialize<'de> for MouseButton {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Index(u64),
            Name(String),
        }

        let parsed = match Repr::deserialize(deserializer)? {
            Repr::Index(n) => u8::try_from(n)
                .map_err(|_| Error::invalid(format!("mouse button must be 1-5, got {}", n)))
                .and_then(MouseButton::from_index),
            Repr::Name(s) => MouseButton::parse(&s),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

/// One live connection to a remote framebuffer server.
pub trait RemoteDisplay: Send {
    /// Fetch the full current framebuffer.
    fn capture(&mut self) -> Result<RawFrame>;

    /// Press (`down = true`) or release a key.
    fn key_event(&mut self, key: &KeyToken, down: bool) -> Result<()>;

    fn pointer_move(&mut self, x: u16, y: u16) -> Result<()>;

    /// Press or release a button at the last pointer position.
    fn button(&mut self, button: MouseButton, down: bool) -> Result<()>;

    /// Close the transport. Must be safe to call more than once.
    fn close(&mut self);
}

/// Opens [`RemoteDisplay`] connections.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &SessionConfig) -> Result<Box<dyn RemoteDisplay>>;
}
