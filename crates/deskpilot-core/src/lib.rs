//! deskpilot-core - remote display session automation
//!
//! Keeps named connections to remote framebuffer (VNC) servers, captures and
//! encodes frames, injects keyboard and pointer input, and runs scripted
//! procedures (firmware setup navigation, OS login, shell commands) on top.
//!
//! # Layout
//!
//! - [`registry`]: named sessions, one lock held only for lookups
//! - [`session`]: one connection; every call serialized, blocking I/O on a
//!   bounded [`pool`]
//! - [`frame`]: resize + JPEG encode
//! - [`sequencer`]: timed input macros
//! - [`classifier`]: pluggable screen-state detection and `wait_for_state`
//! - [`scenario`]: firmware and system scripts
//! - [`rfb`]: the RFB protocol backend behind [`backend::Connector`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use deskpilot_core::{Automation, DeskpilotConfig, RfbConnector, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> deskpilot_core::Result<()> {
//!     let config = DeskpilotConfig::default();
//!     let connector = Arc::new(RfbConnector::new(config.io_timeout()));
//!     let automation = Automation::new(config, connector);
//!
//!     automation
//!         .create_session("lab", SessionConfig::new("10.0.0.5", 5901).with_password("secret"))
//!         .await?;
//!     automation.send_keys("lab", "f2", 1).await?;
//!     let shot = automation.screenshot("lab", None, None).await?;
//!     println!("{}x{}", shot.width, shot.height);
//!     Ok(())
//! }
//! ```

pub mod automation;
pub mod backend;
pub mod classifier;
pub mod config;
pub mod error;
pub mod frame;
pub mod keys;
pub mod pool;
pub mod registry;
pub mod rfb;
pub mod scenario;
pub mod sequencer;
pub mod session;
pub mod stream;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use automation::Automation;
pub use backend::{Connector, MouseButton, RemoteDisplay};
pub use classifier::{
    wait_for_state, Classification, Detection, FirmwareMenu, KeywordClassifier, NullClassifier,
    OsType, ScreenSource, StateClassifier, SystemState, TextRecognizer, WaitOptions, WaitOutcome,
};
pub use config::{DeskpilotConfig, SessionConfig, SessionPreset};
pub use error::{Error, Result};
pub use frame::{EncodedFrame, FrameFormat, RawFrame};
pub use keys::KeyToken;
pub use pool::WorkerPool;
pub use registry::{RegistryEvent, RemoveOutcome, SessionRegistry};
pub use rfb::RfbConnector;
pub use scenario::{Scenario, ScenarioContext, ScenarioResult, ScenarioTiming, StepOutcome};
pub use sequencer::{Direction, Pacing, Sequencer, SessionSequencer};
pub use session::{RemoteSession, SessionState, SessionStatus, SessionTiming};
pub use stream::{FrameStream, StreamEvent, StreamOptions};
