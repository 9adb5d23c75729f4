//! Input Sequencer - timed macros over session primitives
//!
//! Scenario scripts talk to a [`Sequencer`] rather than to a session, so a
//! recording implementation can stand in for the remote side in tests.
//! All settle delays come from the sequencer's [`Pacing`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PacingConfig;
use crate::error::{Error, Result};
use crate::keys::KeyToken;
use crate::session::RemoteSession;

/// Menu navigation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn key(self) -> KeyToken {
        match self {
            Direction::Up => KeyToken::Up,
            Direction::Down => KeyToken::Down,
            Direction::Left => KeyToken::Left,
            Direction::Right => KeyToken::Right,
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(Error::invalid(format!("unknown direction: {}", other))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        })
    }
}

/// Delays applied by sequencer macros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    /// Between characters of typed text.
    pub char_delay: Duration,
    /// After every navigation step.
    pub navigate_settle: Duration,
    /// After confirm / cancel.
    pub confirm_settle: Duration,
}

impl Pacing {
    pub fn immediate() -> Self {
        Self {
            char_delay: Duration::ZERO,
            navigate_settle: Duration::ZERO,
            confirm_settle: Duration::ZERO,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from(&PacingConfig::default())
    }
}

impl From<&PacingConfig> for Pacing {
    fn from(p: &PacingConfig) -> Self {
        Self {
            char_delay: Duration::from_millis(p.char_delay_ms),
            navigate_settle: Duration::from_millis(p.navigate_settle_ms),
            confirm_settle: Duration::from_millis(p.confirm_settle_ms),
        }
    }
}

/// Macro-level input operations used by scenario scripts.
#[async_trait]
pub trait Sequencer: Send + Sync {
    /// Press `key` `count` times.
    async fn key(&self, key: &KeyToken, count: u32) -> Result<()>;

    async fn type_text(&self, text: &str) -> Result<()>;

    /// Hold all but the last key, press the last, release in reverse.
    async fn press_combo(&self, keys: &[KeyToken]) -> Result<()>;

    /// `steps` presses of the direction key, settling after each one.
    async fn navigate(&self, direction: Direction, steps: u32) -> Result<()>;

    /// Enter, then settle.
    async fn confirm(&self) -> Result<()>;

    /// Escape, then settle.
    async fn cancel(&self) -> Result<()>;
}

/// [`Sequencer`] driving a live [`RemoteSession`].
pub struct SessionSequencer {
    session: Arc<RemoteSession>,
    pacing: Pacing,
}

impl SessionSequencer {
    pub fn new(session: Arc<RemoteSession>, pacing: Pacing) -> Self {
        Self { session, pacing }
    }

    pub fn pacing(&self) -> &Pacing {
        &self.pacing
    }

    pub fn session(&self) -> &Arc<RemoteSession> {
        &self.session
    }
}

async fn settle(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

#[async_trait]
impl Sequencer for SessionSequencer {
    async fn key(&self, key: &KeyToken, count: u32) -> Result<()> {
        self.session.send_key(key, count).await
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.session.type_text(text, self.pacing.char_delay).await
    }

    async fn press_combo(&self, keys: &[KeyToken]) -> Result<()> {
        match keys {
            [] => Err(Error::invalid("empty key combination")),
            [single] => self.session.send_key(single, 1).await,
            _ => {
                debug!(
                    session = %self.session.name(),
                    combo = %keys.iter().map(KeyToken::name).collect::<Vec<_>>().join("+"),
                    "Pressing combo"
                );
                self.session.key_combo(keys).await
            }
        }
    }

    async fn navigate(&self, direction: Direction, steps: u32) -> Result<()> {
        let key = direction.key();
        for _ in 0..steps {
            self.session.send_key(&key, 1).await?;
            settle(self.pacing.navigate_settle).await;
        }
        Ok(())
    }

    async fn confirm(&self) -> Result<()> {
        self.session.send_key(&KeyToken::Enter, 1).await?;
        settle(self.pacing.confirm_settle).await;
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        self.session.send_key(&KeyToken::Escape, 1).await?;
        settle(self.pacing.confirm_settle).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::pool::WorkerPool;
    use crate::session::SessionTiming;
    use crate::testing::{key_presses, DisplayEvent, MockConnector};
    use std::time::Instant;

    async fn sequencer(pacing: Pacing) -> (Arc<MockConnector>, SessionSequencer) {
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
        (connector, SessionSequencer::new(session, pacing))
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("Down".parse::<Direction>().unwrap(), Direction::Down);
        assert_eq!(Direction::Left.key(), KeyToken::Left);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[tokio::test]
    async fn test_navigate_settles_after_each_step() {
        let pacing = Pacing {
            navigate_settle: Duration::from_millis(20),
            ..Pacing::immediate()
        };
        let (connector, seq) = sequencer(pacing).await;

        let start = Instant::now();
        seq.navigate(Direction::Down, 3).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(connector.events(), key_presses(&KeyToken::Down, 3));
    }

    #[tokio::test]
    async fn test_confirm_and_cancel() {
        let (connector, seq) = sequencer(Pacing::immediate()).await;
        seq.confirm().await.unwrap();
        seq.cancel().await.unwrap();
        assert_eq!(
            connector.events(),
            vec![
                DisplayEvent::KeyDown(KeyToken::Enter),
                DisplayEvent::KeyUp(KeyToken::Enter),
                DisplayEvent::KeyDown(KeyToken::Escape),
                DisplayEvent::KeyUp(KeyToken::Escape),
            ]
        );
    }

    #[tokio::test]
    async fn test_press_combo() {
        let (connector, seq) = sequencer(Pacing::immediate()).await;

        seq.press_combo(&crate::keys::parse_combo("ctrl+alt+t").unwrap())
            .await
            .unwrap();
        assert_eq!(
            connector.events(),
            vec![
                DisplayEvent::KeyDown(KeyToken::Ctrl),
                DisplayEvent::KeyDown(KeyToken::Alt),
                DisplayEvent::KeyDown(KeyToken::Char('t')),
                DisplayEvent::KeyUp(KeyToken::Char('t')),
                DisplayEvent::KeyUp(KeyToken::Alt),
                DisplayEvent::KeyUp(KeyToken::Ctrl),
            ]
        );

        connector.clear_events();
        seq.press_combo(&[KeyToken::F(10)]).await.unwrap();
        assert_eq!(connector.events().len(), 2);

        assert!(seq.press_combo(&[]).await.is_err());
    }
}
