//! CommandDispatcher: turns manual-control requests into queued commands.
//!
//! The dispatcher owns the [`AxisBank`] and is the only writer to it.  A move
//! is checked against the bank, queued on the active session, and only then
//! applied, so a move that cannot be sent leaves the axis state untouched.
//!
//! Positions are commanded positions.  They change only through moves and
//! carry over from one session to the next.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use triaxis_core::protocol::messages::MoveAxisMessage;
use triaxis_core::{Axis, AxisBank, AxisState, Pattern};

use crate::application::errors::ControlError;
use crate::application::events::ControllerEvent;
use crate::application::session::{SessionManager, StopOutcome};

/// Jog direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown direction: {0:?} (expected + or -)")]
pub struct ParseDirectionError(String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "+" | "pos" | "positive" | "up" | "right" => Ok(Direction::Positive),
            "-" | "neg" | "negative" | "down" | "left" => Ok(Direction::Negative),
            _ => Err(ParseDirectionError(s.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Positive => "+",
            Direction::Negative => "-",
        })
    }
}

/// Summary of a pattern run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternRun {
    pub pattern: Pattern,
    /// Single-axis moves queued.
    pub moves: usize,
    /// An emergency stop arrived before the pattern was fully queued.
    pub interrupted: bool,
}

pub struct CommandDispatcher {
    session: Arc<SessionManager>,
    axes: Mutex<AxisBank>,
    jog_step: i32,
    stop_epoch: AtomicU64,
}

impl CommandDispatcher {
    /// `jog_step` is clamped to `1..=i32::MAX`.
    pub fn new(session: Arc<SessionManager>, axes: AxisBank, jog_step: u32) -> Self {
        let jog_step = i32::try_from(jog_step.max(1)).unwrap_or(i32::MAX);
        Self {
            session,
            axes: Mutex::new(axes),
            jog_step,
            stop_epoch: AtomicU64::new(0),
        }
    }

    pub async fn axes(&self) -> AxisBank {
        self.axes.lock().await.clone()
    }

    pub fn jog_step(&self) -> i32 {
        self.jog_step
    }

    /// Queues a relative move on the active session.
    ///
    /// # Errors
    ///
    /// [`ControlError::NotConnected`] with no session, or
    /// [`ControlError::LinkLost`] if the last one dropped on its own; axis
    /// state is unchanged either way.  [`ControlError::InvalidParameter`] if
    /// the position would overflow.
    pub async fn move_axis(&self, axis: Axis, steps: i32) -> Result<AxisState, ControlError> {
        let mut bank = self.axes.lock().await;
        let queue = self.session.move_sender().await?;

        bank.preview_move(axis, steps)?;
        let target = bank.get(axis);
        queue
            .send(MoveAxisMessage {
                axis,
                steps,
                speed: target.speed,
                torque: target.torque,
            })
            .await
            .map_err(|_| self.session.inactive_error())?;
        let position = bank.apply_move(axis, steps)?;

        debug!(%axis, steps, position, "move queued");
        self.session.publish(ControllerEvent::MoveQueued {
            axis,
            steps,
            position,
        });
        Ok(bank.get(axis))
    }

    /// Moves one jog step in `direction`.
    ///
    /// # Errors
    ///
    /// Same as [`move_axis`](Self::move_axis).
    pub async fn jog(&self, axis: Axis, direction: Direction) -> Result<AxisState, ControlError> {
        let steps = match direction {
            Direction::Positive => self.jog_step,
            Direction::Negative => -self.jog_step,
        };
        self.move_axis(axis, steps).await
    }

    /// # Errors
    ///
    /// [`ControlError::InvalidParameter`] above the speed limit.
    pub async fn set_speed(&self, axis: Axis, speed: u16) -> Result<AxisState, ControlError> {
        let mut bank = self.axes.lock().await;
        bank.set_speed(axis, speed)?;
        info!(%axis, speed, "speed target set");
        Ok(bank.get(axis))
    }

    /// # Errors
    ///
    /// [`ControlError::InvalidParameter`] above the torque limit.
    pub async fn set_torque(&self, axis: Axis, torque: u8) -> Result<AxisState, ControlError> {
        let mut bank = self.axes.lock().await;
        bank.set_torque(axis, torque)?;
        info!(%axis, torque, "torque target set");
        Ok(bank.get(axis))
    }

    /// Stops all motion.  Valid in any state; does not wait for the axis
    /// lock, so it is never held up behind a move waiting for queue space.
    pub async fn emergency_stop(&self) -> StopOutcome {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        self.session.emergency_stop().await
    }

    /// Expands `pattern` and queues its moves in order, X before Y for each
    /// segment.  Stops queuing as soon as an emergency stop is requested.
    ///
    /// # Errors
    ///
    /// [`ControlError::NotConnected`] with no session, or the first error a
    /// move returns.
    pub async fn run_pattern(&self, pattern: Pattern, size: u16) -> Result<PatternRun, ControlError> {
        if !self.session.state().is_connected() {
            return Err(self.session.inactive_error());
        }

        let epoch = self.stop_epoch.load(Ordering::SeqCst);
        let mut moves = 0;
        let mut interrupted = false;

        'segments: for step in pattern.expand(size) {
            for (axis, delta) in [(Axis::X, step.dx), (Axis::Y, step.dy)] {
                if delta == 0 {
                    continue;
                }
                if self.stop_epoch.load(Ordering::SeqCst) != epoch {
                    interrupted = true;
                    break 'segments;
                }
                self.move_axis(axis, delta).await?;
                moves += 1;
            }
        }

        info!(%pattern, size, moves, interrupted, "pattern queued");
        self.session.publish(ControllerEvent::PatternFinished {
            pattern,
            moves,
            interrupted,
        });
        Ok(PatternRun {
            pattern,
            moves,
            interrupted,
        })
    }
}
