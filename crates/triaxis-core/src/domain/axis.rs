//! Per-axis motion state.
//!
//! The controller application keeps its own view of where each axis is and
//! what speed/torque it should use.  There is no position feedback from the
//! board, so [`AxisBank`] is the single source of truth: it changes only when
//! a move is accepted for dispatch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound of the speed control, in firmware speed units.
pub const MAX_SPEED: u16 = 1000;

/// Upper bound of the torque control, in percent of rated current.
pub const MAX_TORQUE: u8 = 100;

/// Speed every axis starts with.
pub const DEFAULT_SPEED: u16 = 50;

/// Torque every axis starts with.
pub const DEFAULT_TORQUE: u8 = 50;

/// One of the three stepper axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Axis {
    X = 0x01,
    Y = 0x02,
    Z = 0x03,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl TryFrom<u8> for Axis {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Axis::X),
            0x02 => Ok(Axis::Y),
            0x03 => Ok(Axis::Z),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(name)
    }
}

impl FromStr for Axis {
    type Err = AxisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "x" | "X" => Ok(Axis::X),
            "y" | "Y" => Ok(Axis::Y),
            "z" | "Z" => Ok(Axis::Z),
            other => Err(AxisError::UnknownAxis(other.to_string())),
        }
    }
}

/// Errors raised by axis state updates.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AxisError {
    #[error("unknown axis {0:?} (expected X, Y or Z)")]
    UnknownAxis(String),

    #[error("speed {0} is out of range (0..=1000)")]
    SpeedOutOfRange(u16),

    #[error("torque {0} is out of range (0..=100)")]
    TorqueOutOfRange(u8),

    #[error("moving {axis} by {steps} steps would overflow its position counter")]
    PositionOverflow { axis: Axis, steps: i32 },
}

/// Position and motion targets of a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisState {
    /// Signed step count relative to where the session started.
    pub position: i64,
    /// Target speed used for the next move.
    pub speed: u16,
    /// Target torque used for the next move.
    pub torque: u8,
}

impl Default for AxisState {
    fn default() -> Self {
        Self {
            position: 0,
            speed: DEFAULT_SPEED,
            torque: DEFAULT_TORQUE,
        }
    }
}

/// State of all three axes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisBank {
    axes: [AxisState; 3],
}

impl AxisBank {
    /// Creates a bank whose axes all start at the given speed and torque.
    ///
    /// # Errors
    ///
    /// Returns [`AxisError`] if either value is out of range.
    pub fn with_targets(speed: u16, torque: u8) -> Result<Self, AxisError> {
        validate_speed(speed)?;
        validate_torque(torque)?;
        let state = AxisState {
            position: 0,
            speed,
            torque,
        };
        Ok(Self {
            axes: [state; 3],
        })
    }

    pub fn get(&self, axis: Axis) -> AxisState {
        self.axes[axis.index()]
    }

    /// Returns `(axis, state)` pairs in X, Y, Z order.
    pub fn iter(&self) -> impl Iterator<Item = (Axis, AxisState)> + '_ {
        Axis::ALL.iter().map(move |&axis| (axis, self.get(axis)))
    }

    /// Computes the position an axis would reach after `steps`, without
    /// changing anything.
    ///
    /// # Errors
    ///
    /// Returns [`AxisError::PositionOverflow`] if the counter would overflow.
    pub fn preview_move(&self, axis: Axis, steps: i32) -> Result<i64, AxisError> {
        self.get(axis)
            .position
            .checked_add(i64::from(steps))
            .ok_or(AxisError::PositionOverflow { axis, steps })
    }

    /// Applies a relative move and returns the new position.
    ///
    /// # Errors
    ///
    /// Returns [`AxisError::PositionOverflow`] if the counter would overflow;
    /// the state is left unchanged in that case.
    pub fn apply_move(&mut self, axis: Axis, steps: i32) -> Result<i64, AxisError> {
        let position = self.preview_move(axis, steps)?;
        self.axes[axis.index()].position = position;
        Ok(position)
    }

    /// # Errors
    ///
    /// Returns [`AxisError::SpeedOutOfRange`] above [`MAX_SPEED`].
    pub fn set_speed(&mut self, axis: Axis, speed: u16) -> Result<(), AxisError> {
        validate_speed(speed)?;
        self.axes[axis.index()].speed = speed;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`AxisError::TorqueOutOfRange`] above [`MAX_TORQUE`].
    pub fn set_torque(&mut self, axis: Axis, torque: u8) -> Result<(), AxisError> {
        validate_torque(torque)?;
        self.axes[axis.index()].torque = torque;
        Ok(())
    }
}

fn validate_speed(speed: u16) -> Result<(), AxisError> {
    if speed > MAX_SPEED {
        return Err(AxisError::SpeedOutOfRange(speed));
    }
    Ok(())
}

fn validate_torque(torque: u8) -> Result<(), AxisError> {
    if torque > MAX_TORQUE {
        return Err(AxisError::TorqueOutOfRange(torque));
    }
    Ok(())
}
