//! Pattern library.
//!
//! A [`Pattern`] expands into a list of relative XY moves starting from the
//! current tool position.  Circle and square paths are closed: their steps
//! sum to zero on both axes, so running one leaves the axes where they began.

use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of straight segments used to approximate a full circle.
const CIRCLE_SEGMENTS: u32 = 24;

/// Number of turns a spiral makes before reaching its full radius.
const SPIRAL_TURNS: u32 = 3;

/// Segments per spiral turn.
const SPIRAL_SEGMENTS_PER_TURN: u32 = 16;

/// A named motion pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    Circle,
    Square,
    Spiral,
}

/// One relative XY move of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternStep {
    pub dx: i32,
    pub dy: i32,
}

/// Returned when a string does not name a pattern.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown pattern: {0:?} (expected circle, square or spiral)")]
pub struct ParsePatternError(String);

impl Pattern {
    pub const ALL: [Pattern; 3] = [Pattern::Circle, Pattern::Square, Pattern::Spiral];

    /// Short description shown in the pattern library.
    pub fn description(self) -> &'static str {
        match self {
            Pattern::Circle => "Perfect circles",
            Pattern::Square => "Precise squares",
            Pattern::Spiral => "Spiral movements",
        }
    }

    /// Expands the pattern at the given size (radius or side length, in
    /// steps).  A size of zero yields no moves.
    pub fn expand(self, size: u16) -> Vec<PatternStep> {
        if size == 0 {
            return Vec::new();
        }
        let size = f64::from(size);
        match self {
            Pattern::Square => {
                let s = size as i32;
                vec![
                    PatternStep { dx: s, dy: 0 },
                    PatternStep { dx: 0, dy: s },
                    PatternStep { dx: -s, dy: 0 },
                    PatternStep { dx: 0, dy: -s },
                ]
            }
            Pattern::Circle => {
                // Vertex k sits at angle k/N of a turn on a circle whose
                // centre is one radius to the -X side of the start point.
                let vertices = (0..=CIRCLE_SEGMENTS).map(|k| {
                    let angle = TAU * f64::from(k) / f64::from(CIRCLE_SEGMENTS);
                    polar(size, angle)
                });
                deltas(vertices)
            }
            Pattern::Spiral => {
                let total = SPIRAL_TURNS * SPIRAL_SEGMENTS_PER_TURN;
                let vertices = (0..=total).map(|k| {
                    let progress = f64::from(k) / f64::from(total);
                    let angle = TAU * f64::from(SPIRAL_TURNS) * progress;
                    polar(size * progress, angle)
                });
                deltas(vertices)
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pattern::Circle => "Circle",
            Pattern::Square => "Square",
            Pattern::Spiral => "Spiral",
        };
        f.write_str(name)
    }
}

impl FromStr for Pattern {
    type Err = ParsePatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "circle" => Ok(Pattern::Circle),
            "square" => Ok(Pattern::Square),
            "spiral" => Ok(Pattern::Spiral),
            _ => Err(ParsePatternError(s.to_string())),
        }
    }
}

fn polar(radius: f64, angle: f64) -> (i32, i32) {
    (
        (radius * angle.cos()).round() as i32,
        (radius * angle.sin()).round() as i32,
    )
}

/// Turns absolute vertices into relative moves, dropping zero-length ones.
fn deltas(vertices: impl Iterator<Item = (i32, i32)>) -> Vec<PatternStep> {
    let mut steps = Vec::new();
    let mut previous: Option<(i32, i32)> = None;
    for vertex in vertices {
        if let Some((px, py)) = previous {
            let step = PatternStep {
                dx: vertex.0 - px,
                dy: vertex.1 - py,
            };
            if step.dx != 0 || step.dy != 0 {
                steps.push(step);
            }
        }
        previous = Some(vertex);
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net_displacement(steps: &[PatternStep]) -> (i64, i64) {
        steps.iter().fold((0, 0), |(x, y), s| {
            (x + i64::from(s.dx), y + i64::from(s.dy))
        })
    }

    #[test]
    fn test_square_is_four_sides_of_equal_length() {
        let steps = Pattern::Square.expand(100);
        assert_eq!(steps.len(), 4);
        assert!(steps.iter().all(|s| s.dx.abs() + s.dy.abs() == 100));
        assert_eq!(net_displacement(&steps), (0, 0));
    }

    #[test]
    fn test_circle_is_closed() {
        // Arrange / Act
        let steps = Pattern::Circle.expand(500);

        // Assert
        assert_eq!(steps.len(), CIRCLE_SEGMENTS as usize);
        assert_eq!(net_displacement(&steps), (0, 0));
    }

    #[test]
    fn test_spiral_ends_at_full_radius() {
        // Arrange / Act
        let steps = Pattern::Spiral.expand(300);

        // Assert – after whole turns the spiral ends on the +X axis at `size`
        assert_eq!(net_displacement(&steps), (300, 0));
    }

    #[test]
    fn test_zero_size_yields_no_moves() {
        for pattern in Pattern::ALL {
            assert!(pattern.expand(0).is_empty());
        }
    }

    #[test]
    fn test_max_size_does_not_overflow() {
        for pattern in Pattern::ALL {
            let steps = pattern.expand(u16::MAX);
            assert!(!steps.is_empty());
        }
    }

    #[test]
    fn test_pattern_parses_from_name() {
        assert_eq!("Circle".parse::<Pattern>(), Ok(Pattern::Circle));
        assert_eq!("spiral".parse::<Pattern>(), Ok(Pattern::Spiral));
        assert!("triangle".parse::<Pattern>().is_err());
    }
}
