//! Line-oriented console front end.
//!
//! [`parse_command`] turns one input line into a [`ConsoleCommand`], checking
//! only its shape and numeric arguments.  Names (axes, directions, patterns,
//! transports) are passed through as text and validated by the UI bridge,
//! so the console and any other front end report the same errors.
//!
//! [`execute`] runs a command against the bridge and renders the result;
//! [`describe_event`] renders the events printed as they arrive.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use triaxis_core::TransportKind;

use crate::application::events::ControllerEvent;
use crate::application::session::StopOutcome;
use crate::infrastructure::ui_bridge::{self, AppState, CommandResult, DeviceDto};

/// Size used by `pattern <name>` when none is given.
pub const DEFAULT_PATTERN_SIZE: u16 = 100;

pub const HELP: &str = "\
commands:
  scan [bluetooth|wifi]        find boards (default bluetooth)
  devices                      list the last scan
  connect <n|id|ip>            connect to a board from the last scan, or an IP
  disconnect                   end the session
  move <axis> <steps>          relative move, e.g. move x -200
  jog <axis> <+|->             one jog step
  speed <axis> <0-1000>        set target speed
  torque <axis> <0-100>        set target torque
  pattern <name> [size]        run circle, square or spiral
  patterns                     list patterns
  stop                         emergency stop
  status                       session and axis state
  help                         this text
  quit                         disconnect and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Scan { transport: String },
    Devices,
    Connect { target: String },
    Disconnect,
    Move { axis: String, steps: i32 },
    Jog { axis: String, direction: String },
    Speed { axis: String, speed: u16 },
    Torque { axis: String, torque: u8 },
    Pattern { name: String, size: u16 },
    Patterns,
    Stop,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0:?}; type help")]
    Unknown(String),

    #[error("{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("{command}: {argument} must be a number in range, got {value:?}")]
    InvalidNumber {
        command: &'static str,
        argument: &'static str,
        value: String,
    },

    #[error("{0}: too many arguments")]
    TooManyArguments(&'static str),
}

/// Parses one console line.
///
/// # Errors
///
/// Returns [`ParseCommandError`] for blank lines, unknown verbs, missing or
/// extra arguments, and numbers that do not fit their range.
pub fn parse_command(line: &str) -> Result<ConsoleCommand, ParseCommandError> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or(ParseCommandError::Empty)?.to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let command = match verb.as_str() {
        "scan" => {
            max_args("scan", &args, 1)?;
            ConsoleCommand::Scan {
                transport: args.first().unwrap_or(&"bluetooth").to_string(),
            }
        }
        "devices" | "ls" => no_args("devices", &args, ConsoleCommand::Devices)?,
        "connect" => {
            max_args("connect", &args, 1)?;
            ConsoleCommand::Connect {
                target: arg("connect", &args, 0, "device")?.to_string(),
            }
        }
        "disconnect" => no_args("disconnect", &args, ConsoleCommand::Disconnect)?,
        "move" => {
            max_args("move", &args, 2)?;
            ConsoleCommand::Move {
                axis: arg("move", &args, 0, "axis")?.to_string(),
                steps: number("move", &args, 1, "steps")?,
            }
        }
        "jog" => {
            max_args("jog", &args, 2)?;
            ConsoleCommand::Jog {
                axis: arg("jog", &args, 0, "axis")?.to_string(),
                direction: arg("jog", &args, 1, "direction")?.to_string(),
            }
        }
        "speed" => {
            max_args("speed", &args, 2)?;
            ConsoleCommand::Speed {
                axis: arg("speed", &args, 0, "axis")?.to_string(),
                speed: number("speed", &args, 1, "speed")?,
            }
        }
        "torque" => {
            max_args("torque", &args, 2)?;
            ConsoleCommand::Torque {
                axis: arg("torque", &args, 0, "axis")?.to_string(),
                torque: number("torque", &args, 1, "torque")?,
            }
        }
        "pattern" => {
            max_args("pattern", &args, 2)?;
            ConsoleCommand::Pattern {
                name: arg("pattern", &args, 0, "pattern name")?.to_string(),
                size: if args.len() > 1 {
                    number("pattern", &args, 1, "size")?
                } else {
                    DEFAULT_PATTERN_SIZE
                },
            }
        }
        "patterns" => no_args("patterns", &args, ConsoleCommand::Patterns)?,
        "stop" | "estop" | "!" => no_args("stop", &args, ConsoleCommand::Stop)?,
        "status" => no_args("status", &args, ConsoleCommand::Status)?,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => return Err(ParseCommandError::Unknown(verb)),
    };
    Ok(command)
}

fn arg<'a>(
    command: &'static str,
    args: &[&'a str],
    index: usize,
    argument: &'static str,
) -> Result<&'a str, ParseCommandError> {
    args.get(index)
        .copied()
        .ok_or(ParseCommandError::MissingArgument { command, argument })
}

fn number<T: std::str::FromStr>(
    command: &'static str,
    args: &[&str],
    index: usize,
    argument: &'static str,
) -> Result<T, ParseCommandError> {
    let raw = arg(command, args, index, argument)?;
    raw.parse().map_err(|_| ParseCommandError::InvalidNumber {
        command,
        argument,
        value: raw.to_string(),
    })
}

fn max_args(command: &'static str, args: &[&str], max: usize) -> Result<(), ParseCommandError> {
    if args.len() > max {
        return Err(ParseCommandError::TooManyArguments(command));
    }
    Ok(())
}

fn no_args(
    command: &'static str,
    args: &[&str],
    parsed: ConsoleCommand,
) -> Result<ConsoleCommand, ParseCommandError> {
    max_args(command, args, 0)?;
    Ok(parsed)
}

// ── Execution ─────────────────────────────────────────────────────────────────

/// Runs `command` and returns the text to print.
pub async fn execute(state: &Arc<AppState>, command: ConsoleCommand) -> String {
    let state = Arc::clone(state);
    match command {
        ConsoleCommand::Scan { transport } => {
            render(ui_bridge::scan(state, transport).await, |d| device_table(&d))
        }
        ConsoleCommand::Devices => {
            render(ui_bridge::get_devices(state).await, |d| device_table(&d))
        }
        ConsoleCommand::Connect { target } => {
            render(ui_bridge::connect(state, target).await, |s| match s.device {
                Some(d) => format!("connected to {} ({})", d.name, d.id),
                None => "connected".to_string(),
            })
        }
        ConsoleCommand::Disconnect => {
            render(ui_bridge::disconnect(state).await, |()| "disconnected".to_string())
        }
        ConsoleCommand::Move { axis, steps } => {
            render(ui_bridge::move_axis(state, axis, steps).await, |a| {
                format!("{} -> {}", a.axis, a.position)
            })
        }
        ConsoleCommand::Jog { axis, direction } => {
            render(ui_bridge::jog(state, axis, direction).await, |a| {
                format!("{} -> {}", a.axis, a.position)
            })
        }
        ConsoleCommand::Speed { axis, speed } => {
            render(ui_bridge::set_speed(state, axis, speed).await, |a| {
                format!("{} speed {}", a.axis, a.speed)
            })
        }
        ConsoleCommand::Torque { axis, torque } => {
            render(ui_bridge::set_torque(state, axis, torque).await, |a| {
                format!("{} torque {}%", a.axis, a.torque)
            })
        }
        ConsoleCommand::Pattern { name, size } => {
            render(ui_bridge::run_pattern(state, name, size).await, |run| {
                if run.interrupted {
                    format!("{} interrupted after {} moves", run.pattern, run.moves)
                } else {
                    format!("{} queued ({} moves)", run.pattern, run.moves)
                }
            })
        }
        ConsoleCommand::Patterns => render(ui_bridge::list_patterns(state).await, |patterns| {
            let mut out = String::new();
            for p in patterns {
                let _ = writeln!(out, "  {:<8} {}", p.name, p.description);
            }
            out.trim_end().to_string()
        }),
        ConsoleCommand::Stop => render(ui_bridge::emergency_stop(state).await, |o| match o {
            StopOutcome::Dispatched { device } => format!("EMERGENCY STOP sent to {device}"),
            StopOutcome::NotConnected => "emergency stop: not connected".to_string(),
        }),
        ConsoleCommand::Status => render(ui_bridge::get_status(state).await, |status| {
            let mut out = format!("session: {:?}", status.session.phase).to_lowercase();
            if let Some(d) = status.session.device {
                let _ = write!(out, " ({} {})", d.name, d.id);
            }
            for a in status.axes {
                let _ = write!(
                    out,
                    "\n  {}  pos {:>8}  speed {:>4}  torque {:>3}%",
                    a.axis, a.position, a.speed, a.torque
                );
            }
            let _ = write!(out, "\n  jog step {}", status.jog_step);
            out
        }),
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => "bye".to_string(),
    }
}

fn render<T: Serialize>(result: CommandResult<T>, ok: impl FnOnce(T) -> String) -> String {
    match (result.success, result.data) {
        (true, Some(data)) => ok(data),
        _ => format!(
            "error: {}",
            result.error.unwrap_or_else(|| "unknown failure".to_string())
        ),
    }
}

fn device_table(devices: &[DeviceDto]) -> String {
    if devices.is_empty() {
        return "no devices found".to_string();
    }
    let mut out = String::new();
    for (i, d) in devices.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>2}. {:<34} {:<20} {} {:>4} dBm",
            i + 1,
            d.name,
            d.id,
            d.signal_bars,
            d.signal_dbm
        );
    }
    out.trim_end().to_string()
}

/// One-line rendering of an event for the console.
pub fn describe_event(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::ScanCompleted {
            transport, devices, ..
        } => format!("[scan] {} found {} device(s)", transport, devices.len()),
        ControllerEvent::Connecting { device } => {
            format!("[session] connecting to {} over {}", device.name, device.transport)
        }
        ControllerEvent::Connected { device, .. } => {
            format!("[session] connected to {} ({})", device.name, device.id)
        }
        ControllerEvent::ConnectFailed { device, reason } => {
            format!("[session] connect to {device} failed: {reason}")
        }
        ControllerEvent::Disconnected { device, .. } => {
            format!("[session] disconnected from {device}")
        }
        ControllerEvent::LinkLost { device, reason, .. } => {
            format!("[session] link to {device} lost: {reason}")
        }
        ControllerEvent::MoveQueued {
            axis,
            steps,
            position,
        } => format!("[move] {axis} {steps:+} -> {position}"),
        ControllerEvent::EmergencyStopSent {
            device,
            discarded_moves,
        } => format!("[stop] {device} stopped, {discarded_moves} queued move(s) dropped"),
        ControllerEvent::EmergencyStopWithoutSession => {
            "[stop] no session; nothing to stop".to_string()
        }
        ControllerEvent::PatternFinished {
            pattern,
            moves,
            interrupted,
        } => {
            if *interrupted {
                format!("[pattern] {pattern} interrupted after {moves} move(s)")
            } else {
                format!("[pattern] {pattern} done, {moves} move(s)")
            }
        }
    }
}

/// Transport name accepted by `scan`, for prompts and help.
pub fn transport_name(kind: TransportKind) -> &'static str {
    match kind {
        TransportKind::ShortRange => "bluetooth",
        TransportKind::LocalNetwork => "wifi",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
