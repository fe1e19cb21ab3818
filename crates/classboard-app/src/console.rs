//! Line-oriented command console.
//!
//! Each stdin line is one command, e.g. `down 120 340`, `pen #ff0000` or
//! `audio start`.

use classboard_core::PenColor;
use kurbo::Point;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command '{0}'")]
    Unknown(String),
    #[error("'{command}' expects {expected}")]
    Usage {
        command: &'static str,
        expected: &'static str,
    },
    #[error("Invalid number '{0}'")]
    Number(String),
    #[error("Invalid color '{0}', expected #RRGGBB")]
    Color(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCommand {
    Start,
    Stop,
    Retry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Resize { width: f64, height: f64 },
    Down(Point),
    Move(Point),
    Up,
    Undo,
    Clear,
    Page(u32),
    Next,
    Previous,
    Ask(String),
    Pen(PenColor),
    Width(f64),
    Eraser(bool),
    Audio(AudioCommand),
    Status,
    Quit,
}

/// Parse one console line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match name.to_ascii_lowercase().as_str() {
        "resize" => {
            let [width, height] = numbers(&args, "resize", "<width> <height>")?;
            Command::Resize { width, height }
        }
        "down" => Command::Down(point(&args, "down")?),
        "move" => Command::Move(point(&args, "move")?),
        "up" => Command::Up,
        "undo" => Command::Undo,
        "clear" => Command::Clear,
        "page" => match args.as_slice() {
            [page] => Command::Page(
                page.parse()
                    .map_err(|_| CommandError::Number(page.to_string()))?,
            ),
            _ => {
                return Err(CommandError::Usage {
                    command: "page",
                    expected: "<page number>",
                });
            }
        },
        "next" => Command::Next,
        "prev" | "previous" => Command::Previous,
        "ask" => {
            if rest.is_empty() {
                return Err(CommandError::Usage {
                    command: "ask",
                    expected: "a question",
                });
            }
            Command::Ask(rest.to_string())
        }
        "pen" => match args.as_slice() {
            [hex] => Command::Pen(
                PenColor::from_hex(hex).ok_or_else(|| CommandError::Color(hex.to_string()))?,
            ),
            _ => {
                return Err(CommandError::Usage {
                    command: "pen",
                    expected: "<#RRGGBB>",
                });
            }
        },
        "width" => {
            let [width] = numbers(&args, "width", "<stroke width>")?;
            Command::Width(width)
        }
        "eraser" => match args.as_slice() {
            ["on"] => Command::Eraser(true),
            ["off"] => Command::Eraser(false),
            _ => {
                return Err(CommandError::Usage {
                    command: "eraser",
                    expected: "on|off",
                });
            }
        },
        "audio" => match args.as_slice() {
            ["start"] => Command::Audio(AudioCommand::Start),
            ["stop"] => Command::Audio(AudioCommand::Stop),
            ["retry"] => Command::Audio(AudioCommand::Retry),
            _ => {
                return Err(CommandError::Usage {
                    command: "audio",
                    expected: "start|stop|retry",
                });
            }
        },
        "status" => Command::Status,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn numbers<const N: usize>(
    args: &[&str],
    command: &'static str,
    expected: &'static str,
) -> Result<[f64; N], CommandError> {
    if args.len() != N {
        return Err(CommandError::Usage { command, expected });
    }
    let mut values = [0.0; N];
    for (value, arg) in values.iter_mut().zip(args) {
        *value = arg
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| CommandError::Number(arg.to_string()))?;
    }
    Ok(values)
}

fn point(args: &[&str], command: &'static str) -> Result<Point, CommandError> {
    let [x, y] = numbers(args, command, "<x> <y>")?;
    Ok(Point::new(x, y))
}
