use thiserror::Error;

use crate::gpu::PresentMode;

/// Debug/operational commands: free text, fixed argument counts, validated
/// before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Override the presented backbuffer with an arbitrary image view
    /// (packed handle key), or clear the override with `none`.
    RtOverride(Option<u32>),
    Resize { width: u32, height: u32 },
    PresentMode(PresentMode),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("`{command}` expects {expected} argument(s), got {got}")]
    BadArgCount {
        command: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid argument `{0}`")]
    BadArgument(String),
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Err(ConsoleError::UnknownCommand(String::new()));
    };
    let args: Vec<&str> = parts.collect();

    match command {
        "rt_override" => {
            expect_args("rt_override", &args, 1)?;
            if args[0] == "none" {
                Ok(ConsoleCommand::RtOverride(None))
            } else {
                let key = args[0]
                    .parse::<u32>()
                    .map_err(|_| ConsoleError::BadArgument(args[0].into()))?;
                Ok(ConsoleCommand::RtOverride(Some(key)))
            }
        }
        "resize" => {
            expect_args("resize", &args, 2)?;
            let width = parse_dim(args[0])?;
            let height = parse_dim(args[1])?;
            Ok(ConsoleCommand::Resize { width, height })
        }
        "present_mode" => {
            expect_args("present_mode", &args, 1)?;
            let mode = match args[0] {
                "immediate" => PresentMode::Immediate,
                "fifo" => PresentMode::Fifo,
                "mailbox" => PresentMode::Mailbox,
                other => return Err(ConsoleError::BadArgument(other.into())),
            };
            Ok(ConsoleCommand::PresentMode(mode))
        }
        other => Err(ConsoleError::UnknownCommand(other.into())),
    }
}

fn expect_args(
    command: &'static str,
    args: &[&str],
    expected: usize,
) -> Result<(), ConsoleError> {
    if args.len() != expected {
        return Err(ConsoleError::BadArgCount {
            command,
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn parse_dim(s: &str) -> Result<u32, ConsoleError> {
    let v = s
        .parse::<u32>()
        .map_err(|_| ConsoleError::BadArgument(s.into()))?;
    if v == 0 {
        return Err(ConsoleError::BadArgument(s.into()));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_commands() {
        assert_eq!(
            parse_command("rt_override none"),
            Ok(ConsoleCommand::RtOverride(None))
        );
        assert_eq!(
            parse_command("rt_override 65538"),
            Ok(ConsoleCommand::RtOverride(Some(65538)))
        );
        assert_eq!(
            parse_command("resize 1920 1080"),
            Ok(ConsoleCommand::Resize {
                width: 1920,
                height: 1080
            })
        );
        assert_eq!(
            parse_command("present_mode mailbox"),
            Ok(ConsoleCommand::PresentMode(PresentMode::Mailbox))
        );
    }

    #[test]
    fn rejects_wrong_arg_counts_before_dispatch() {
        assert_eq!(
            parse_command("resize 1920"),
            Err(ConsoleError::BadArgCount {
                command: "resize",
                expected: 2,
                got: 1
            })
        );
        assert_eq!(
            parse_command("rt_override"),
            Err(ConsoleError::BadArgCount {
                command: "rt_override",
                expected: 1,
                got: 0
            })
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            parse_command("resize 0 1080"),
            Err(ConsoleError::BadArgument(_))
        ));
        assert!(matches!(
            parse_command("present_mode quadbuffer"),
            Err(ConsoleError::BadArgument(_))
        ));
        assert!(matches!(
            parse_command("frobnicate 1"),
            Err(ConsoleError::UnknownCommand(_))
        ));
    }
}
