use std::{error::Error, fmt, io::BufRead, str::FromStr};

use log::{debug, warn};
use tokio::sync::mpsc;

/// An operator command, polled by the control loop between chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Save the longest running worker.
    Save,
    SaveLowestLoss,
    PrintTrainers,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command {:?}", self.0)
    }
}

impl Error for UnknownCommand {}

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "save" => Ok(Self::Save),
            "save_lowest_loss" => Ok(Self::SaveLowestLoss),
            "print_trainers" => Ok(Self::PrintTrainers),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

/// Parses one command per line of `reader` and forwards them to the control loop.
///
/// Blocks the calling thread, so it's meant to run on a thread of its own when reading
/// stdin. Blank lines are ignored, unknown commands are logged and skipped. Returns once
/// the reader is exhausted or the control loop is gone.
///
/// # Arguments
/// * `reader` - Where commands are read from, usually stdin.
/// * `tx` - The sending end of the control loop's command channel.
pub fn read_commands<R: BufRead>(reader: R, tx: mpsc::Sender<Command>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to read command: {e}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match line.parse() {
            Ok(command) => {
                if tx.blocking_send(command).is_err() {
                    break;
                }
            }
            Err(e) => warn!("{e}"),
        }
    }

    debug!("command reader finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!("save".parse::<Command>(), Ok(Command::Save));
        assert_eq!(" save_lowest_loss\n".parse::<Command>(), Ok(Command::SaveLowestLoss));
        assert_eq!("print_trainers".parse::<Command>(), Ok(Command::PrintTrainers));
        assert_eq!("quit".parse::<Command>(), Ok(Command::Quit));
        assert_eq!(
            "dance".parse::<Command>(),
            Err(UnknownCommand("dance".into()))
        );
    }

    #[test]
    fn forwards_valid_lines() {
        let input: &[u8] = b"save\n\nbogus\nprint_trainers\nquit\n";
        let (tx, mut rx) = mpsc::channel(8);

        read_commands(input, tx);

        let mut received = Vec::new();
        while let Some(command) = rx.blocking_recv() {
            received.push(command);
        }

        assert_eq!(
            received,
            vec![Command::Save, Command::PrintTrainers, Command::Quit]
        );
    }
}
