//! Line-based operator console.
//!
//! ```text
//! quit                      stop the server
//! useradd <name> <password> add an account
//! userdel <name>            remove an account
//! help                      list commands
//! ```

use std::str::FromStr;

use log::{info, warn};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FramingError;
use crate::protocol::UserName;
use crate::server::ShutdownHandle;
use crate::storage::{AuthError, UserDirectory};

const HELP: &str = "commands: quit | useradd <name> <password> | userdel <name> | help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Quit,
    AddUser { name: UserName, password: String },
    RemoveUser { name: UserName },
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command \"{0}\", try \"help\"")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid user name: {0}")]
    InvalidName(#[from] FramingError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl FromStr for OperatorCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Err(CommandError::Unknown(String::new()));
        };
        let rest: Vec<&str> = words.collect();

        match (command, rest.as_slice()) {
            ("quit", []) => Ok(Self::Quit),
            ("help", []) => Ok(Self::Help),
            ("useradd", [name, password]) => Ok(Self::AddUser {
                name: UserName::new(*name)?,
                password: (*password).to_string(),
            }),
            ("useradd", _) => Err(CommandError::Usage("useradd <name> <password>")),
            ("userdel", [name]) => Ok(Self::RemoveUser {
                name: UserName::new(*name)?,
            }),
            ("userdel", _) => Err(CommandError::Usage("userdel <name>")),
            ("quit" | "help", _) => Err(CommandError::Usage("quit | help")),
            (other, _) => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Owns the operator's view of the server: the user accounts and the
/// shutdown trigger.
pub struct Console<U> {
    users: U,
    shutdown: ShutdownHandle,
}

impl<U: UserDirectory> Console<U> {
    pub fn new(users: U, shutdown: ShutdownHandle) -> Self {
        Self { users, shutdown }
    }

    /// Run one command and describe the outcome.
    pub fn execute(&self, command: OperatorCommand) -> Result<String, CommandError> {
        match command {
            OperatorCommand::Quit => {
                self.shutdown.shutdown();
                Ok("shutting down".to_string())
            }
            OperatorCommand::AddUser { name, password } => {
                let id = self.users.create_with_password(&name, &password)?;
                Ok(format!("added user \"{name}\" with id {id}"))
            }
            OperatorCommand::RemoveUser { name } => {
                self.users.remove(&name)?;
                Ok(format!("removed user \"{name}\""))
            }
            OperatorCommand::Help => Ok(HELP.to_string()),
        }
    }

    /// Read commands until `quit`, end of input or a shutdown from elsewhere.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let result = loop {
            let line = tokio::select! {
                () = self.shutdown.wait() => break Ok(()),
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(error) => break Err(error),
            };
            if line.trim().is_empty() {
                continue;
            }

            let reply = match line.parse::<OperatorCommand>() {
                Ok(command) => self.execute(command),
                Err(error) => Err(error),
            };
            let text = match reply {
                Ok(text) => text,
                Err(error) => {
                    warn!("console: {error}");
                    format!("error: {error}")
                }
            };
            if let Err(error) = output.write_all(format!("{text}\n").as_bytes()).await {
                break Err(error);
            }
            if self.shutdown.is_shutdown() {
                break Ok(());
            }
        };

        info!("console closed");
        output.flush().await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Digest;
    use crate::storage::MemoryUserDirectory;

    fn name(s: &str) -> UserName {
        UserName::new(s).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("quit".parse::<OperatorCommand>(), Ok(OperatorCommand::Quit));
        assert_eq!("  help ".parse::<OperatorCommand>(), Ok(OperatorCommand::Help));
        assert_eq!(
            "useradd alice s3cret".parse::<OperatorCommand>(),
            Ok(OperatorCommand::AddUser {
                name: name("alice"),
                password: "s3cret".into(),
            })
        );
        assert_eq!(
            "userdel alice".parse::<OperatorCommand>(),
            Ok(OperatorCommand::RemoveUser { name: name("alice") })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "frobnicate".parse::<OperatorCommand>(),
            Err(CommandError::Unknown("frobnicate".into()))
        );
        assert!(matches!(
            "useradd alice".parse::<OperatorCommand>(),
            Err(CommandError::Usage(_))
        ));
        let long = format!("userdel {}", "x".repeat(40));
        assert!(matches!(
            long.parse::<OperatorCommand>(),
            Err(CommandError::InvalidName(FramingError::NameTooLong { .. }))
        ));
    }

    #[test]
    fn test_execute_updates_directory() {
        let users = MemoryUserDirectory::new();
        let console = Console::new(users.clone(), ShutdownHandle::default());

        console.execute("useradd alice pw".parse().unwrap()).unwrap();
        assert!(users.check(&name("alice"), &Digest::of(b"pw")).is_ok());
        assert_eq!(
            console.execute("useradd alice pw".parse().unwrap()),
            Err(CommandError::Auth(AuthError::AlreadyPresent("alice".into())))
        );

        console.execute("userdel alice".parse().unwrap()).unwrap();
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn test_run_until_quit() {
        let users = MemoryUserDirectory::new();
        let shutdown = ShutdownHandle::default();
        let console = Console::new(users.clone(), shutdown.clone());

        let input: &[u8] = b"useradd bob pw\n\nbogus\nquit\nuseradd late pw\n";
        let mut output = Vec::new();
        console.run(input, &mut output).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("added user \"bob\""));
        assert!(lines[1].starts_with("error: unknown command"));
        assert_eq!(lines[2], "shutting down");
        assert!(shutdown.is_shutdown());
        assert!(!users.contains(&name("late")));
    }

    #[tokio::test]
    async fn test_run_stops_on_external_shutdown() {
        let shutdown = ShutdownHandle::default();
        let console = Console::new(MemoryUserDirectory::new(), shutdown.clone());
        shutdown.shutdown();

        // never yields a line
        let (_keep_open, reader) = tokio::io::duplex(64);
        let mut output = Vec::new();
        console
            .run(tokio::io::BufReader::new(reader), &mut output)
            .await
            .unwrap();
        assert!(output.is_empty());
    }
}
