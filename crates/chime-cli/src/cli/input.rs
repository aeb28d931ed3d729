use anyhow::{bail, Context, Result};
use chime_core::models::NotificationKind;
use serde_json::Value;

const DEFAULT_LIST_LIMIT: usize = 20;

pub const HELP: &str = "\
commands:
  list [n]          show the latest n notifications (default 20)
  unread            show unread notifications
  read <id>         mark one notification read
  read-all          mark everything read
  read-type <type>  mark every notification of a type read (like, comment, ...)
  cleanup           collapse duplicate records
  test [json]       ask the server to push a test notification
  sound on|off      toggle the notification sound
  unlock            enable audio (any command also does this)
  resync            reload the latest page from the server
  help              this text
  quit              stop listening";

/// One line typed while listening
#[derive(Debug, Clone, PartialEq)]
pub enum InputCommand {
    List(usize),
    Unread,
    Read(String),
    ReadAll,
    ReadType(NotificationKind),
    Cleanup,
    Test(Value),
    Sound(bool),
    Unlock,
    Resync,
    Help,
    Quit,
}

impl InputCommand {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "list" | "ls" => {
                let limit = if rest.is_empty() {
                    DEFAULT_LIST_LIMIT
                } else {
                    rest.parse::<usize>()
                        .with_context(|| format!("not a number: {}", rest))?
                };
                InputCommand::List(limit)
            }
            "unread" => InputCommand::Unread,
            "read" => {
                if rest.is_empty() {
                    bail!("usage: read <id>");
                }
                InputCommand::Read(rest.to_string())
            }
            "read-all" => InputCommand::ReadAll,
            "read-type" => {
                if rest.is_empty() {
                    bail!("usage: read-type <type>");
                }
                InputCommand::ReadType(NotificationKind::from(rest))
            }
            "cleanup" => InputCommand::Cleanup,
            "test" => {
                let payload = if rest.is_empty() {
                    serde_json::json!({
                        "type": "system",
                        "title": "Test notification",
                        "message": "Sent from chime",
                    })
                } else {
                    serde_json::from_str(rest).context("test payload must be JSON")?
                };
                InputCommand::Test(payload)
            }
            "sound" => match rest {
                "on" => InputCommand::Sound(true),
                "off" => InputCommand::Sound(false),
                _ => bail!("usage: sound on|off"),
            },
            "unlock" => InputCommand::Unlock,
            "resync" => InputCommand::Resync,
            "help" | "?" => InputCommand::Help,
            "quit" | "exit" | "q" => InputCommand::Quit,
            other => bail!("unknown command: {} (try 'help')", other),
        };
        Ok(Some(command))
    }
}
