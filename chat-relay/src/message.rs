use std::{collections::BTreeSet, io};

use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const ROSTER_PREFIX: &str = "[Usuarios]";
pub const PRIVATE_PREFIX: &str = "[Privado]";
pub const QUIT_COMMAND: &str = "quit";

const WELCOME_PREFIX: &str = "Welcome to the chat, ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Public,
    Private,
    RosterUpdate,
    System,
}

/// A single line of text travelling from the server to one session.
///
/// Messages are transient: they are rendered once when constructed and never
/// queued beyond a session's bounded outbound buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    text: String,
}

impl Message {
    pub fn public(sender: &str, text: &str) -> Self {
        Self {
            kind: MessageKind::Public,
            text: format!("{sender}: {text}"),
        }
    }

    pub fn private(sender: &str, text: &str) -> Self {
        Self {
            kind: MessageKind::Private,
            text: format!("{PRIVATE_PREFIX} {sender}: {text}"),
        }
    }

    /// Full roster replacement. Every name is followed by a separator,
    /// including the last one.
    pub fn roster(usernames: &BTreeSet<String>) -> Self {
        let mut text = String::from(ROSTER_PREFIX);
        for username in usernames {
            text.push_str(username);
            text.push(',');
        }
        Self {
            kind: MessageKind::RosterUpdate,
            text,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::System,
            text: text.into(),
        }
    }

    pub fn prompt() -> Self {
        Self::system("Enter your username:")
    }

    pub fn invalid_name() -> Self {
        Self::system("Invalid name, try again:")
    }

    pub fn name_in_use() -> Self {
        Self::system("Name in use, choose another:")
    }

    pub fn welcome(username: &str) -> Self {
        Self::system(format!(
            "{WELCOME_PREFIX}{username}! You can start sending messages."
        ))
    }

    pub fn joined(username: &str) -> Self {
        Self::system(format!("{username} has joined the chat"))
    }

    pub fn left(username: &str) -> Self {
        Self::system(format!("{username} has left the chat"))
    }

    pub fn malformed_private() -> Self {
        Self::system("Malformed private message, use @user message")
    }

    pub fn recipient_offline(target: &str) -> Self {
        Self::system(format!("Recipient not connected: {target}"))
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// One line typed by a connected client, classified after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLine<'a> {
    Empty,
    Quit,
    Private { target: &'a str, text: &'a str },
    MalformedPrivate,
    Public(&'a str),
}

impl<'a> ClientLine<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ClientLine::Empty;
        }

        if line.eq_ignore_ascii_case(QUIT_COMMAND) {
            return ClientLine::Quit;
        }

        if let Some(rest) = line.strip_prefix('@') {
            return match rest.split_once(' ') {
                Some((target, text)) if !target.is_empty() && !text.trim().is_empty() => {
                    ClientLine::Private {
                        target,
                        text: text.trim_start(),
                    }
                }
                _ => ClientLine::MalformedPrivate,
            };
        }

        ClientLine::Public(line)
    }
}

/// A username has to read back unchanged from the comma separated roster and
/// be addressable as `@name text`.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && !username.starts_with('@')
        && !username.chars().any(|c| c == ',' || c.is_whitespace())
}

/// One line received by a client, classified for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    Roster(Vec<String>),
    Private { sender: String, text: String },
    Text(String),
}

impl ServerLine {
    pub fn parse(line: &str) -> Self {
        if let Some(names) = line.strip_prefix(ROSTER_PREFIX) {
            let usernames = names
                .split(',')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
            return ServerLine::Roster(usernames);
        }

        if let Some((sender, text)) = line
            .strip_prefix(PRIVATE_PREFIX)
            .and_then(|rest| rest.strip_prefix(' '))
            .and_then(|rest| rest.split_once(": "))
        {
            return ServerLine::Private {
                sender: sender.to_string(),
                text: text.to_string(),
            };
        }

        ServerLine::Text(line.to_string())
    }

    pub fn is_welcome(&self) -> bool {
        matches!(self, ServerLine::Text(text) if text.starts_with(WELCOME_PREFIX))
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Newline framing only, so plain netcat sessions work against the server.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
