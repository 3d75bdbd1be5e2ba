use std::io::{self, Write};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{QUIT_COMMAND, ServerLine, write_line},
};

/// Where incoming server lines end up for the user to read.
pub trait DisplaySink {
    fn show(&mut self, line: &ServerLine) -> io::Result<()>;

    fn notice(&mut self, text: &str) -> io::Result<()>;

    /// Called once the server has accepted a username for this connection.
    fn username_confirmed(&mut self, _username: &str) {}
}

/// Renders server lines for a plain terminal.
#[derive(Debug, Default)]
pub struct TerminalDisplay {
    username: Option<String>,
}

impl TerminalDisplay {
    pub fn new(username: Option<String>) -> Self {
        Self { username }
    }

    pub fn set_username(&mut self, username: String) {
        self.username = Some(username);
    }

    pub fn render(&self, line: &ServerLine) -> String {
        match line {
            ServerLine::Roster(usernames) => format!("*** online: {}", usernames.join(", ")),
            ServerLine::Private { sender, text } => format!("[private] {sender}: {text}"),
            ServerLine::Text(text) => match self.own_text(text) {
                Some(own) => format!("(you): {own}"),
                None => text.clone(),
            },
        }
    }

    fn own_text<'a>(&self, text: &'a str) -> Option<&'a str> {
        let username = self.username.as_deref()?;
        text.strip_prefix(username)?.strip_prefix(": ")
    }
}

impl DisplaySink for TerminalDisplay {
    fn show(&mut self, line: &ServerLine) -> io::Result<()> {
        let rendered = self.render(line);
        self.notice(&rendered)
    }

    fn notice(&mut self, text: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{text}")?;
        stdout.flush()
    }

    fn username_confirmed(&mut self, username: &str) {
        self.set_username(username.to_string());
    }
}

/// Trimmed, non-empty lines typed by the user.
pub struct StdinInput {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Cancel safe: a line is either returned whole or left unread.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        while let Some(line) = self.lines.next_line().await? {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
        Ok(None)
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks which name the server has accepted for us, so our own public
/// messages can be told apart.
#[derive(Debug, Default)]
struct Identity {
    candidate: Option<String>,
    confirmed: bool,
}

impl Identity {
    fn record_sent(&mut self, line: &str) {
        if !self.confirmed {
            self.candidate = Some(line.to_string());
        }
    }

    fn confirm(&mut self) -> Option<String> {
        if self.confirmed {
            return None;
        }
        self.confirmed = true;
        self.candidate.clone()
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut server_lines, mut writer) = establish_connection(&args).await?;
    let mut display = TerminalDisplay::default();
    let mut identity = Identity::default();

    if let Some(username) = args.username.as_deref() {
        let username = username.trim();
        write_line(&mut writer, username)
            .await
            .context("failed to send username")?;
        identity.record_sent(username);
    }

    let mut input = StdinInput::new();
    run_client_loop(
        &mut server_lines,
        &mut writer,
        &mut input,
        &mut display,
        &mut identity,
    )
    .await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf)> {
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;

    info!("connected to {}:{}", args.host, args.port);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader).lines(), writer))
}

async fn run_client_loop<D>(
    server_lines: &mut Lines<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    input: &mut StdinInput,
    display: &mut D,
    identity: &mut Identity,
) -> Result<()>
where
    D: DisplaySink,
{
    loop {
        select! {
            server_line = server_lines.next_line() => {
                if !handle_server_line(server_line, display, identity)? {
                    break;
                }
            }
            typed = input.next_line() => {
                if !handle_input(typed, writer, display, identity).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

fn handle_server_line<D>(
    line: io::Result<Option<String>>,
    display: &mut D,
    identity: &mut Identity,
) -> Result<bool>
where
    D: DisplaySink,
{
    let Some(line) = line.context("failed to read from server")? else {
        display.notice("*** server closed the connection")?;
        return Ok(false);
    };

    let parsed = ServerLine::parse(&line);
    if parsed.is_welcome() {
        if let Some(username) = identity.confirm() {
            display.username_confirmed(&username);
        }
    }
    display.show(&parsed)?;
    Ok(true)
}

async fn handle_input<D>(
    typed: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
    display: &mut D,
    identity: &mut Identity,
) -> Result<bool>
where
    D: DisplaySink,
{
    let Some(line) = typed.context("failed to read from stdin")? else {
        return Ok(false);
    };

    write_line(writer, &line)
        .await
        .context("failed to send line to server")?;

    if line.eq_ignore_ascii_case(QUIT_COMMAND) {
        display.notice("*** leaving chat")?;
        return Ok(false);
    }

    identity.record_sent(&line);
    Ok(true)
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_roster_and_private_lines() {
        let display = TerminalDisplay::new(None);
        assert_eq!(
            display.render(&ServerLine::parse("[Usuarios]alice,bob,")),
            "*** online: alice, bob"
        );
        assert_eq!(
            display.render(&ServerLine::parse("[Privado] bob: psst")),
            "[private] bob: psst"
        );
    }

    #[test]
    fn own_public_messages_are_marked() {
        let display = TerminalDisplay::new(Some("alice".into()));
        assert_eq!(
            display.render(&ServerLine::parse("alice: hello")),
            "(you): hello"
        );
        assert_eq!(
            display.render(&ServerLine::parse("alicea: hello")),
            "alicea: hello"
        );
        assert_eq!(
            display.render(&ServerLine::parse("bob: hello")),
            "bob: hello"
        );
    }

    #[test]
    fn identity_follows_last_name_sent_before_welcome() {
        let mut identity = Identity::default();
        identity.record_sent("alice");
        identity.record_sent("alice2");

        assert_eq!(identity.confirm(), Some("alice2".to_string()));
        identity.record_sent("hello everyone");
        assert_eq!(identity.confirm(), None);
    }
}
