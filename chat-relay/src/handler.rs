use std::{io, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader},
    net::TcpStream,
};
use tracing::{debug, info, warn};

use crate::{
    message::{ClientLine, Message, is_valid_username},
    registry::Registry,
    session::{self, Outbound, Session},
};

/// Why an active session ended. Every variant leads to the same cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionExit {
    Quit,
    EndOfStream,
}

/// Newline framed input. Bytes that are not UTF-8 are replaced rather than
/// treated as a read failure.
struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }

        let line = self.buf.strip_suffix(b"\n").unwrap_or(&self.buf);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        Ok(Some(String::from_utf8_lossy(line).into_owned()))
    }
}

pub async fn handle_connection(
    stream: TcpStream,
    registry: &Registry,
    outbound_capacity: usize,
) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    run_session(BufReader::new(reader), writer, peer, registry, outbound_capacity).await
}

/// Drives one connection from the first prompt to the final unregister.
///
/// All outbound text, including handshake replies, goes through the session's
/// bounded queue so lines reach the socket in the order they were produced.
/// Once a name is registered, every way out of the session passes through
/// `close_session`.
pub async fn run_session<R, W>(
    reader: R,
    writer: W,
    peer: Option<SocketAddr>,
    registry: &Registry,
    outbound_capacity: usize,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, inbox) = session::outbound_channel(outbound_capacity);
    let writer_task = session::spawn_writer(writer, inbox);
    let mut lines = LineReader::new(reader);

    let result = match negotiate_username(&mut lines, &outbound, registry).await {
        Ok(Some(username)) => {
            info!(?peer, %username, "client joined");
            registry
                .observer()
                .log(&format!("new client connected: {username}"));

            let exit = run_active(&mut lines, &outbound, registry, &username).await;
            close_session(registry, &username, peer, &exit).await;
            exit.map(|_| ())
        }
        Ok(None) => {
            debug!(?peer, "connection closed during handshake");
            Ok(())
        }
        Err(err) => Err(err),
    };

    drop(outbound);
    if let Err(err) = writer_task.await {
        warn!(?peer, error = ?err, "session writer task failed");
    }

    result
}

/// Handshake: prompt once, then keep reading candidate names until one is
/// registered. Returns `None` if the client hangs up first.
async fn negotiate_username<R>(
    lines: &mut LineReader<R>,
    outbound: &Outbound,
    registry: &Registry,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    send_local(outbound, Message::prompt()).await?;

    while let Some(line) = lines.next_line().await? {
        let username = line.trim();
        if !is_valid_username(username) {
            send_local(outbound, Message::invalid_name()).await?;
            continue;
        }

        // Checking and claiming the name happen under one registry lock.
        if registry
            .register(Session::new(username, outbound.clone()))
            .await
        {
            return Ok(Some(username.to_string()));
        }

        send_local(outbound, Message::name_in_use()).await?;
    }

    Ok(None)
}

async fn run_active<R>(
    lines: &mut LineReader<R>,
    outbound: &Outbound,
    registry: &Registry,
    username: &str,
) -> Result<SessionExit>
where
    R: AsyncBufRead + Unpin,
{
    send_local(outbound, Message::welcome(username)).await?;
    registry.broadcast(Message::joined(username)).await;

    while let Some(line) = lines.next_line().await? {
        match ClientLine::parse(&line) {
            ClientLine::Empty => {}
            ClientLine::Quit => return Ok(SessionExit::Quit),
            ClientLine::Public(text) => {
                registry.broadcast(Message::public(username, text)).await;
            }
            ClientLine::Private { target, text } => {
                let delivered = registry
                    .unicast(target, Message::private(username, text))
                    .await;
                if !delivered {
                    send_local(outbound, Message::recipient_offline(target)).await?;
                }
            }
            ClientLine::MalformedPrivate => {
                send_local(outbound, Message::malformed_private()).await?;
            }
        }
    }

    Ok(SessionExit::EndOfStream)
}

async fn close_session(
    registry: &Registry,
    username: &str,
    peer: Option<SocketAddr>,
    exit: &Result<SessionExit>,
) {
    match exit {
        Ok(SessionExit::Quit) => info!(?peer, %username, "client quit"),
        Ok(SessionExit::EndOfStream) => info!(?peer, %username, "client closed connection"),
        Err(err) => {
            warn!(?peer, %username, error = ?err, "client connection failed");
            registry
                .observer()
                .error(&format!("connection error for {username}: {err:#}"));
        }
    }

    if registry.unregister(username).await {
        registry
            .observer()
            .log(&format!("client disconnected: {username}"));
    }
}

/// Replies addressed to this session only. Waits for queue space, which can
/// only hold up this connection's own handler.
async fn send_local(outbound: &Outbound, message: Message) -> Result<()> {
    outbound
        .send(message)
        .await
        .context("session writer closed")
}
