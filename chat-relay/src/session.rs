use std::io;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::message::{Message, write_line};

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

pub type Outbound = mpsc::Sender<Message>;
pub type Inbox = mpsc::Receiver<Message>;

/// Creates the bounded queue that sits between the registry fan-out and a
/// session's socket writer.
pub fn outbound_channel(capacity: usize) -> (Outbound, Inbox) {
    mpsc::channel(capacity.max(1))
}

/// Result of handing one line to a session without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue was full; the line was discarded for this session only.
    Dropped,
    /// The writer has already gone away.
    Closed,
}

/// One registered user: the identity plus the sending end of its outbound queue.
///
/// The socket itself stays with the session handler and its writer task; the
/// registry only ever sees this cheap handle.
#[derive(Debug, Clone)]
pub struct Session {
    username: String,
    outbound: Outbound,
}

impl Session {
    pub fn new(username: impl Into<String>, outbound: Outbound) -> Self {
        Self {
            username: username.into(),
            outbound,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Never waits: a slow reader loses lines instead of stalling the caller.
    pub fn deliver(&self, message: Message) -> Delivery {
        match self.outbound.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(message)) => {
                warn!(
                    username = %self.username,
                    kind = ?message.kind(),
                    "outbound queue full; dropping line"
                );
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!(username = %self.username, "session writer closed; dropping line");
                Delivery::Closed
            }
        }
    }
}

/// Drains `inbox` onto `writer` until every sender is gone, then shuts the
/// write half down.
pub fn spawn_writer<W>(writer: W, inbox: Inbox) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = writer;
        let mut inbox = inbox;
        if let Err(error) = drain_inbox(&mut writer, &mut inbox).await {
            debug!(?error, "failed to deliver line to client");
            // Stop accepting lines so fan-out sees the session as closed.
            inbox.close();
        }
        if let Err(error) = writer.shutdown().await {
            debug!(?error, "failed to shut down client writer");
        }
    })
}

async fn drain_inbox<W>(writer: &mut W, inbox: &mut Inbox) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = inbox.recv().await {
        write_line(writer, message.text()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[test]
    fn full_queue_drops_instead_of_waiting() {
        let (outbound, _inbox) = outbound_channel(1);
        let session = Session::new("alice", outbound);

        assert_eq!(session.deliver(Message::system("one")), Delivery::Queued);
        assert_eq!(session.deliver(Message::system("two")), Delivery::Dropped);
    }

    #[test]
    fn closed_inbox_reports_closed() {
        let (outbound, inbox) = outbound_channel(4);
        drop(inbox);
        let session = Session::new("alice", outbound);

        assert_eq!(session.deliver(Message::system("hi")), Delivery::Closed);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let (outbound, _inbox) = outbound_channel(0);
        assert_eq!(outbound.max_capacity(), 1);
    }

    #[tokio::test]
    async fn writer_flushes_queue_in_order_then_closes() {
        let (client, server) = tokio::io::duplex(256);
        let (outbound, inbox) = outbound_channel(8);
        let writer = spawn_writer(server, inbox);

        let session = Session::new("bob", outbound);
        session.deliver(Message::system("first"));
        session.deliver(Message::public("alice", "second"));
        drop(session);
        writer.await.expect("writer task");

        let mut client = client;
        let mut received = String::new();
        client
            .read_to_string(&mut received)
            .await
            .expect("read writer output");
        assert_eq!(received, "first\nalice: second\n");
    }
}
