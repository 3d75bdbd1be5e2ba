use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    message::{Message, MessageKind},
    observer::RosterObserver,
    session::{Delivery, Session},
};

/// The single source of truth for who is online.
///
/// Every operation takes the one lock, touches the map and fans out in memory.
/// Fan-out hands lines to each session's bounded queue without waiting, so a
/// stalled client never holds the lock.
pub struct Registry {
    sessions: Mutex<HashMap<String, Session>>,
    observer: Arc<dyn RosterObserver>,
}

impl Registry {
    pub fn new(observer: Arc<dyn RosterObserver>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            observer,
        }
    }

    pub fn observer(&self) -> &dyn RosterObserver {
        self.observer.as_ref()
    }

    /// Inserts `session` unless its username is taken. On success every
    /// session, the new one included, receives the updated roster.
    pub async fn register(&self, session: Session) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session.username()) {
            return false;
        }

        sessions.insert(session.username().to_string(), session);
        self.publish_roster(&sessions);
        true
    }

    /// Removes `username` if present. Only an actual removal publishes a roster
    /// and a departure notice, so repeated cleanup is harmless.
    pub async fn unregister(&self, username: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(username).is_none() {
            return false;
        }

        self.publish_roster(&sessions);
        fan_out(&sessions, &Message::left(username));
        true
    }

    /// Sends `message` to every registered session. Returns how many sessions
    /// accepted the line.
    pub async fn broadcast(&self, message: Message) -> usize {
        let sessions = self.sessions.lock().await;
        let delivered = fan_out(&sessions, &message);
        if message.kind() == MessageKind::Public {
            self.observer
                .log(&format!("public message: {}", message.text()));
        }
        delivered
    }

    /// Delivers `message` to `target` only. Returns `false` when nobody by that
    /// name is online; the caller decides how to tell the sender.
    pub async fn unicast(&self, target: &str, message: Message) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(target) {
            Some(session) => {
                session.deliver(message);
                true
            }
            None => {
                self.observer
                    .log(&format!("private message to offline user: {target}"));
                false
            }
        }
    }

    pub async fn contains(&self, username: &str) -> bool {
        self.sessions.lock().await.contains_key(username)
    }

    pub async fn snapshot_usernames(&self) -> BTreeSet<String> {
        let sessions = self.sessions.lock().await;
        snapshot(&sessions)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    fn publish_roster(&self, sessions: &HashMap<String, Session>) {
        let usernames = snapshot(sessions);
        fan_out(sessions, &Message::roster(&usernames));
        self.observer.roster_changed(&usernames);
    }
}

fn snapshot(sessions: &HashMap<String, Session>) -> BTreeSet<String> {
    sessions.keys().cloned().collect()
}

fn fan_out(sessions: &HashMap<String, Session>, message: &Message) -> usize {
    let mut delivered = 0;
    for session in sessions.values() {
        match session.deliver(message.clone()) {
            Delivery::Queued => delivered += 1,
            Delivery::Dropped | Delivery::Closed => {
                debug!(username = session.username(), "line not delivered");
            }
        }
    }
    delivered
}
