use std::collections::BTreeSet;

use tracing::{info, warn};

/// Administrative view of the server: membership changes and free-text log
/// lines. Observers only watch; nothing they do feeds back into routing.
///
/// Callbacks may run while the registry lock is held, so implementations must
/// return quickly and must not call back into the registry.
pub trait RosterObserver: Send + Sync {
    fn roster_changed(&self, usernames: &BTreeSet<String>);

    fn log(&self, line: &str);

    fn error(&self, line: &str) {
        self.log(line);
    }
}

/// Forwards observer events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RosterObserver for TracingObserver {
    fn roster_changed(&self, usernames: &BTreeSet<String>) {
        let online: Vec<&str> = usernames.iter().map(String::as_str).collect();
        info!(count = online.len(), online = ?online, "roster updated");
    }

    fn log(&self, line: &str) {
        info!("{line}");
    }

    fn error(&self, line: &str) {
        warn!("{line}");
    }
}
