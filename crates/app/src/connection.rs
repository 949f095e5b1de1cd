//! Observable connection state shared by an adapter and its tasks.

use tokio::sync::watch;

use synhome_domain::connection::ConnectionState;

/// Holds an adapter's [`ConnectionState`] and notifies watchers on change.
#[derive(Debug)]
pub struct ConnectionCell {
    adapter_id: String,
    sender: watch::Sender<ConnectionState>,
}

impl ConnectionCell {
    #[must_use]
    pub fn new(adapter_id: impl Into<String>) -> Self {
        let (sender, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            adapter_id: adapter_id.into(),
            sender,
        }
    }

    #[must_use]
    pub fn get(&self) -> ConnectionState {
        *self.sender.borrow()
    }

    /// Store `state`, logging the transition when it differs.
    pub fn set(&self, state: ConnectionState) {
        let previous = self.sender.send_replace(state);
        if previous != state {
            tracing::info!(
                adapter_id = %self.adapter_id,
                from = %previous,
                to = %state,
                "connection state changed"
            );
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.sender.subscribe()
    }
}
