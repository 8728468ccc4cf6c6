//! Bounded slave → master event queue.

use {tokio::sync::mpsc, tracing::debug};

use crate::{
    Error, Result,
    message::{RemoteMessage, StatusUpdate},
};

/// Everything a slave channel can hand to the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlaveEvent {
    Message(RemoteMessage),
    Status(StatusUpdate),
}

/// Cloneable handle slaves use to push events.
#[derive(Debug, Clone)]
pub struct InboxSender {
    tx: mpsc::Sender<SlaveEvent>,
}

impl InboxSender {
    /// Queue an event, waiting while the inbox is full.
    pub async fn push(&self, event: SlaveEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| Error::InboxClosed)
    }

    pub async fn message(&self, message: RemoteMessage) -> Result<()> {
        self.push(SlaveEvent::Message(message)).await
    }

    pub async fn status(&self, update: StatusUpdate) -> Result<()> {
        self.push(SlaveEvent::Status(update)).await
    }
}

/// Receiving end, drained by the master channel.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<SlaveEvent>,
}

impl Inbox {
    /// Create a bounded inbox holding at most `capacity` pending events.
    #[must_use]
    pub fn bounded(capacity: usize) -> (InboxSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        debug!(capacity, "slave inbox created");
        (InboxSender { tx }, Self { rx })
    }

    /// Next event, or `None` once every sender is dropped.
    pub async fn next(&mut self) -> Option<SlaveEvent> {
        self.rx.recv().await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn msg(uid: &str) -> RemoteMessage {
        RemoteMessage::text("irc.demo#room1".parse().unwrap(), uid, "alice", "hi")
    }

    #[tokio::test]
    async fn preserves_order() {
        let (tx, mut inbox) = Inbox::bounded(8);
        tx.message(msg("1")).await.unwrap();
        tx.message(msg("2")).await.unwrap();
        drop(tx);

        let mut uids = Vec::new();
        while let Some(SlaveEvent::Message(m)) = inbox.next().await {
            uids.push(m.uid);
        }
        assert_eq!(uids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn push_after_close_fails() {
        let (tx, inbox) = Inbox::bounded(1);
        drop(inbox);
        assert!(matches!(
            tx.message(msg("1")).await,
            Err(Error::InboxClosed)
        ));
    }
}
