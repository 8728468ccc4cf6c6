use std::{collections::HashMap, sync::Arc};

use tracing::info;

use crate::{
    Error, Result,
    inbox::{Inbox, InboxSender},
    plugin::{ChannelDescriptor, MiddlewareDescriptor, SlaveChannel},
};

/// Default number of slave events buffered before senders wait.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Registry of slave channels and middlewares, plus the shared inbox.
///
/// Built once at startup; lookups afterwards are read-only.
pub struct Coordinator {
    slaves: HashMap<String, Arc<dyn SlaveChannel>>,
    middlewares: Vec<MiddlewareDescriptor>,
    inbox_tx: InboxSender,
}

impl Coordinator {
    /// Create a coordinator and the inbox the master channel will drain.
    #[must_use]
    pub fn new(inbox_capacity: usize) -> (Self, Inbox) {
        let (inbox_tx, inbox) = Inbox::bounded(inbox_capacity);
        let coordinator = Self {
            slaves: HashMap::new(),
            middlewares: Vec::new(),
            inbox_tx,
        };
        (coordinator, inbox)
    }

    pub fn register(&mut self, slave: Arc<dyn SlaveChannel>) {
        let id = slave.descriptor().id.clone();
        info!(channel_id = %id, "slave channel registered");
        self.slaves.insert(id, slave);
    }

    pub fn register_middleware(&mut self, middleware: MiddlewareDescriptor) {
        info!(middleware_id = %middleware.id, "middleware registered");
        self.middlewares.push(middleware);
    }

    /// Handle slaves use to push events toward the master.
    #[must_use]
    pub fn inbox_sender(&self) -> InboxSender {
        self.inbox_tx.clone()
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<dyn SlaveChannel>> {
        self.slaves.get(channel_id).cloned()
    }

    pub fn require(&self, channel_id: &str) -> Result<Arc<dyn SlaveChannel>> {
        self.get(channel_id)
            .ok_or_else(|| Error::unknown_channel(channel_id))
    }

    /// Descriptors of all slaves, sorted by id.
    pub fn slaves(&self) -> Vec<ChannelDescriptor> {
        let mut list: Vec<_> = self
            .slaves
            .values()
            .map(|s| s.descriptor().clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Slaves sorted by id. The position is the module number `/extra`
    /// commands refer to.
    pub fn ordered_slaves(&self) -> Vec<Arc<dyn SlaveChannel>> {
        let mut list: Vec<_> = self.slaves.values().cloned().collect();
        list.sort_by(|a, b| a.descriptor().id.cmp(&b.descriptor().id));
        list
    }

    pub fn slave_channels(&self) -> impl Iterator<Item = &Arc<dyn SlaveChannel>> {
        self.slaves.values()
    }

    pub fn middlewares(&self) -> &[MiddlewareDescriptor] {
        &self.middlewares
    }
}
