//! Commit notifications.
//!
//! A journal calls [`CommitPublisher::publish`] after every durable commit.
//! [`JournalEventBridge`] is the bundled publisher: a bounded channel drained
//! by one forwarding thread that fans events out to subscribers. Subscribers
//! block with a timeout and see a [`BridgeEvent::Heartbeat`] when nothing was
//! committed in that window.
//!
//! # Examples
//!
//! ```rust,ignore
//! use alopex_journal::events::{BridgeConfig, BridgeEvent, JournalEventBridge};
//! use std::sync::Arc;
//!
//! let bridge = Arc::new(JournalEventBridge::start(BridgeConfig::default()));
//! let subscriber = bridge.subscribe(Some(0));
//! let journal = Journal::open(metadata, binding)?.with_publisher(bridge.clone());
//!
//! match subscriber.next() {
//!     BridgeEvent::Commit(event) => println!("journal {} at {}", event.journal_index, event.timestamp),
//!     BridgeEvent::Heartbeat => {}
//!     BridgeEvent::Closed => return,
//! }
//! ```

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Default capacity of the publish channel and of each subscriber channel.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default time a subscriber waits before reporting a heartbeat.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

/// Receives `(journal index, timestamp)` after each commit.
pub trait CommitPublisher: Send + Sync {
    /// Publishes a commit. Must not block for long.
    fn publish(&self, journal_index: i32, timestamp: i64);
}

/// One committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitEvent {
    /// Index of the journal that committed.
    pub journal_index: i32,
    /// Last timestamp of the commit.
    pub timestamp: i64,
}

/// What a subscriber observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A commit of a subscribed journal.
    Commit(CommitEvent),
    /// Nothing arrived within the heartbeat timeout.
    Heartbeat,
    /// The bridge was halted.
    Closed,
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Capacity of the publish channel and of each subscriber channel.
    pub buffer_size: usize,
    /// Subscriber wait before a heartbeat.
    pub heartbeat_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

impl BridgeConfig {
    /// Sets the channel capacity.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the heartbeat timeout.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }
}

enum Message {
    Commit(CommitEvent),
    Subscribe(Option<i32>, Sender<CommitEvent>),
    Halt,
}

/// Receiving end handed out by [`JournalEventBridge::subscribe`].
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: Receiver<CommitEvent>,
    heartbeat_timeout: Duration,
}

impl EventSubscriber {
    /// Waits up to the heartbeat timeout for the next commit.
    pub fn next(&self) -> BridgeEvent {
        match self.receiver.recv_timeout(self.heartbeat_timeout) {
            Ok(event) => BridgeEvent::Commit(event),
            Err(RecvTimeoutError::Timeout) => BridgeEvent::Heartbeat,
            Err(RecvTimeoutError::Disconnected) => BridgeEvent::Closed,
        }
    }

    /// Returns a pending commit without waiting.
    pub fn try_next(&self) -> Option<CommitEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Commit publisher fanning events out to subscribers from one thread.
#[derive(Debug)]
pub struct JournalEventBridge {
    sender: Sender<Message>,
    config: BridgeConfig,
    forwarder: Option<JoinHandle<()>>,
}

impl JournalEventBridge {
    /// Starts the forwarding thread.
    pub fn start(config: BridgeConfig) -> Self {
        let (sender, receiver) = bounded(config.buffer_size.max(1));
        let forwarder = thread::spawn(move || forward(receiver));
        debug!("Started journal event bridge [buffer={}]", config.buffer_size);
        Self {
            sender,
            config,
            forwarder: Some(forwarder),
        }
    }

    /// Registers a subscriber for `journal_index`, or for every journal if
    /// `None`. Only commits published after this call are delivered.
    pub fn subscribe(&self, journal_index: Option<i32>) -> EventSubscriber {
        let (sender, receiver) = bounded(self.config.buffer_size.max(1));
        if self.sender.send(Message::Subscribe(journal_index, sender)).is_err() {
            debug!("Subscribed to a halted event bridge");
        }
        EventSubscriber {
            receiver,
            heartbeat_timeout: self.config.heartbeat_timeout,
        }
    }

    /// Stops the forwarder and disconnects every subscriber. Idempotent.
    pub fn halt(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            let _ = self.sender.send(Message::Halt);
            if forwarder.join().is_err() {
                warn!("Event bridge forwarder panicked");
            }
            debug!("Halted journal event bridge");
        }
    }
}

impl CommitPublisher for JournalEventBridge {
    fn publish(&self, journal_index: i32, timestamp: i64) {
        let event = CommitEvent {
            journal_index,
            timestamp,
        };
        if self.sender.send(Message::Commit(event)).is_err() {
            debug!("Dropped commit of journal {}: bridge halted", journal_index);
        }
    }
}

impl Drop for JournalEventBridge {
    fn drop(&mut self) {
        self.halt();
    }
}

fn forward(receiver: Receiver<Message>) {
    let mut subscribers: Vec<(Option<i32>, Sender<CommitEvent>)> = Vec::new();
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Commit(event) => {
                subscribers.retain(|(filter, sender)| {
                    if filter.is_some_and(|index| index != event.journal_index) {
                        return true;
                    }
                    match sender.try_send(event) {
                        Ok(()) => true,
                        Err(TrySendError::Full(_)) => {
                            warn!(
                                "Subscriber is full, dropped commit of journal {} at {}",
                                event.journal_index, event.timestamp
                            );
                            true
                        }
                        Err(TrySendError::Disconnected(_)) => false,
                    }
                });
            }
            Message::Subscribe(filter, sender) => subscribers.push((filter, sender)),
            Message::Halt => break,
        }
    }
}
