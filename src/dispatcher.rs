//! Priority outbound dispatcher
//!
//! Announcements are queued per priority tier and drained strictly from the
//! highest tier down, FIFO inside a tier. Bundle-eligible messages (join
//! notices) are held back and coalesced while they keep arriving inside their
//! window, then rendered into a single line.
//!
//! A chat never sees its announcements out of order: queueing a message lifts
//! that chat's earlier messages from lower tiers into the new message's tier,
//! ahead of it. Priority decides between chats, arrival order within one.
//!
//! Delivery runs on its own task, paced by `min_send_interval_ms`, so a busy
//! game never blocks the engine.

use crate::config::DispatcherConfig;
use crate::errors::TransportError;
use crate::games::types::{ChatRef, GameId};
use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    const TIERS: usize = 4;

    /// Queue index; 0 drains first
    fn tier(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSpec {
    pub key: String,
    pub window: Duration,
    /// Appended after the joined identities, e.g. "joined the game"
    pub suffix: String,
    /// Identity that can later be retracted from the open bundle
    pub member: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_ref: ChatRef,
    pub game_id: Option<GameId>,
    /// Full text, or the single identity when the message is bundled
    pub body: String,
    pub priority: Priority,
    pub bundle: Option<BundleSpec>,
}

impl OutboundMessage {
    pub fn new(chat_ref: impl Into<ChatRef>, body: impl Into<String>, priority: Priority) -> Self {
        Self {
            chat_ref: chat_ref.into(),
            game_id: None,
            body: body.into(),
            priority,
            bundle: None,
        }
    }

    pub fn for_game(mut self, game_id: &GameId) -> Self {
        self.game_id = Some(game_id.clone());
        self
    }

    pub fn bundled(mut self, key: impl Into<String>, window: Duration, suffix: impl Into<String>) -> Self {
        self.bundle = Some(BundleSpec {
            key: key.into(),
            window,
            suffix: suffix.into(),
            member: None,
        });
        self
    }

    /// Tag the bundled item so `OutboundDispatcher::retract` can find it
    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        if let Some(spec) = self.bundle.as_mut() {
            spec.member = Some(member.into());
        }
        self
    }
}

/// "A joined", "A and B joined", "A, B, and C joined"
pub fn render_bundle(items: &[String], suffix: &str) -> String {
    let names = match items {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{} and {}", first, second),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    };
    format!("{} {}", names, suffix)
}

#[derive(Debug)]
struct PendingBundle {
    chat_ref: ChatRef,
    game_id: Option<GameId>,
    priority: Priority,
    suffix: String,
    /// `(member, text)` in arrival order
    items: Vec<(Option<String>, String)>,
    deadline: Instant,
    seq: u64,
}

impl PendingBundle {
    fn render(self) -> OutboundMessage {
        let texts: Vec<String> = self.items.into_iter().map(|(_, text)| text).collect();
        OutboundMessage {
            chat_ref: self.chat_ref,
            game_id: self.game_id,
            body: render_bundle(&texts, &self.suffix),
            priority: self.priority,
            bundle: None,
        }
    }
}

#[derive(Debug)]
struct Queued {
    seq: u64,
    message: OutboundMessage,
}

#[derive(Debug, Default)]
struct DispatchQueue {
    tiers: [VecDeque<Queued>; Priority::TIERS],
    bundles: HashMap<String, PendingBundle>,
    next_seq: u64,
}

impl DispatchQueue {
    fn queued_len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Push, then evict the newest message of the lowest non-empty tier if over capacity
    fn push(&mut self, message: OutboundMessage, max_len: usize) -> Option<OutboundMessage> {
        let tier = message.priority.tier();

        let mut lifted: Vec<Queued> = Vec::new();
        for lower in self.tiers.iter_mut().skip(tier + 1) {
            let (same_chat, rest): (VecDeque<Queued>, VecDeque<Queued>) = lower
                .drain(..)
                .partition(|q| q.message.chat_ref == message.chat_ref);
            lifted.extend(same_chat);
            *lower = rest;
        }
        lifted.sort_by_key(|q| q.seq);

        let seq = self.take_seq();
        self.tiers[tier].extend(lifted);
        self.tiers[tier].push_back(Queued { seq, message });

        if self.queued_len() <= max_len {
            return None;
        }
        self.tiers
            .iter_mut()
            .rev()
            .find_map(|tier| tier.pop_back())
            .map(|q| q.message)
    }

    /// Remove bundles matching `pred` in the order they were opened
    fn take_bundles<F>(&mut self, pred: F) -> Vec<PendingBundle>
    where
        F: Fn(&PendingBundle) -> bool,
    {
        let keys: Vec<String> = self
            .bundles
            .iter()
            .filter(|(_, b)| pred(b))
            .map(|(k, _)| k.clone())
            .collect();

        let mut taken: Vec<PendingBundle> = keys
            .into_iter()
            .filter_map(|k| self.bundles.remove(&k))
            .collect();
        taken.sort_by_key(|b| b.seq);
        taken
    }
}

/// Transport to the chat platform
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

/// Writes every delivery to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        tracing::info!(
            chat_ref = %message.chat_ref,
            priority = ?message.priority,
            "📣 {}",
            message.body
        );
        Ok(())
    }
}

/// Forwards deliveries into a channel, for embedding and tests
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.sender
            .send(message.clone())
            .map_err(|_| TransportError::Closed)
    }
}

pub struct OutboundDispatcher {
    config: DispatcherConfig,
    queue: Mutex<DispatchQueue>,
    metrics: Arc<EngineMetrics>,
    wakeup: Notify,
    running: AtomicBool,
}

impl OutboundDispatcher {
    pub fn new(config: DispatcherConfig, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            config,
            queue: Mutex::new(DispatchQueue::default()),
            metrics,
            wakeup: Notify::new(),
            running: AtomicBool::new(true),
        }
    }

    fn queue(&self) -> MutexGuard<'_, DispatchQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enqueue(&self, message: OutboundMessage) {
        self.enqueue_at(message, Instant::now());
    }

    pub fn enqueue_at(&self, message: OutboundMessage, now: Instant) {
        {
            let mut queue = self.queue();
            match message.bundle.clone() {
                Some(spec) => {
                    let seq = queue.next_seq;
                    let bundle = queue.bundles.entry(spec.key).or_insert_with(|| PendingBundle {
                        chat_ref: message.chat_ref.clone(),
                        game_id: message.game_id.clone(),
                        priority: message.priority,
                        suffix: spec.suffix.clone(),
                        items: Vec::new(),
                        deadline: now,
                        seq,
                    });
                    bundle.items.push((spec.member, message.body));
                    bundle.deadline = now + spec.window;
                    if bundle.seq == seq {
                        queue.next_seq += 1;
                    }
                }
                None => self.push_locked(&mut queue, message),
            }
        }
        self.wakeup.notify_one();
    }

    fn push_locked(&self, queue: &mut DispatchQueue, message: OutboundMessage) {
        if let Some(dropped) = queue.push(message, self.config.max_queue_len) {
            self.metrics.record_dropped();
            tracing::warn!(
                chat_ref = %dropped.chat_ref,
                priority = ?dropped.priority,
                "Outbound queue full; dropped message"
            );
        }
    }

    fn render_into_queue(&self, queue: &mut DispatchQueue, bundles: Vec<PendingBundle>) -> usize {
        let count = bundles.len();
        for bundle in bundles {
            self.push_locked(queue, bundle.render());
        }
        count
    }

    /// Take a member back out of an open bundle; an emptied bundle is dropped.
    /// Returns false when the member was not waiting in that bundle.
    pub fn retract(&self, bundle_key: &str, member: &str) -> bool {
        let mut queue = self.queue();
        let Some(bundle) = queue.bundles.get_mut(bundle_key) else {
            return false;
        };
        let Some(pos) = bundle
            .items
            .iter()
            .position(|(m, _)| m.as_deref() == Some(member))
        else {
            return false;
        };

        bundle.items.remove(pos);
        if bundle.items.is_empty() {
            queue.bundles.remove(bundle_key);
        }
        true
    }

    /// Render bundles whose window closed at or before `now`
    pub fn flush_expired(&self, now: Instant) -> usize {
        let mut queue = self.queue();
        let expired = queue.take_bundles(|b| b.deadline <= now);
        self.render_into_queue(&mut queue, expired)
    }

    /// Render every open bundle of one chat immediately
    pub fn flush_chat(&self, chat_ref: &str) -> usize {
        let mut queue = self.queue();
        let pending = queue.take_bundles(|b| b.chat_ref == chat_ref);
        self.render_into_queue(&mut queue, pending)
    }

    pub fn flush_all(&self) -> usize {
        let mut queue = self.queue();
        let pending = queue.take_bundles(|_| true);
        let count = self.render_into_queue(&mut queue, pending);
        drop(queue);
        if count > 0 {
            self.wakeup.notify_one();
        }
        count
    }

    /// Drop queued messages and open bundles belonging to a game
    pub fn clear(&self, game_id: &GameId) -> usize {
        let mut queue = self.queue();
        let mut removed = 0;
        for tier in queue.tiers.iter_mut() {
            let before = tier.len();
            tier.retain(|q| q.message.game_id.as_ref() != Some(game_id));
            removed += before - tier.len();
        }
        removed += queue
            .take_bundles(|b| b.game_id.as_ref() == Some(game_id))
            .len();
        removed
    }

    /// Highest-priority ready message
    pub fn next_message(&self) -> Option<OutboundMessage> {
        self.queue()
            .tiers
            .iter_mut()
            .find_map(VecDeque::pop_front)
            .map(|q| q.message)
    }

    pub fn queued_len(&self) -> usize {
        self.queue().queued_len()
    }

    pub fn open_bundles(&self) -> usize {
        self.queue().bundles.len()
    }

    fn next_bundle_deadline(&self) -> Option<Instant> {
        self.queue().bundles.values().map(|b| b.deadline).min()
    }

    async fn deliver(&self, transport: &dyn Transport, message: OutboundMessage) {
        match transport.deliver(&message).await {
            Ok(()) => self.metrics.record_delivery(true),
            Err(e) => {
                self.metrics.record_delivery(false);
                tracing::warn!(chat_ref = %message.chat_ref, "Delivery failed: {}", e);
            }
        }
    }

    /// Start the paced delivery loop
    pub fn spawn(self: Arc<Self>, transport: Arc<dyn Transport>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let idle = Duration::from_millis(self.config.idle_poll_ms.max(1));
            let spacing = Duration::from_millis(self.config.min_send_interval_ms);

            while self.running.load(Ordering::SeqCst) {
                self.flush_expired(Instant::now());

                if let Some(message) = self.next_message() {
                    self.deliver(transport.as_ref(), message).await;
                    if !spacing.is_zero() {
                        tokio::time::sleep(spacing).await;
                    }
                    continue;
                }

                let wait = self
                    .next_bundle_deadline()
                    .map(|d| d.saturating_duration_since(Instant::now()).min(idle))
                    .unwrap_or(idle);

                tokio::select! {
                    _ = self.wakeup.notified() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            tracing::debug!("Dispatcher loop stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wakeup.notify_one();
    }
}
