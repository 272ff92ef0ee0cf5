//! Software bus seam.
//!
//! The application only needs four operations from the publish/subscribe
//! service. [`LocalBus`] runs everything in-process on one thread;
//! [`ChannelBus`] bridges to other tasks through channels.

use heapless::Deque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::protocol::{Message, OutboundPacket};

pub const MAX_PIPE_DEPTH: usize = 32;
const MAX_SUBSCRIPTIONS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub u16);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("pipe depth {0} exceeds the maximum of {MAX_PIPE_DEPTH}")]
    InvalidDepth(u16),

    #[error("unknown pipe {0:?}")]
    UnknownPipe(PipeId),

    #[error("pipe already created")]
    PipeExists,

    #[error("subscription table full")]
    TooManySubscriptions,

    #[error("pipe overflow, message 0x{0:04X} dropped")]
    PipeOverflow(u16),

    #[error("timed out waiting for a message")]
    Timeout,

    #[error("bus closed")]
    Closed,
}

pub trait SoftwareBus {
    fn create_pipe(&mut self, depth: u16, name: &str) -> Result<PipeId, BusError>;
    fn subscribe(&mut self, msg_id: u16, pipe: PipeId) -> Result<(), BusError>;
    /// Blocks until a message arrives on `pipe` (or the bus's timeout expires).
    fn receive(&mut self, pipe: PipeId) -> Result<Message, BusError>;
    fn publish(&mut self, packet: &OutboundPacket) -> Result<(), BusError>;
}

/// Single-threaded bus. Inbound messages are queued with [`LocalBus::send`].
#[derive(Debug, Default)]
pub struct LocalBus {
    pipe: Option<LocalPipe>,
    published: Vec<OutboundPacket>,
    dropped: u32,
}

#[derive(Debug)]
struct LocalPipe {
    name: String,
    depth: usize,
    subscriptions: heapless::Vec<u16, MAX_SUBSCRIPTIONS>,
    queue: Deque<Message, MAX_PIPE_DEPTH>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes an inbound message to the pipe if its id is subscribed.
    pub fn send(&mut self, message: Message) -> Result<(), BusError> {
        let Some(pipe) = self.pipe.as_mut() else {
            self.dropped = self.dropped.wrapping_add(1);
            return Err(BusError::UnknownPipe(PipeId(0)));
        };

        if !pipe.subscriptions.contains(&message.msg_id) {
            debug!(msg_id = message.msg_id, pipe = %pipe.name, "dropping unsubscribed message");
            self.dropped = self.dropped.wrapping_add(1);
            return Ok(());
        }

        if pipe.queue.len() >= pipe.depth {
            self.dropped = self.dropped.wrapping_add(1);
            return Err(BusError::PipeOverflow(message.msg_id));
        }

        let msg_id = message.msg_id;
        pipe.queue
            .push_back(message)
            .map_err(|_| BusError::PipeOverflow(msg_id))
    }

    /// Queues a message regardless of subscriptions, the way a misrouted
    /// packet would arrive.
    pub fn inject(&mut self, message: Message) -> Result<(), BusError> {
        let pipe = self.pipe.as_mut().ok_or(BusError::UnknownPipe(PipeId(0)))?;
        let msg_id = message.msg_id;
        pipe.queue
            .push_back(message)
            .map_err(|_| BusError::PipeOverflow(msg_id))
    }

    pub fn published(&self) -> &[OutboundPacket] {
        &self.published
    }

    pub fn take_published(&mut self) -> Vec<OutboundPacket> {
        core::mem::take(&mut self.published)
    }

    pub fn pending(&self) -> usize {
        self.pipe.as_ref().map_or(0, |pipe| pipe.queue.len())
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn is_subscribed(&self, msg_id: u16) -> bool {
        self.pipe
            .as_ref()
            .is_some_and(|pipe| pipe.subscriptions.contains(&msg_id))
    }
}

impl SoftwareBus for LocalBus {
    fn create_pipe(&mut self, depth: u16, name: &str) -> Result<PipeId, BusError> {
        if depth == 0 || usize::from(depth) > MAX_PIPE_DEPTH {
            return Err(BusError::InvalidDepth(depth));
        }
        if self.pipe.is_some() {
            return Err(BusError::PipeExists);
        }
        self.pipe = Some(LocalPipe {
            name: name.to_string(),
            depth: usize::from(depth),
            subscriptions: heapless::Vec::new(),
            queue: Deque::new(),
        });
        Ok(PipeId(0))
    }

    fn subscribe(&mut self, msg_id: u16, pipe: PipeId) -> Result<(), BusError> {
        let local = match self.pipe.as_mut() {
            Some(local) if pipe == PipeId(0) => local,
            _ => return Err(BusError::UnknownPipe(pipe)),
        };
        if local.subscriptions.contains(&msg_id) {
            return Ok(());
        }
        local
            .subscriptions
            .push(msg_id)
            .map_err(|_| BusError::TooManySubscriptions)
    }

    /// Nothing else can enqueue while the caller is blocked, so an empty
    /// pipe means the stream has ended.
    fn receive(&mut self, pipe: PipeId) -> Result<Message, BusError> {
        let local = match self.pipe.as_mut() {
            Some(local) if pipe == PipeId(0) => local,
            _ => return Err(BusError::UnknownPipe(pipe)),
        };
        local.queue.pop_front().ok_or(BusError::Closed)
    }

    fn publish(&mut self, packet: &OutboundPacket) -> Result<(), BusError> {
        self.published.push(*packet);
        Ok(())
    }
}

/// Bus backed by a bounded std channel for inbound traffic and a tokio
/// broadcast channel for published telemetry.
#[derive(Debug)]
pub struct ChannelBus {
    inbound: Receiver<Message>,
    outbound: broadcast::Sender<OutboundPacket>,
    receive_timeout: Option<Duration>,
    subscriptions: heapless::Vec<u16, MAX_SUBSCRIPTIONS>,
    pipe_created: bool,
}

/// Sending half handed to producers of inbound messages.
#[derive(Debug, Clone)]
pub struct BusSender {
    inbound: SyncSender<Message>,
}

impl BusSender {
    pub fn send(&self, message: Message) -> Result<(), BusError> {
        let msg_id = message.msg_id;
        self.inbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => BusError::PipeOverflow(msg_id),
            TrySendError::Disconnected(_) => BusError::Closed,
        })
    }
}

impl ChannelBus {
    pub fn new(
        depth: u16,
        receive_timeout: Option<Duration>,
        outbound: broadcast::Sender<OutboundPacket>,
    ) -> (Self, BusSender) {
        let (tx, rx) = mpsc::sync_channel(usize::from(depth));
        let bus = Self {
            inbound: rx,
            outbound,
            receive_timeout,
            subscriptions: heapless::Vec::new(),
            pipe_created: false,
        };
        (bus, BusSender { inbound: tx })
    }
}

impl SoftwareBus for ChannelBus {
    fn create_pipe(&mut self, depth: u16, name: &str) -> Result<PipeId, BusError> {
        if depth == 0 || usize::from(depth) > MAX_PIPE_DEPTH {
            return Err(BusError::InvalidDepth(depth));
        }
        if self.pipe_created {
            return Err(BusError::PipeExists);
        }
        self.pipe_created = true;
        debug!(pipe = name, depth, "command pipe created");
        Ok(PipeId(0))
    }

    fn subscribe(&mut self, msg_id: u16, pipe: PipeId) -> Result<(), BusError> {
        if !self.pipe_created || pipe != PipeId(0) {
            return Err(BusError::UnknownPipe(pipe));
        }
        if self.subscriptions.contains(&msg_id) {
            return Ok(());
        }
        self.subscriptions
            .push(msg_id)
            .map_err(|_| BusError::TooManySubscriptions)
    }

    fn receive(&mut self, pipe: PipeId) -> Result<Message, BusError> {
        if !self.pipe_created || pipe != PipeId(0) {
            return Err(BusError::UnknownPipe(pipe));
        }
        loop {
            let message = match self.receive_timeout {
                Some(timeout) => self.inbound.recv_timeout(timeout).map_err(|e| match e {
                    RecvTimeoutError::Timeout => BusError::Timeout,
                    RecvTimeoutError::Disconnected => BusError::Closed,
                })?,
                None => self.inbound.recv().map_err(|_| BusError::Closed)?,
            };
            if self.subscriptions.contains(&message.msg_id) {
                return Ok(message);
            }
            warn!(msg_id = message.msg_id, "discarding message with no subscription");
        }
    }

    /// A broadcast with no connected listeners is still a completed publish.
    fn publish(&mut self, packet: &OutboundPacket) -> Result<(), BusError> {
        if self.outbound.send(*packet).is_err() {
            debug!(msg_id = packet.header.msg_id, "no telemetry listeners connected");
        }
        Ok(())
    }
}
