// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport driver contract.
//!
//! A driver knows how to reach one broker technology. The broker backend
//! ([`crate::broker::BrokerBackend`]) is generic over it and only needs the
//! operations below: open a session, send point-to-point or broadcast, declare
//! stream interest, and read inbound deliveries from a channel.
//!
//! ```text
//! BrokerBackend ---send_*()--> Session ---> broker
//!       ^                                      |
//!       +---- delivery thread <-- inbound() <--+
//! ```

#[cfg(feature = "inproc")]
pub mod inproc;

use crate::error::Result;
use crate::message::Message;
use crossbeam::channel::Receiver;
use std::time::Duration;

/// How an inbound message reached this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryKind {
    /// Point-to-point message addressed to this identity.
    Mailbox,
    /// Broadcast message on a subscribed topic.
    Stream,
}

/// One inbound message, as surfaced by the driver.
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    /// Mailbox or stream.
    pub kind: DeliveryKind,
    /// Queue (mailbox) or topic (stream) the message was sent on.
    pub subject: String,
    /// Identity of the sending session.
    pub sender: String,
    /// The message itself.
    pub message: Message,
}

/// Factory for transport sessions.
pub trait TransportDriver: Send + Sync + 'static {
    /// Session type produced by this driver.
    type Session: Session;

    /// Connect to `endpoint` as `identity`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// [`Error::Connect`](crate::Error::Connect) if the broker is unreachable
    /// or refuses the identity.
    fn open_session(
        &self,
        endpoint: &str,
        identity: &str,
        timeout: Duration,
    ) -> Result<Self::Session>;
}

/// A connected session on a broker.
pub trait Session: Send + Sync + 'static {
    /// Send `message` to the mailbox of `destination` under `subject`.
    fn send_point_to_point(&self, destination: &str, subject: &str, message: Message)
        -> Result<()>;

    /// Broadcast `message` on `topic`. Requires a prior
    /// [`set_broadcast_producer`](Self::set_broadcast_producer) for the topic.
    fn send_broadcast(&self, topic: &str, message: Message) -> Result<()>;

    /// Receive broadcasts published on `topic`.
    fn set_broadcast_consumer(&self, topic: &str) -> Result<()>;

    /// Declare this session as the producer of `topic`.
    fn set_broadcast_producer(&self, topic: &str) -> Result<()>;

    /// Inbound deliveries. The channel disconnects when the session closes.
    fn inbound(&self) -> Receiver<DeliveryEvent>;

    /// Leave the broker. Idempotent.
    fn close(&self);
}
