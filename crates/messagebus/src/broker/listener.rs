// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery thread of the broker backend.
//!
//! ```text
//! control (Terminate) --+
//!                       +--> select! --> mailbox? -- matches pending --> wake requester
//! session.inbound() ----+                   |                else --> listener(subject)
//!                                           +-- stream -------------> listener(subject)
//! ```
//!
//! Listeners are looked up under the backend lock and invoked with it
//! released, inside `catch_unwind`.

use super::Shared;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::{DeliveryEvent, DeliveryKind};
use crossbeam::channel::{self, Receiver, Sender};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Commands understood by the delivery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Control {
    Terminate,
}

/// Delivery counters of one backend.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    /// Inbound deliveries read from the session.
    pub received: AtomicU64,
    /// Mailbox deliveries that completed a synchronous request.
    pub replies: AtomicU64,
    /// Deliveries handed to a listener.
    pub delivered: AtomicU64,
    /// Deliveries with no listener for their subject.
    pub dropped: AtomicU64,
    /// Listener invocations that panicked.
    pub listener_panics: AtomicU64,
}

/// Point-in-time copy of [`DeliveryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// See [`DeliveryMetrics::received`].
    pub received: u64,
    /// See [`DeliveryMetrics::replies`].
    pub replies: u64,
    /// See [`DeliveryMetrics::delivered`].
    pub delivered: u64,
    /// See [`DeliveryMetrics::dropped`].
    pub dropped: u64,
    /// See [`DeliveryMetrics::listener_panics`].
    pub listener_panics: u64,
}

impl DeliveryMetrics {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copy the counters into a [`DeliveryStats`].
    pub fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            received: self.received.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            listener_panics: self.listener_panics.load(Ordering::Relaxed),
        }
    }
}

/// Handle on the running delivery thread.
///
/// Dropping it stops the thread.
pub(super) struct DeliveryThread {
    handle: Option<JoinHandle<()>>,
    control: Sender<Control>,
}

impl DeliveryThread {
    /// Spawn the delivery loop for `agent`.
    pub(super) fn spawn(
        agent: String,
        shared: Arc<Shared>,
        inbound: Receiver<DeliveryEvent>,
    ) -> Result<Self> {
        let (control, commands) = channel::unbounded();
        let delivery = DeliveryLoop {
            agent: agent.clone(),
            shared,
            commands,
            inbound,
        };

        let handle = std::thread::Builder::new()
            .name(format!("messagebus-{}", agent))
            .spawn(move || delivery.run())
            .map_err(|e| Error::Internal(format!("cannot spawn delivery thread: {}", e)))?;

        Ok(Self {
            handle: Some(handle),
            control,
        })
    }

    /// True until the loop has returned.
    pub(super) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signal termination and wait for the loop to exit.
    ///
    /// Called from a listener (the delivery thread itself) it only signals;
    /// the loop exits once the listener returns.
    pub(super) fn stop(&mut self) {
        let _ = self.control.send(Control::Terminate);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == std::thread::current().id() {
                log::debug!("delivery thread stopping itself, not joining");
                return;
            }
            if handle.join().is_err() {
                log::error!("delivery thread panicked");
            }
        }
    }
}

impl Drop for DeliveryThread {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DeliveryLoop {
    agent: String,
    shared: Arc<Shared>,
    commands: Receiver<Control>,
    inbound: Receiver<DeliveryEvent>,
}

impl DeliveryLoop {
    fn run(self) {
        log::trace!("{} - delivery loop ready", self.agent);
        loop {
            crossbeam::select! {
                recv(self.commands) -> command => match command {
                    Ok(Control::Terminate) | Err(_) => break,
                },
                recv(self.inbound) -> event => match event {
                    Ok(event) => self.dispatch(event),
                    Err(_) => {
                        log::warn!("{} - transport session disconnected", self.agent);
                        self.shared.listener_stopped();
                        break;
                    }
                },
            }
        }
        log::debug!("{} - delivery loop terminated", self.agent);
    }

    fn dispatch(&self, event: DeliveryEvent) {
        let metrics = &self.shared.metrics;
        metrics.received.fetch_add(1, Ordering::Relaxed);

        let DeliveryEvent {
            kind,
            subject,
            sender,
            message,
        } = event;

        match kind {
            DeliveryKind::Mailbox => {
                log::trace!(
                    "{} - mailbox delivery from '{}' on '{}'",
                    self.agent,
                    sender,
                    subject
                );
                match self.shared.complete_pending(message) {
                    None => {
                        metrics.replies.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(message) => self.deliver(&subject, message),
                }
            }
            DeliveryKind::Stream => {
                log::trace!(
                    "{} - stream delivery from '{}' on '{}'",
                    self.agent,
                    sender,
                    subject
                );
                self.deliver(&subject, message);
            }
        }
    }

    fn deliver(&self, subject: &str, message: Message) {
        let metrics = &self.shared.metrics;
        let Some(listener) = self.shared.listener_for(subject) else {
            metrics.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "{} - no listener for '{}', message skipped",
                self.agent,
                subject
            );
            return;
        };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            listener(message);
        }));
        match result {
            Ok(()) => {
                metrics.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(panic) => {
                metrics.listener_panics.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "{} - listener of '{}' panicked: {}",
                    self.agent,
                    subject,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
