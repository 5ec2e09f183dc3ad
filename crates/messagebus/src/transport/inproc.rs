// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process broker driver.
//!
//! Routes mailbox and stream traffic between sessions of the same process,
//! without any wire encoding. A [`Broker`] is bound to an endpoint name; the
//! [`InprocDriver`] connects sessions to it by that name.
//!
//! # Architecture
//!
//! ```text
//! EndpointTable (static global)
//! +-- endpoints: Mutex<HashMap<endpoint, Weak<BrokerState>>>
//! +-- bound: Condvar              (wakes sessions waiting for a bind)
//!
//! BrokerState (one per bound endpoint, strong ref held by Broker)
//! +-- routes: Mutex<Routes>
//!     +-- clients:   identity -> Sender<DeliveryEvent>
//!     +-- consumers: topic    -> {identity}
//!     +-- producers: identity -> topic
//! ```
//!
//! Dropping the [`Broker`] unbinds the endpoint and disconnects every
//! session's inbound channel.
//!
//! # Example
//!
//! ```rust
//! use messagebus::transport::inproc::{Broker, InprocDriver};
//! use messagebus::transport::{Session, TransportDriver};
//! use std::time::Duration;
//!
//! let broker = Broker::bind("inproc://doc-example")?;
//! let session = InprocDriver.open_session("inproc://doc-example", "alice", Duration::ZERO)?;
//! assert!(broker.is_connected("alice"));
//! session.close();
//! assert!(!broker.is_connected("alice"));
//! # Ok::<(), messagebus::Error>(())
//! ```

use super::{DeliveryEvent, DeliveryKind, Session, TransportDriver};
use crate::error::{Error, Result};
use crate::message::Message;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

/// Process-wide map of bound endpoints.
struct EndpointTable {
    endpoints: Mutex<HashMap<String, Weak<BrokerState>>>,
    bound: Condvar,
}

fn endpoint_table() -> &'static EndpointTable {
    static TABLE: OnceLock<EndpointTable> = OnceLock::new();
    TABLE.get_or_init(|| EndpointTable {
        endpoints: Mutex::new(HashMap::new()),
        bound: Condvar::new(),
    })
}

#[derive(Default)]
struct Routes {
    clients: HashMap<String, Sender<DeliveryEvent>>,
    consumers: HashMap<String, BTreeSet<String>>,
    producers: HashMap<String, String>,
}

struct BrokerState {
    endpoint: String,
    routes: Mutex<Routes>,
}

impl BrokerState {
    fn attach(&self, identity: &str) -> Result<Receiver<DeliveryEvent>> {
        let mut routes = self.routes.lock();
        if routes.clients.contains_key(identity) {
            return Err(Error::Connect(format!(
                "identity '{}' is already connected to '{}'",
                identity, self.endpoint
            )));
        }
        let (tx, rx) = channel::unbounded();
        routes.clients.insert(identity.to_string(), tx);
        log::debug!("[inproc] '{}' attached to '{}'", identity, self.endpoint);
        Ok(rx)
    }

    fn detach(&self, identity: &str) {
        let mut routes = self.routes.lock();
        routes.clients.remove(identity);
        routes.producers.remove(identity);
        routes.consumers.retain(|_, members| {
            members.remove(identity);
            !members.is_empty()
        });
        log::debug!("[inproc] '{}' detached from '{}'", identity, self.endpoint);
    }

    fn deliver_mailbox(&self, sender: &str, destination: &str, subject: &str, message: Message) {
        let routes = self.routes.lock();
        let Some(tx) = routes.clients.get(destination) else {
            log::debug!(
                "[inproc] no client '{}' on '{}', mailbox message from '{}' dropped",
                destination,
                self.endpoint,
                sender
            );
            return;
        };
        let event = DeliveryEvent {
            kind: DeliveryKind::Mailbox,
            subject: subject.to_string(),
            sender: sender.to_string(),
            message,
        };
        if tx.send(event).is_err() {
            log::debug!("[inproc] client '{}' stopped reading, message dropped", destination);
        }
    }

    fn deliver_stream(&self, sender: &str, topic: &str, message: Message) -> Result<()> {
        let routes = self.routes.lock();
        if routes.producers.get(sender).map(String::as_str) != Some(topic) {
            return Err(Error::SendFailed(format!(
                "'{}' is not a producer on stream '{}'",
                sender, topic
            )));
        }
        let Some(members) = routes.consumers.get(topic) else {
            return Ok(());
        };
        for member in members {
            if let Some(tx) = routes.clients.get(member) {
                let event = DeliveryEvent {
                    kind: DeliveryKind::Stream,
                    subject: topic.to_string(),
                    sender: sender.to_string(),
                    message: message.clone(),
                };
                if tx.send(event).is_err() {
                    log::debug!("[inproc] consumer '{}' stopped reading", member);
                }
            }
        }
        Ok(())
    }
}

/// An in-process broker bound to an endpoint name.
///
/// The endpoint stays bound for as long as this value lives.
pub struct Broker {
    state: Arc<BrokerState>,
}

impl Broker {
    /// Bind a new broker to `endpoint`.
    ///
    /// # Errors
    ///
    /// [`Error::Connect`] if another live broker is bound to the same endpoint.
    pub fn bind(endpoint: &str) -> Result<Self> {
        let table = endpoint_table();
        let mut endpoints = table.endpoints.lock();
        if endpoints
            .get(endpoint)
            .is_some_and(|existing| existing.strong_count() > 0)
        {
            return Err(Error::Connect(format!(
                "endpoint '{}' is already bound",
                endpoint
            )));
        }

        let state = Arc::new(BrokerState {
            endpoint: endpoint.to_string(),
            routes: Mutex::new(Routes::default()),
        });
        endpoints.insert(endpoint.to_string(), Arc::downgrade(&state));
        table.bound.notify_all();
        log::info!("[inproc] broker bound to '{}'", endpoint);

        Ok(Self { state })
    }

    /// Endpoint this broker is bound to.
    pub fn endpoint(&self) -> &str {
        &self.state.endpoint
    }

    /// True when a session with this identity is attached.
    pub fn is_connected(&self, identity: &str) -> bool {
        self.state.routes.lock().clients.contains_key(identity)
    }

    /// Number of attached sessions.
    pub fn client_count(&self) -> usize {
        self.state.routes.lock().clients.len()
    }

    /// Identities consuming `topic`.
    pub fn consumers(&self, topic: &str) -> Vec<String> {
        self.state
            .routes
            .lock()
            .consumers
            .get(topic)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        let mut endpoints = endpoint_table().endpoints.lock();
        let ours = endpoints
            .get(&self.state.endpoint)
            .is_some_and(|weak| weak.as_ptr() == Arc::as_ptr(&self.state));
        if ours {
            endpoints.remove(&self.state.endpoint);
        }
        drop(endpoints);

        // Disconnect every inbound channel so delivery loops notice.
        self.state.routes.lock().clients.clear();
        log::info!("[inproc] broker unbound from '{}'", self.state.endpoint);
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("endpoint", &self.state.endpoint)
            .field("clients", &self.client_count())
            .finish()
    }
}

/// Driver connecting sessions to in-process [`Broker`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct InprocDriver;

impl TransportDriver for InprocDriver {
    type Session = InprocSession;

    fn open_session(
        &self,
        endpoint: &str,
        identity: &str,
        timeout: Duration,
    ) -> Result<InprocSession> {
        let deadline = Instant::now().checked_add(timeout);
        let table = endpoint_table();
        let mut endpoints = table.endpoints.lock();

        let state = loop {
            if let Some(state) = endpoints.get(endpoint).and_then(Weak::upgrade) {
                break state;
            }
            let Some(deadline) = deadline else {
                table.bound.wait(&mut endpoints);
                continue;
            };
            if table.bound.wait_until(&mut endpoints, deadline).timed_out() {
                match endpoints.get(endpoint).and_then(Weak::upgrade) {
                    Some(state) => break state,
                    None => {
                        return Err(Error::Connect(format!(
                            "Error connecting to endpoint '{}'",
                            endpoint
                        )))
                    }
                }
            }
        };
        drop(endpoints);

        let inbound = state.attach(identity)?;
        Ok(InprocSession {
            identity: identity.to_string(),
            broker: Arc::downgrade(&state),
            inbound,
            closed: AtomicBool::new(false),
        })
    }
}

/// A session attached to an in-process [`Broker`].
pub struct InprocSession {
    identity: String,
    broker: Weak<BrokerState>,
    inbound: Receiver<DeliveryEvent>,
    closed: AtomicBool,
}

impl InprocSession {
    fn broker(&self) -> Result<Arc<BrokerState>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SendFailed(format!(
                "session '{}' is closed",
                self.identity
            )));
        }
        self.broker
            .upgrade()
            .ok_or_else(|| Error::SendFailed("broker is gone".to_string()))
    }
}

impl Session for InprocSession {
    fn send_point_to_point(
        &self,
        destination: &str,
        subject: &str,
        message: Message,
    ) -> Result<()> {
        self.broker()?
            .deliver_mailbox(&self.identity, destination, subject, message);
        Ok(())
    }

    fn send_broadcast(&self, topic: &str, message: Message) -> Result<()> {
        self.broker()?.deliver_stream(&self.identity, topic, message)
    }

    fn set_broadcast_consumer(&self, topic: &str) -> Result<()> {
        self.broker()?
            .routes
            .lock()
            .consumers
            .entry(topic.to_string())
            .or_default()
            .insert(self.identity.clone());
        Ok(())
    }

    fn set_broadcast_producer(&self, topic: &str) -> Result<()> {
        self.broker()?
            .routes
            .lock()
            .producers
            .insert(self.identity.clone(), topic.to_string());
        Ok(())
    }

    fn inbound(&self) -> Receiver<DeliveryEvent> {
        self.inbound.clone()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(state) = self.broker.upgrade() {
            state.detach(&self.identity);
        }
    }
}

impl std::fmt::Debug for InprocSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InprocSession")
            .field("identity", &self.identity)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for InprocSession {
    fn drop(&mut self) {
        self.close();
    }
}
