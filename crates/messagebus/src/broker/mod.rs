// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker backend: the reference [`Backend`] over a mailbox + stream broker.
//!
//! Works with any [`TransportDriver`]. Owns the transport session, one
//! delivery thread, the subscription table and the pending-correlation slot
//! used by synchronous requests.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --session--> Connected
//!                                                        |
//!                                                 spawn delivery thread
//!                                                        v
//!              Closed <-------close()/drop------- ListenerRunning
//! ```
//!
//! All operations other than `connect` require `ListenerRunning`. When the
//! transport disconnects underneath, the delivery loop exits and the backend
//! falls back to `Connected` until `close()`.
//!
//! # Correlation
//!
//! `request` parks its correlation id in a single pending slot, sends, then
//! waits on a condvar. The delivery thread checks every mailbox delivery
//! against the slot: a match completes the request, anything else goes to
//! the listener registered for the delivery's subject. The slot is cleared on
//! completion and on timeout, so a late reply never satisfies a later call.
//!
//! # Locking
//!
//! One mutex guards the subscription table, the publish-topic binding and the
//! pending slot; the delivery thread takes the same mutex to read them.
//! Listeners run with the mutex released so they can call back into the
//! backend (typically to reply).

mod listener;

pub use listener::{DeliveryMetrics, DeliveryStats};

use crate::backend::{Backend, Listener};
use crate::config::ConnectionOptions;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::{Session, TransportDriver};
use listener::DeliveryThread;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Connection state of a [`BrokerBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected yet (or a connect attempt failed).
    Disconnected,
    /// Opening the transport session.
    Connecting,
    /// Session open, delivery thread not started yet (or stopped after the
    /// transport disconnected).
    Connected,
    /// Session open and delivery thread running.
    ListenerRunning,
    /// Closed for good.
    Closed,
}

/// Reply slot for the one in-flight synchronous request.
struct PendingReply {
    correlation_id: String,
    reply: Option<Message>,
}

/// State shared between caller threads and the delivery thread.
struct State {
    phase: ConnectionState,
    agent: String,
    endpoint: String,
    session: Option<Arc<dyn Session>>,
    subscriptions: HashMap<String, Listener>,
    publish_topic: Option<String>,
    pending: Option<PendingReply>,
    /// Set by the delivery loop when the session's inbound side disconnects.
    transport_lost: bool,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    reply_ready: Condvar,
    metrics: Arc<DeliveryMetrics>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                phase: ConnectionState::Disconnected,
                agent: String::new(),
                endpoint: String::new(),
                session: None,
                subscriptions: HashMap::new(),
                publish_topic: None,
                pending: None,
                transport_lost: false,
            }),
            reply_ready: Condvar::new(),
            metrics: DeliveryMetrics::new(),
        }
    }

    /// Lock the state, requiring a running delivery loop.
    fn running(&self) -> Result<(MutexGuard<'_, State>, Arc<dyn Session>)> {
        let state = self.state.lock();
        if state.phase != ConnectionState::ListenerRunning {
            return Err(Error::NotConnected(format!(
                "backend is {:?}",
                state.phase
            )));
        }
        let session = state
            .session
            .clone()
            .ok_or_else(|| Error::Internal("running backend without a session".to_string()))?;
        Ok((state, session))
    }

    fn agent(&self) -> String {
        self.state.lock().agent.clone()
    }

    /// Hand `message` to the waiting requester if it is the awaited reply.
    ///
    /// Returns the message back when it does not complete a request.
    fn complete_pending(&self, message: Message) -> Option<Message> {
        let mut state = self.state.lock();
        if let Some(pending) = state.pending.as_mut() {
            if pending.reply.is_none() && message.correlates_with(&pending.correlation_id) {
                pending.reply = Some(message);
                self.reply_ready.notify_all();
                return None;
            }
        }
        Some(message)
    }

    /// The delivery loop lost its session: leave `ListenerRunning` and wake
    /// a waiting requester. `close()` is still needed to release the session.
    fn listener_stopped(&self) {
        let mut state = self.state.lock();
        state.transport_lost = true;
        if state.phase == ConnectionState::ListenerRunning {
            state.phase = ConnectionState::Connected;
        }
        self.reply_ready.notify_all();
    }

    fn listener_for(&self, subject: &str) -> Option<Listener> {
        self.state.lock().subscriptions.get(subject).cloned()
    }
}

/// Reference backend over a mailbox + stream broker.
///
/// # Example
///
/// ```rust
/// use messagebus::broker::{BrokerBackend, ConnectionState};
/// use messagebus::transport::inproc::{Broker, InprocDriver};
/// use messagebus::Backend;
///
/// let _broker = Broker::bind("inproc://broker-doc")?;
/// let backend = BrokerBackend::new(InprocDriver);
/// backend.connect("agent=doc;endpoint=inproc://broker-doc")?;
/// assert_eq!(backend.state(), ConnectionState::ListenerRunning);
/// backend.close();
/// assert_eq!(backend.state(), ConnectionState::Closed);
/// # Ok::<(), messagebus::Error>(())
/// ```
pub struct BrokerBackend<D: TransportDriver> {
    driver: D,
    shared: Arc<Shared>,
    /// Serializes synchronous requests (one pending slot per backend).
    request_gate: Mutex<()>,
    delivery: Mutex<Option<DeliveryThread>>,
}

impl<D: TransportDriver> BrokerBackend<D> {
    /// Create a disconnected backend using `driver`.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            shared: Arc::new(Shared::new()),
            request_gate: Mutex::new(()),
            delivery: Mutex::new(None),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().phase
    }

    /// Endpoint given at connect time.
    pub fn endpoint(&self) -> String {
        self.shared.state.lock().endpoint.clone()
    }

    /// True while the delivery thread is alive.
    pub fn is_listening(&self) -> bool {
        self.delivery
            .lock()
            .as_ref()
            .is_some_and(DeliveryThread::is_running)
    }

    /// Topics and queues that currently have a listener, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .state
            .lock()
            .subscriptions
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Topic this backend publishes on, once bound.
    pub fn publish_topic(&self) -> Option<String> {
        self.shared.state.lock().publish_topic.clone()
    }

    /// Delivery counters.
    pub fn metrics(&self) -> DeliveryStats {
        self.shared.metrics.snapshot()
    }

    fn reset_after_failed_connect(&self) {
        let mut state = self.shared.state.lock();
        if state.phase != ConnectionState::Closed {
            state.phase = ConnectionState::Disconnected;
        }
    }
}

impl<D: TransportDriver> Backend for BrokerBackend<D> {
    fn connect(&self, connection: &str) -> Result<()> {
        let options = ConnectionOptions::parse(connection)?;

        {
            let mut state = self.shared.state.lock();
            match state.phase {
                ConnectionState::Disconnected => {}
                ConnectionState::Closed => {
                    return Err(Error::NotConnected("backend is closed".to_string()))
                }
                other => {
                    return Err(Error::InvalidState(format!(
                        "cannot connect while {:?}",
                        other
                    )))
                }
            }
            state.phase = ConnectionState::Connecting;
            state.agent = options.agent.clone();
            state.endpoint = options.endpoint.clone();
        }

        // The driver may wait for the broker; do not hold the state lock here.
        let session: Arc<dyn Session> = match self.driver.open_session(
            &options.endpoint,
            &options.agent,
            options.connect_timeout,
        ) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                log::warn!("{} - cannot connect to '{}': {}", options.agent, options.endpoint, e);
                self.reset_after_failed_connect();
                return Err(e);
            }
        };
        {
            let mut state = self.shared.state.lock();
            if state.phase == ConnectionState::Connecting {
                state.phase = ConnectionState::Connected;
            }
        }

        let thread = match DeliveryThread::spawn(
            options.agent.clone(),
            Arc::clone(&self.shared),
            session.inbound(),
        ) {
            Ok(thread) => thread,
            Err(e) => {
                session.close();
                self.reset_after_failed_connect();
                return Err(e);
            }
        };

        let mut state = self.shared.state.lock();
        if state.phase != ConnectionState::Connected {
            // Closed while we were connecting.
            drop(state);
            drop(thread);
            session.close();
            return Err(Error::NotConnected("backend closed during connect".to_string()));
        }
        state.session = Some(session);
        *self.delivery.lock() = Some(thread);
        if state.transport_lost {
            // The loop already exited; stay Connected so close() releases the session.
            return Err(Error::NotConnected(
                "transport disconnected during connect".to_string(),
            ));
        }
        state.phase = ConnectionState::ListenerRunning;

        log::debug!("{} - connected to '{}'", options.agent, options.endpoint);
        Ok(())
    }

    fn request(&self, queue: &str, mut message: Message, timeout: Duration) -> Result<Message> {
        if message.meta.to.is_empty() {
            return Err(Error::Validation(
                "Request message must have a 'to' field".to_string(),
            ));
        }

        let _gate = self.request_gate.lock();
        let (mut state, session) = self.shared.running()?;

        if message.meta.correlation_id.is_empty() {
            message.meta.correlation_id = uuid::Uuid::new_v4().to_string();
        }
        message.meta.from = state.agent.clone();
        message.meta.reply_to = state.agent.clone();
        message.meta.timeout = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

        let correlation_id = message.meta.correlation_id.clone();
        let destination = message.meta.to.clone();
        state.pending = Some(PendingReply {
            correlation_id: correlation_id.clone(),
            reply: None,
        });

        if let Err(e) = session.send_point_to_point(&destination, queue, message) {
            state.pending = None;
            return Err(e);
        }
        log::trace!(
            "{} - request '{}' sent to '{}' on '{}'",
            state.agent,
            correlation_id,
            destination,
            queue
        );

        // None: the timeout does not fit in an Instant, wait without deadline.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(reply) = state.pending.as_mut().and_then(|p| p.reply.take()) {
                state.pending = None;
                return Ok(reply);
            }
            if state.phase != ConnectionState::ListenerRunning {
                state.pending = None;
                return Err(Error::NotConnected(
                    "backend closed while waiting for reply".to_string(),
                ));
            }
            let Some(deadline) = deadline else {
                self.shared.reply_ready.wait(&mut state);
                continue;
            };
            if self
                .shared
                .reply_ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                // A reply may have landed together with the deadline.
                let reply = state.pending.take().and_then(|p| p.reply);
                return reply.ok_or_else(|| {
                    Error::Timeout(format!(
                        "no reply to '{}' on '{}' within {:?}",
                        correlation_id, queue, timeout
                    ))
                });
            }
        }
    }

    fn subscribe(&self, topic: &str, listener: Listener) -> Result<()> {
        let (mut state, session) = self.shared.running()?;
        if state.subscriptions.contains_key(topic) {
            return Err(Error::AlreadySubscribed(topic.to_string()));
        }
        session.set_broadcast_consumer(topic)?;
        state.subscriptions.insert(topic.to_string(), listener);
        log::trace!("{} - subscribed to topic '{}'", state.agent, topic);
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<()> {
        let (mut state, _session) = self.shared.running()?;
        if state.subscriptions.remove(topic).is_none() {
            return Err(Error::NotSubscribed(topic.to_string()));
        }
        // The stream stays declared on the broker; its deliveries are dropped here.
        log::trace!("{} - unsubscribed from topic '{}'", state.agent, topic);
        Ok(())
    }

    fn publish(&self, topic: &str, message: Message) -> Result<()> {
        let (mut state, session) = self.shared.running()?;
        match state.publish_topic.as_deref() {
            None => {
                session.set_broadcast_producer(topic)?;
                state.publish_topic = Some(topic.to_string());
                log::trace!("{} - registered as stream producer on '{}'", state.agent, topic);
            }
            Some(bound) if bound != topic => {
                return Err(Error::TopicConflict {
                    bound: bound.to_string(),
                    requested: topic.to_string(),
                });
            }
            Some(_) => {}
        }
        let agent = state.agent.clone();
        drop(state);

        log::trace!("{} - publishing on topic '{}'", agent, topic);
        session.send_broadcast(topic, message)
    }

    fn receive(&self, queue: &str, listener: Listener) -> Result<()> {
        let (mut state, _session) = self.shared.running()?;
        if state.subscriptions.contains_key(queue) {
            return Err(Error::AlreadyRegistered(queue.to_string()));
        }
        state.subscriptions.insert(queue.to_string(), listener);
        log::trace!("{} - receive from queue '{}'", state.agent, queue);
        Ok(())
    }

    fn send_reply(&self, queue: &str, message: Message) -> Result<()> {
        if message.meta.correlation_id.is_empty() {
            return Err(Error::MissingCorrelation);
        }
        let (state, session) = self.shared.running()?;
        if message.meta.to.is_empty() {
            log::warn!("{} - reply should have a 'to' field", state.agent);
        }
        drop(state);

        let destination = message.meta.to.clone();
        session.send_point_to_point(&destination, queue, message)
    }

    fn send_request(&self, queue: &str, message: Message) -> Result<()> {
        let (state, session) = self.shared.running()?;
        if message.meta.correlation_id.is_empty() {
            log::warn!("{} - request should have a correlation id", state.agent);
        }
        if message.meta.reply_to.is_empty() {
            log::warn!("{} - request should have a reply to field", state.agent);
        }
        let destination = if message.meta.to.is_empty() {
            log::warn!("{} - request should have a to field", state.agent);
            queue.to_string()
        } else {
            message.meta.to.clone()
        };
        drop(state);

        session.send_point_to_point(&destination, queue, message)
    }

    fn send_request_with_listener(
        &self,
        queue: &str,
        message: Message,
        listener: Listener,
    ) -> Result<()> {
        if message.meta.reply_to.is_empty() {
            return Err(Error::MissingReplyTo);
        }
        {
            let (mut state, _session) = self.shared.running()?;
            let reply_to = message.meta.reply_to.clone();
            if state.subscriptions.contains_key(&reply_to) {
                log::warn!(
                    "{} - queue '{}' already has a listener, keeping it",
                    state.agent,
                    reply_to
                );
            } else {
                log::trace!("{} - receive from queue '{}'", state.agent, reply_to);
                state.subscriptions.insert(reply_to, listener);
            }
        }
        self.send_request(queue, message)
    }

    fn identity(&self) -> String {
        self.shared.agent()
    }

    fn close(&self) {
        let (agent, session) = {
            let mut state = self.shared.state.lock();
            if state.phase == ConnectionState::Closed {
                return;
            }
            state.phase = ConnectionState::Closed;
            // Wake a requester so it sees the closed state.
            self.shared.reply_ready.notify_all();
            (state.agent.clone(), state.session.take())
        };

        // Stop the delivery loop before releasing the session.
        let thread = self.delivery.lock().take();
        if let Some(mut thread) = thread {
            thread.stop();
        }
        if let Some(session) = session {
            session.close();
        }

        let listeners = {
            let mut state = self.shared.state.lock();
            state.pending = None;
            std::mem::take(&mut state.subscriptions)
        };
        // Listeners may own handles to the bus; drop them outside the lock.
        drop(listeners);

        log::debug!("{} - backend closed", agent);
    }
}

impl<D: TransportDriver> Drop for BrokerBackend<D> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(all(test, feature = "inproc"))]
mod tests {
    use super::*;
    use crate::backend::listener;
    use crate::transport::inproc::{Broker, InprocDriver};
    use crossbeam::channel;

    const WAIT: Duration = Duration::from_secs(2);

    fn eventually(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    fn connected(endpoint: &str, agent: &str) -> BrokerBackend<InprocDriver> {
        let backend = BrokerBackend::new(InprocDriver);
        backend
            .connect(&format!("agent={};endpoint={};timeout=0", agent, endpoint))
            .expect("connect");
        backend
    }

    #[test]
    fn operations_before_connect_are_rejected() {
        let backend = BrokerBackend::new(InprocDriver);
        assert_eq!(backend.state(), ConnectionState::Disconnected);
        assert!(matches!(
            backend.subscribe("t", listener(|_| {})),
            Err(Error::NotConnected(_))
        ));
        assert!(matches!(
            backend.publish("t", Message::new()),
            Err(Error::NotConnected(_))
        ));
        let mut msg = Message::new();
        msg.meta.to = "x".into();
        assert!(matches!(
            backend.request("q", msg, Duration::from_millis(10)),
            Err(Error::NotConnected(_))
        ));
    }

    #[test]
    fn failed_connect_leaves_no_thread() {
        let backend = BrokerBackend::new(InprocDriver);
        let err = backend
            .connect("agent=a;endpoint=inproc://unbound-backend;timeout=10")
            .unwrap_err();
        assert!(matches!(err, Error::Connect(_)));
        assert_eq!(backend.state(), ConnectionState::Disconnected);
        assert!(!backend.is_listening());
    }

    #[test]
    fn second_connect_is_invalid_state() {
        let _broker = Broker::bind("inproc://backend-reconnect").unwrap();
        let backend = connected("inproc://backend-reconnect", "again");
        assert!(matches!(
            backend.connect("agent=again;endpoint=inproc://backend-reconnect"),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn subscription_table_conflicts() {
        let _broker = Broker::bind("inproc://backend-table").unwrap();
        let backend = connected("inproc://backend-table", "table");

        backend.subscribe("alerts", listener(|_| {})).unwrap();
        assert_eq!(
            backend.subscribe("alerts", listener(|_| {})),
            Err(Error::AlreadySubscribed("alerts".into()))
        );
        assert_eq!(
            backend.receive("alerts", listener(|_| {})),
            Err(Error::AlreadyRegistered("alerts".into()))
        );

        assert_eq!(
            backend.unsubscribe("never"),
            Err(Error::NotSubscribed("never".into()))
        );
        assert_eq!(backend.subscriptions(), vec!["alerts".to_string()]);

        backend.unsubscribe("alerts").unwrap();
        assert!(backend.subscriptions().is_empty());
    }

    #[test]
    fn publish_binds_first_topic() {
        let _broker = Broker::bind("inproc://backend-publish").unwrap();
        let backend = connected("inproc://backend-publish", "pub");

        backend.publish("metrics", Message::new()).unwrap();
        backend.publish("metrics", Message::new()).unwrap();
        assert_eq!(backend.publish_topic().as_deref(), Some("metrics"));
        assert_eq!(
            backend.publish("alerts", Message::new()),
            Err(Error::TopicConflict {
                bound: "metrics".into(),
                requested: "alerts".into(),
            })
        );
    }

    #[test]
    fn protocol_preconditions() {
        let _broker = Broker::bind("inproc://backend-preconditions").unwrap();
        let backend = connected("inproc://backend-preconditions", "pre");

        assert_eq!(
            backend.send_reply("q", Message::new()),
            Err(Error::MissingCorrelation)
        );
        assert_eq!(
            backend.send_request_with_listener("q", Message::new(), listener(|_| {})),
            Err(Error::MissingReplyTo)
        );
        assert!(matches!(
            backend.request("q", Message::new(), Duration::from_millis(10)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn send_request_with_listener_receives_reply() {
        let _broker = Broker::bind("inproc://backend-async").unwrap();
        let client = Arc::new(connected("inproc://backend-async", "client"));

        let responder = Arc::new(connected("inproc://backend-async", "responder"));
        let replier = Arc::clone(&responder);
        responder
            .receive(
                "jobs",
                listener(move |req: Message| {
                    let mut answer = Message::with_data(["done"]);
                    answer.meta.correlation_id = req.meta.correlation_id.clone();
                    answer.meta.to = req.meta.from.clone();
                    replier.send_reply(&req.meta.reply_to, answer).unwrap();
                }),
            )
            .unwrap();

        let (tx, rx) = channel::bounded(1);
        let mut request = Message::with_data(["work"]);
        request.meta.to = "responder".into();
        request.meta.from = "client".into();
        request.meta.reply_to = "jobs-reply".into();
        request.meta.correlation_id = "job-1".into();
        client
            .send_request_with_listener(
                "jobs",
                request,
                listener(move |reply: Message| {
                    let _ = tx.send(reply);
                }),
            )
            .unwrap();

        let reply = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(reply.meta.correlation_id, "job-1");
        assert_eq!(reply.data(), ["done"]);
        assert!(client.subscriptions().contains(&"jobs-reply".to_string()));

        // The listener holds the responder; closing drops it.
        responder.close();
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let _broker = Broker::bind("inproc://backend-panic").unwrap();
        let consumer = connected("inproc://backend-panic", "consumer");
        let producer = connected("inproc://backend-panic", "producer");

        let (tx, rx) = channel::unbounded();
        consumer
            .subscribe(
                "events",
                listener(move |msg: Message| {
                    if msg.data().first().map(String::as_str) == Some("boom") {
                        panic!("listener failure");
                    }
                    let _ = tx.send(msg);
                }),
            )
            .unwrap();

        producer.publish("events", Message::with_data(["boom"])).unwrap();
        producer.publish("events", Message::with_data(["fine"])).unwrap();

        let msg = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(msg.data(), ["fine"]);
        assert_eq!(consumer.metrics().listener_panics, 1);
    }

    #[test]
    fn close_stops_delivery_and_is_idempotent() {
        let broker = Broker::bind("inproc://backend-close").unwrap();
        let backend = connected("inproc://backend-close", "closer");
        backend.subscribe("t", listener(|_| {})).unwrap();
        assert!(backend.is_listening());

        backend.close();
        backend.close();
        assert_eq!(backend.state(), ConnectionState::Closed);
        assert!(!backend.is_listening());
        assert!(backend.subscriptions().is_empty());
        assert!(!broker.is_connected("closer"));
        assert!(matches!(
            backend.connect("agent=closer;endpoint=inproc://backend-close"),
            Err(Error::NotConnected(_))
        ));
    }

    #[test]
    fn transport_loss_leaves_running_state() {
        let broker = Broker::bind("inproc://backend-lost").unwrap();
        let backend = connected("inproc://backend-lost", "stranded");
        assert!(backend.is_listening());

        drop(broker);
        assert!(eventually(|| backend.state() == ConnectionState::Connected));
        assert!(eventually(|| !backend.is_listening()));

        assert!(matches!(
            backend.subscribe("t", listener(|_| {})),
            Err(Error::NotConnected(_))
        ));
        let mut msg = Message::new();
        msg.meta.to = "anyone".into();
        assert!(matches!(
            backend.request("q", msg, Duration::from_secs(30)),
            Err(Error::NotConnected(_))
        ));

        backend.close();
        assert_eq!(backend.state(), ConnectionState::Closed);
    }

    #[test]
    fn listener_can_drop_last_backend_owner() {
        let broker = Broker::bind("inproc://backend-self-close").unwrap();
        let sender = connected("inproc://backend-self-close", "sender");
        let owner = Arc::new(connected("inproc://backend-self-close", "self-closer"));

        let slot = Arc::new(Mutex::new(Some(Arc::clone(&owner))));
        let (tx, rx) = channel::bounded(1);
        let held = Arc::clone(&slot);
        owner
            .receive(
                "shutdown",
                listener(move |_| {
                    let backend = held.lock().take();
                    if let Some(backend) = backend {
                        backend.close();
                        drop(backend);
                    }
                    let _ = tx.send(());
                }),
            )
            .unwrap();
        // From here the listener's slot holds the only reference.
        drop(owner);

        let mut msg = Message::new();
        msg.meta.to = "self-closer".into();
        sender.send_request("shutdown", msg).unwrap();

        rx.recv_timeout(WAIT).expect("listener returned");
        assert!(slot.lock().is_none());
        assert!(!broker.is_connected("self-closer"));
        assert!(broker.is_connected("sender"));
    }

    #[test]
    fn close_wakes_waiting_request() {
        let _broker = Broker::bind("inproc://backend-close-wakes").unwrap();
        let backend = Arc::new(connected("inproc://backend-close-wakes", "waiter"));

        let requester = Arc::clone(&backend);
        let started = Instant::now();
        let waiting = std::thread::spawn(move || {
            let mut msg = Message::with_data(["hello?"]);
            msg.meta.to = "nobody".into();
            requester.request("q", msg, Duration::from_secs(30))
        });

        std::thread::sleep(Duration::from_millis(100));
        backend.close();

        let result = waiting.join().unwrap();
        assert!(matches!(result, Err(Error::NotConnected(_))));
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
