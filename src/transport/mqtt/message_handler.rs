//! Pure event routing and acknowledgement bookkeeping for MQTT sessions
//!
//! [`MessageHandler::route_event`] turns rumqttc events into [`EventRoute`] decisions.
//! [`AckTracker`] pairs outgoing SUBSCRIBE/UNSUBSCRIBE packets with the broker's answer
//! so callers can wait for it.

use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the appropriate handling (pure routing decision)
    pub fn route_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::SubAck(suback) => EventRoute::SubscribeAcknowledged {
                    packet_id: suback.pkid,
                    accepted: Self::subscription_accepted(&suback.return_codes),
                },
                Packet::UnsubAck(unsuback) => EventRoute::UnsubscribeAcknowledged {
                    packet_id: unsuback.pkid,
                },
                Packet::PubComp(pubcomp) => EventRoute::DeliveryComplete {
                    packet_id: pubcomp.pkid,
                },
                Packet::PubAck(puback) => EventRoute::DeliveryComplete {
                    packet_id: puback.pkid,
                },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Subscribe(pkid)) => EventRoute::SubscribeSent {
                packet_id: *pkid,
            },
            Event::Outgoing(Outgoing::Unsubscribe(pkid)) => EventRoute::UnsubscribeSent {
                packet_id: *pkid,
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// A SUBACK is a success only if no topic was refused
    pub fn subscription_accepted(return_codes: &[SubscribeReasonCode]) -> bool {
        !return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
    }

    /// Payload as text; invalid UTF-8 sequences are replaced
    pub fn decode_payload(payload: &[u8]) -> String {
        String::from_utf8_lossy(payload).into_owned()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// SUBSCRIBE left the client with this packet id
    SubscribeSent { packet_id: u16 },
    /// SUBACK received
    SubscribeAcknowledged { packet_id: u16, accepted: bool },
    /// UNSUBSCRIBE left the client with this packet id
    UnsubscribeSent { packet_id: u16 },
    /// UNSUBACK received
    UnsubscribeAcknowledged { packet_id: u16 },
    /// PUBCOMP (QoS 2) or PUBACK (QoS 1) for one of our publishes
    DeliveryComplete { packet_id: u16 },
    /// Broker closed the session
    Disconnected,
    /// Infrastructure event (PingResp, PubRec, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Which request an acknowledgement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Subscribe,
    Unsubscribe,
}

/// Outcome delivered to a waiting subscribe/unsubscribe call
pub type AckOutcome = Result<(), String>;

type Waiter = oneshot::Sender<AckOutcome>;

#[derive(Default)]
struct AckQueue {
    /// Requests handed to rumqttc whose packet id is not known yet, oldest first.
    /// An abandoned request keeps an empty slot until its outgoing event consumes it.
    queued: VecDeque<Option<Waiter>>,
    /// Requests on the wire, keyed by packet id
    in_flight: HashMap<u16, Waiter>,
}

/// Correlates requests with acknowledgements.
///
/// rumqttc assigns packet ids when it drains its request channel, and reports each
/// one as an outgoing event in request order. Waiters are therefore queued in the
/// order their requests were sent and bound to a packet id when the outgoing event
/// shows up.
#[derive(Default)]
pub struct AckTracker {
    subscribe: AckQueue,
    unsubscribe: AckQueue,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&mut self, kind: AckKind) -> &mut AckQueue {
        match kind {
            AckKind::Subscribe => &mut self.subscribe,
            AckKind::Unsubscribe => &mut self.unsubscribe,
        }
    }

    /// Register a waiter for the next request of `kind`
    pub fn enqueue(&mut self, kind: AckKind, waiter: Waiter) {
        self.queue(kind).queued.push_back(Some(waiter));
    }

    /// Drop the most recently queued waiter (its request never reached rumqttc)
    pub fn cancel_last(&mut self, kind: AckKind) {
        self.queue(kind).queued.pop_back();
    }

    /// Bind the oldest queued waiter to the packet id rumqttc just sent
    pub fn on_sent(&mut self, kind: AckKind, packet_id: u16) {
        let queue = self.queue(kind);
        if let Some(Some(waiter)) = queue.queued.pop_front() {
            queue.in_flight.insert(packet_id, waiter);
        }
    }

    /// Resolve the waiter for `packet_id`; returns false if nobody was waiting
    pub fn on_ack(&mut self, kind: AckKind, packet_id: u16, outcome: AckOutcome) -> bool {
        match self.queue(kind).in_flight.remove(&packet_id) {
            // The caller may have timed out and gone away
            Some(waiter) => waiter.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Release waiters whose caller stopped listening. Returns how many were released.
    pub fn discard_abandoned(&mut self, kind: AckKind) -> usize {
        let queue = self.queue(kind);
        let mut released = 0;
        for slot in queue.queued.iter_mut() {
            if slot.as_ref().is_some_and(|waiter| waiter.is_closed()) {
                *slot = None;
                released += 1;
            }
        }
        let before = queue.in_flight.len();
        queue.in_flight.retain(|_, waiter| !waiter.is_closed());
        released + before - queue.in_flight.len()
    }

    /// Fail every waiter, e.g. when the connection is gone
    pub fn fail_all(&mut self, reason: &str) {
        for queue in [&mut self.subscribe, &mut self.unsubscribe] {
            for waiter in queue.queued.drain(..).flatten() {
                let _ = waiter.send(Err(reason.to_string()));
            }
            for (_, waiter) in queue.in_flight.drain() {
                let _ = waiter.send(Err(reason.to_string()));
            }
        }
    }

    /// Waiters still expecting an answer
    pub fn pending(&self, kind: AckKind) -> usize {
        let queue = match kind {
            AckKind::Subscribe => &self.subscribe,
            AckKind::Unsubscribe => &self.unsubscribe,
        };
        queue.queued.iter().flatten().count() + queue.in_flight.len()
    }
}
