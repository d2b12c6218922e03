// src/connection/session.rs

//! Defines the per-connection `Session`, which turns parsed commands into
//! registry operations and outbound frames.

use super::keepalive::{Keepalive, RoundTrip};
use crate::core::SpinelMQError;
use crate::core::metrics;
use crate::core::protocol::{
    CommandHandler, ConnectOptions, Message, PublishArgs, ServerFrame, SubscribeArgs,
};
use crate::core::pubsub::{SubscribeResult, Subscription, subject};
use crate::core::state::{Delivery, ServerState};
use bytes::Bytes;
use std::sync::Arc;
use std::vec::Drain;
use tracing::{debug, warn};

/// Holds the state specific to a single client session.
///
/// Replies to the session's own commands (PONG, +OK, -ERR, echoed MSG) are
/// queued locally and written by the connection handler after each parsed
/// read. Only deliveries from other sessions go through the bounded mailbox.
#[derive(Debug)]
pub struct Session {
    state: Arc<ServerState>,
    id: u64,
    replies: Vec<ServerFrame>,
    /// `None` until a CONNECT has been accepted.
    options: Option<ConnectOptions>,
    /// Runs only after a successful CONNECT.
    keepalive: Option<Keepalive>,
    round_trip: RoundTrip,
    pings_outstanding: u32,
}

impl Session {
    pub fn new(state: Arc<ServerState>, id: u64) -> Self {
        Self {
            state,
            id,
            replies: Vec::new(),
            options: None,
            keepalive: None,
            round_trip: RoundTrip::default(),
            pings_outstanding: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> Option<&ConnectOptions> {
        self.options.as_ref()
    }

    pub fn has_keepalive(&self) -> bool {
        self.keepalive.is_some()
    }

    pub fn pings_outstanding(&self) -> u32 {
        self.pings_outstanding
    }

    /// The last measured PING round trip in milliseconds.
    pub fn round_trip_millis(&self) -> Option<u64> {
        self.round_trip.millis()
    }

    fn verbose(&self) -> bool {
        self.options.as_ref().is_some_and(|opts| opts.verbose)
    }

    fn echo(&self) -> bool {
        self.options.as_ref().is_none_or(|opts| opts.echo)
    }

    /// Resolves on the next keepalive tick; never resolves while no keepalive runs.
    pub async fn keepalive_tick(&mut self) {
        match self.keepalive.as_mut() {
            Some(keepalive) => keepalive.tick().await,
            None => std::future::pending().await,
        }
    }

    /// Sends a keepalive PING, or fails with `StaleConnection` when too many
    /// are already unanswered.
    pub fn send_ping(&mut self) -> Result<(), SpinelMQError> {
        if self.pings_outstanding >= self.state.config.max_pings_outstanding {
            return Err(SpinelMQError::StaleConnection);
        }
        self.pings_outstanding += 1;
        self.round_trip.start();
        self.send_message(ServerFrame::Ping);
        Ok(())
    }

    /// Queues a reply to this session's own client.
    pub fn send_message(&mut self, frame: ServerFrame) {
        self.replies.push(frame);
    }

    pub fn has_replies(&self) -> bool {
        !self.replies.is_empty()
    }

    /// Hands the queued replies to the writer, oldest first.
    pub fn drain_replies(&mut self) -> Drain<'_, ServerFrame> {
        self.replies.drain(..)
    }

    /// Stops the keepalive and removes every subscription this session owns.
    pub fn on_closed(&mut self) {
        self.keepalive = None;
        let removed = self.state.registry.unsubscribe_by_owner(self.id);
        debug!(
            "Session {} closed, {} subscription(s) removed.",
            self.id, removed
        );
    }

    fn record_delivery(&self, payload_len: usize) {
        self.state.stats.record_outbound(payload_len);
        metrics::MESSAGES_DELIVERED_TOTAL.inc();
        metrics::PAYLOAD_BYTES_DELIVERED_TOTAL.inc_by(payload_len as f64);
    }
}

impl CommandHandler for Session {
    fn process_connect(&mut self, arg: &[u8]) -> Result<(), SpinelMQError> {
        let options = match ConnectOptions::from_json(arg) {
            Ok(options) => options,
            Err(e) => {
                warn!("Session {}: invalid CONNECT options: {}", self.id, e);
                self.send_message(ServerFrame::err("Invalid CONNECT Options"));
                return Ok(());
            }
        };
        debug!(
            "Session {}: CONNECT from {} ({} {}).",
            self.id, options.name, options.lang, options.version
        );

        if let Some(mut entry) = self.state.clients.get_mut(&self.id) {
            entry.info.name = Some(options.name.clone());
            entry.info.lang = Some(options.lang.clone());
            entry.info.version = Some(options.version.clone());
        }

        let verbose = options.verbose;
        self.options = Some(options);
        if self.keepalive.is_none() {
            self.keepalive = Some(Keepalive::start(self.state.config.ping_interval));
        }
        if verbose {
            self.send_message(ServerFrame::Ok);
        }
        Ok(())
    }

    fn process_ping(&mut self) -> Result<(), SpinelMQError> {
        self.send_message(ServerFrame::Pong);
        Ok(())
    }

    fn process_pong(&mut self) -> Result<(), SpinelMQError> {
        self.pings_outstanding = 0;
        if let Some(rtt) = self.round_trip.stop() {
            metrics::PING_RTT_SECONDS.observe(rtt.as_secs_f64());
            debug!("Session {}: round trip {} us.", self.id, rtt.as_micros());
        }
        Ok(())
    }

    fn process_subscribe(&mut self, args: SubscribeArgs) -> Result<(), SpinelMQError> {
        if !subject::is_valid_subscription(&args.subject) {
            debug!(
                "Session {}: rejected subscription to '{}'.",
                self.id,
                String::from_utf8_lossy(&args.subject)
            );
            self.send_message(ServerFrame::err("Invalid Subject"));
            return Ok(());
        }

        let subscription = Arc::new(Subscription::new(
            args.subject,
            args.sid,
            args.queue_group,
            self.id,
        ));
        if self.state.registry.subscribe(subscription.clone()) == SubscribeResult::Duplicate {
            debug!(
                "Session {}: duplicate subscription to '{}' with sid '{}'.",
                self.id,
                String::from_utf8_lossy(&subscription.subject),
                String::from_utf8_lossy(&subscription.sid)
            );
        }

        if self.verbose() {
            self.send_message(ServerFrame::Ok);
        }
        Ok(())
    }

    fn process_publish(&mut self, args: PublishArgs, payload: Bytes) -> Result<(), SpinelMQError> {
        if !subject::is_valid_publish_subject(&args.subject) {
            debug!(
                "Session {}: rejected publish to '{}'.",
                self.id,
                String::from_utf8_lossy(&args.subject)
            );
            self.send_message(ServerFrame::err("Invalid Publish Subject"));
            return Ok(());
        }

        self.state.stats.record_inbound(payload.len());
        metrics::MESSAGES_RECEIVED_TOTAL.inc();
        metrics::PAYLOAD_BYTES_RECEIVED_TOTAL.inc_by(payload.len() as f64);

        let echo = self.echo();
        for subscription in self.state.registry.match_subject(&args.subject) {
            let own = subscription.owner == self.id;
            if own && !echo {
                continue;
            }
            let frame = ServerFrame::Msg(Message {
                subject: args.subject.clone(),
                sid: subscription.sid.clone(),
                reply_to: args.reply_to.clone(),
                payload: payload.clone(),
            });
            if own {
                self.send_message(frame);
                self.record_delivery(payload.len());
            } else if self.state.deliver(subscription.owner, frame) == Delivery::Queued {
                self.record_delivery(payload.len());
            }
        }

        if self.verbose() {
            self.send_message(ServerFrame::Ok);
        }
        Ok(())
    }
}
