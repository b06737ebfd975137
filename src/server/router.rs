//! Dual-transport router.
//!
//! One task per connection. Streams carry framed envelopes and get a reply
//! per envelope; datagrams carry tagged telemetry that is charged, noised
//! and published. Stream decode errors close the connection; datagram
//! errors drop the datagram.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use super::{GatewayConfig, GatewayMetrics, LedgerSettings, Session, SessionId, SessionRegistry};
use crate::broker::{Broker, encode_payload, topic_for};
use crate::core::{
    CLOSE_DECODE_ERROR, CLOSE_NORMAL, CLOSE_REFUSED, ErrorCode, GatewayError, GatewayResult,
    PROTOCOL_VERSION,
};
use crate::envelope::{self, CapabilityMsg, Envelope, ErrorMessage, ProfileNegotiation};
use crate::negotiation::{NegotiatedProfile, SessionCapabilities, validate_envelope};
use crate::privacy::privatize_telemetry;
use crate::transport::{
    FrameReader, FrameWriter, InboundDatagram, PeerConnection, TransportError, decode_datagram,
};

/// Fresh IDs tried before a colliding session is refused.
const SESSION_ID_ATTEMPTS: usize = 4;

/// Errors routing an envelope within a session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Data received before the session profile was fixed.
    #[error("session not negotiated")]
    NotNegotiated,

    /// Envelope version not understood.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),

    /// Session limit reached.
    #[error("session limit of {0} reached")]
    TooManySessions(usize),

    /// A live session already holds this ID.
    #[error("session id {0} already registered")]
    SessionIdCollision(SessionId),
}

impl RouterError {
    /// Wire code reported to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            RouterError::NotNegotiated => ErrorCode::NotNegotiated,
            RouterError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            RouterError::TooManySessions(_) | RouterError::SessionIdCollision(_) => {
                ErrorCode::MalformedRequest
            }
        }
    }
}

/// What happened to an inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// Noised and handed to the broker.
    Published,
    /// Undecodable, oversize or unknown tag.
    Malformed,
    /// Session not negotiated yet.
    NotNegotiated,
    /// Profile failed validation.
    Rejected(ErrorCode),
    /// Privacy budget exhausted.
    BudgetExhausted,
}

impl DatagramOutcome {
    /// Metric label for a dropped datagram; `None` when it was published.
    pub fn drop_reason(self) -> Option<&'static str> {
        match self {
            DatagramOutcome::Published => None,
            DatagramOutcome::Malformed => Some("malformed"),
            DatagramOutcome::NotNegotiated => Some("not_negotiated"),
            DatagramOutcome::Rejected(_) => Some("rejected"),
            DatagramOutcome::BudgetExhausted => Some("budget_exhausted"),
        }
    }
}

/// Dispatches connections, envelopes and datagrams.
#[derive(Clone)]
pub struct Router {
    config: Arc<GatewayConfig>,
    local: SessionCapabilities,
    broker: Arc<dyn Broker>,
    registry: SessionRegistry,
    metrics: GatewayMetrics,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("local", &self.local)
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Create a router publishing to `broker` and counting into `metrics`.
    pub fn new(config: GatewayConfig, broker: Arc<dyn Broker>, metrics: GatewayMetrics) -> Self {
        let local = config.local_capabilities();
        let registry = SessionRegistry::new(config.max_sessions);
        Self {
            config: Arc::new(config),
            local,
            broker,
            registry,
            metrics,
        }
    }

    /// Gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Live sessions.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Router counters.
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    fn ledger(&self) -> LedgerSettings<'_> {
        LedgerSettings {
            policy: &self.config.budget_policy,
            namespace: &self.config.telemetry_namespace,
            mechanism: self.config.mechanism,
        }
    }

    /// Create and register a session for a new connection.
    pub fn open_session(&self, remote: impl Into<String>) -> GatewayResult<Arc<Session>> {
        let remote = remote.into();
        let mut attempt = 1;
        loop {
            let session = Arc::new(Session::new(SessionId::generate(), remote.clone()));
            if let Some(profile) = self.config.default_profile {
                session.adopt_default(NegotiatedProfile::new(profile)?, self.ledger())?;
            }
            match self.registry.insert(session.clone()) {
                Ok(()) => return Ok(session),
                Err(RouterError::SessionIdCollision(id)) if attempt < SESSION_ID_ATTEMPTS => {
                    debug!(%id, attempt, "session id collision, regenerating");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Serve one connection until it closes.
    ///
    /// Returns the fatal transport error if one ended the connection.
    pub async fn serve_connection<C: PeerConnection>(&self, conn: Arc<C>) -> GatewayResult<()> {
        let remote = conn.remote_label();
        let session = match self.open_session(remote.clone()) {
            Ok(session) => session,
            Err(e) => {
                warn!(%remote, error = %e, "refusing connection");
                conn.close(CLOSE_REFUSED, &e.to_string());
                return Err(e);
            }
        };

        self.metrics.session_opened();
        let span = info_span!("session", id = %session.id(), %remote);
        let result = self
            .drive(conn.as_ref(), &session)
            .instrument(span.clone())
            .await;

        session.close();
        self.registry.remove(session.id());
        self.metrics.session_closed();
        span.in_scope(|| info!("session closed"));
        result.map_err(GatewayError::from)
    }

    async fn drive<C: PeerConnection>(
        &self,
        conn: &C,
        session: &Arc<Session>,
    ) -> Result<(), TransportError> {
        info!("session opened");
        let mut streams: JoinSet<Result<(), TransportError>> = JoinSet::new();
        let mut datagrams_open = true;

        let result = loop {
            tokio::select! {
                accepted = conn.accept_stream() => match accepted {
                    Ok(Some((send, recv))) => {
                        let router = self.clone();
                        let session = session.clone();
                        streams.spawn(
                            async move { router.serve_stream(&session, send, recv).await }
                                .in_current_span(),
                        );
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
                datagram = conn.read_datagram(), if datagrams_open => match datagram {
                    Ok(Some(bytes)) => {
                        self.handle_datagram(session, &bytes);
                    }
                    Ok(None) => datagrams_open = false,
                    Err(e) => {
                        debug!(error = %e, "datagram receive ended");
                        datagrams_open = false;
                    }
                },
                Some(joined) = streams.join_next() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if e.is_fatal() => {
                        warn!(error = %e, "closing connection");
                        conn.close(CLOSE_DECODE_ERROR, &e.to_string());
                        break Err(e);
                    }
                    Ok(Err(e)) => debug!(error = %e, "stream ended"),
                    Err(e) => warn!(error = %e, "stream task failed"),
                },
            }
        };

        streams.abort_all();
        if result.is_ok() {
            conn.close(CLOSE_NORMAL, "done");
        }
        result
    }

    /// Read envelopes from one stream and answer each on the same stream.
    pub async fn serve_stream<W, R>(
        &self,
        session: &Session,
        send: W,
        recv: R,
    ) -> Result<(), TransportError>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        let mut reader = FrameReader::new(recv, self.config.max_frame_size);
        let mut writer = FrameWriter::new(send, self.config.max_frame_size);

        while let Some(env) = reader.next_envelope().await? {
            let reply = self.handle_envelope(session, &env);
            writer.send_envelope(&reply).await?;
        }
        Ok(())
    }

    /// Process one envelope and build its reply.
    pub fn handle_envelope(&self, session: &Session, env: &Envelope) -> Envelope {
        self.metrics.envelope_received();
        let reply = self.route_envelope(session, env);
        self.metrics.envelope_replied(reply.outcome());
        reply
    }

    fn route_envelope(&self, session: &Session, env: &Envelope) -> Envelope {
        let current = session.profile().map_or(0, NegotiatedProfile::get);
        debug!(trace_id = %env.trace_id, profile = env.profile, ops = env.context_delta.len(), "envelope");

        if env.version != PROTOCOL_VERSION {
            let err = RouterError::UnsupportedVersion(env.version);
            return env.reply(current, ErrorMessage::new(err.code(), err.to_string()));
        }

        if let Some(request) = env.negotiate_request() {
            return self.handle_negotiation(session, env, request);
        }

        let Some(profile) = session.profile() else {
            let err = RouterError::NotNegotiated;
            return env.reply(0, ErrorMessage::new(err.code(), err.to_string()));
        };

        if let Err(e) = validate_envelope(env.profile, profile.get(), self.local.supported) {
            debug!(error = %e, "envelope rejected");
            return env.reply(profile.get(), ErrorMessage::new(e.code(), e.to_string()));
        }

        session.mark_active();
        let rejected = session.apply_delta(&env.context_delta);

        if self.config.forward_envelopes {
            let key = if env.trace_id.is_empty() {
                session.topic_key().unwrap_or_else(|| session.id().to_string())
            } else {
                env.trace_id.clone()
            };
            let topic = topic_for(&self.config.envelope_namespace, &key);
            self.publish(topic, encode_payload(&envelope::encode(env)));
        }

        let outcome = match rejected.first() {
            None => ErrorMessage::ok(),
            Some((_, first)) => {
                debug!(rejected = rejected.len(), error = %first, "patch ops rejected");
                let mut msg = ErrorMessage::new(first.code(), first.to_string());
                msg.rejected_ops = rejected.iter().map(|(i, _)| *i as u32).collect();
                msg
            }
        };
        env.reply(profile.get(), outcome)
    }

    fn handle_negotiation(
        &self,
        session: &Session,
        env: &Envelope,
        request: ProfileNegotiation,
    ) -> Envelope {
        let peer = SessionCapabilities::from(request);
        match session.negotiate(&peer, &self.local, &env.trace_id, self.ledger()) {
            Ok(profile) => {
                let mut reply = env.reply(profile.get(), ErrorMessage::ok());
                reply.capability_msg = Some(CapabilityMsg::Negotiate(self.local.into()));
                reply
            }
            Err(e) => {
                info!(error = %e, supported = peer.supported, minimum = peer.minimum, "negotiation failed");
                let current = session.profile().map_or(0, NegotiatedProfile::get);
                env.reply(current, ErrorMessage::new(e.code(), e.to_string()))
            }
        }
    }

    /// Process one datagram. Every failure is a silent drop.
    pub fn handle_datagram(&self, session: &Session, data: &[u8]) -> DatagramOutcome {
        let outcome = self.route_datagram(session, data);
        self.metrics.datagram(outcome);
        outcome
    }

    fn route_datagram(&self, session: &Session, data: &[u8]) -> DatagramOutcome {
        let mut td = match decode_datagram(data, self.config.max_datagram_size) {
            Ok(InboundDatagram::Telemetry(td)) => td,
            Err(e) => {
                debug!(error = %e, "datagram dropped");
                return DatagramOutcome::Malformed;
            }
        };

        let Some(profile) = session.profile() else {
            debug!("telemetry before negotiation dropped");
            return DatagramOutcome::NotNegotiated;
        };
        if let Err(e) = validate_envelope(td.profile, profile.get(), self.local.supported) {
            debug!(error = %e, "telemetry dropped");
            return DatagramOutcome::Rejected(e.code());
        }

        let calibration = match session.charge_sample() {
            Ok(calibration) => calibration,
            Err(e) => {
                warn!(error = %e, "telemetry dropped");
                return DatagramOutcome::BudgetExhausted;
            }
        };
        session.mark_active();

        privatize_telemetry(&mut td, &calibration, &mut rand::thread_rng());

        let key = session.topic_key().unwrap_or_else(|| session.id().to_string());
        let topic = topic_for(&self.config.telemetry_namespace, &key);
        self.publish(topic, encode_payload(&envelope::encode(&td)));
        DatagramOutcome::Published
    }

    fn publish(&self, topic: String, payload: Bytes) {
        let broker = self.broker.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(
            async move {
                if let Err(e) = broker.publish(&topic, payload).await {
                    metrics.broker_failed();
                    warn!(%topic, error = %e, "publish failed, dropping");
                }
            }
            .in_current_span(),
        );
    }
}
