//! Server session management.
//!
//! Handles per-connection session state including:
//! - Session ID management
//! - Profile negotiation (set once)
//! - The privacy ledger and context document, each behind its own lock
//!
//! Locks are `parking_lot` mutexes and are never held across an await.
//! When both are needed, `state` is taken before `budget`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::info;

use super::RouterError;
use crate::broker::topic_for;
use crate::context::{ContextDocument, MergeError};
use crate::core::GatewayResult;
use crate::envelope::PatchOp;
use crate::negotiation::{NegotiatedProfile, NegotiationError, SessionCapabilities, negotiate};
use crate::privacy::{BudgetPolicy, Calibration, Mechanism, PrivacyBudget};

/// Session ID (48-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; 6]);

impl SessionId {
    /// Create a new session ID from bytes.
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Generate a random session ID.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Get the session ID as bytes.
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Convert to a u64 (zero-padded).
    pub fn to_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf[..6].copy_from_slice(&self.0);
        u64::from_le_bytes(buf)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:012x}", self.to_u64())
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No profile yet; only negotiation envelopes are accepted.
    Unnegotiated,
    /// Profile fixed, no data accepted yet.
    Negotiated,
    /// Data has flowed.
    Active,
    /// Connection gone.
    Closed,
}

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    topic_key: Option<String>,
    epsilon_per_sample: f64,
    last_activity: Instant,
}

/// Budget-related settings used when a session's ledger is opened.
#[derive(Debug, Clone, Copy)]
pub struct LedgerSettings<'a> {
    /// Per-topic budgets.
    pub policy: &'a BudgetPolicy,
    /// Namespace the topic key is looked up under.
    pub namespace: &'a str,
    /// Noise mechanism.
    pub mechanism: Mechanism,
}

/// Per-connection session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    remote: String,
    created_at: Instant,
    profile: OnceLock<NegotiatedProfile>,
    state: Mutex<SessionState>,
    budget: Mutex<Option<PrivacyBudget>>,
    context: Mutex<ContextDocument>,
}

impl Session {
    /// Create an unnegotiated session.
    pub fn new(id: SessionId, remote: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            remote: remote.into(),
            created_at: now,
            profile: OnceLock::new(),
            state: Mutex::new(SessionState {
                phase: SessionPhase::Unnegotiated,
                topic_key: None,
                epsilon_per_sample: 0.0,
                last_activity: now,
            }),
            budget: Mutex::new(None),
            context: Mutex::new(ContextDocument::new()),
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Peer label.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Negotiated profile, once fixed.
    pub fn profile(&self) -> Option<NegotiatedProfile> {
        self.profile.get().copied()
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    /// Topic key adopted at negotiation.
    pub fn topic_key(&self) -> Option<String> {
        self.state.lock().topic_key.clone()
    }

    /// Fix `profile` without negotiation, keyed by the session id.
    pub fn adopt_default(
        &self,
        profile: NegotiatedProfile,
        ledger: LedgerSettings<'_>,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock();
        if let Some(fixed) = self.profile() {
            return Err(NegotiationError::AlreadyNegotiated(fixed.get()).into());
        }
        self.fix_profile(&mut state, profile, self.id.to_string(), ledger)?;
        Ok(())
    }

    /// Negotiate with the peer's capabilities.
    ///
    /// The first success fixes the profile and opens the ledger. Repeating an
    /// agreeing negotiation returns the fixed profile; a disagreeing one fails.
    /// A failed first attempt leaves the session unnegotiated.
    pub fn negotiate(
        &self,
        peer: &SessionCapabilities,
        local: &SessionCapabilities,
        trace_id: &str,
        ledger: LedgerSettings<'_>,
    ) -> GatewayResult<NegotiatedProfile> {
        let mut state = self.state.lock();
        let result = negotiate(peer, local);

        if let Some(fixed) = self.profile() {
            return match result {
                Ok(profile) if profile == fixed => Ok(fixed),
                _ => Err(NegotiationError::AlreadyNegotiated(fixed.get()).into()),
            };
        }

        let profile = result?;
        let key = if trace_id.is_empty() {
            self.id.to_string()
        } else {
            trace_id.to_string()
        };
        self.fix_profile(&mut state, profile, key, ledger)?;
        Ok(profile)
    }

    fn fix_profile(
        &self,
        state: &mut SessionState,
        profile: NegotiatedProfile,
        key: String,
        ledger: LedgerSettings<'_>,
    ) -> GatewayResult<()> {
        let spec = ledger.policy.lookup(&topic_for(ledger.namespace, &key));
        let budget = PrivacyBudget::from_spec(&spec, ledger.mechanism)?;

        *self.budget.lock() = Some(budget);
        // Only reachable while unset: both callers hold the state lock.
        let _ = self.profile.set(profile);
        state.phase = SessionPhase::Negotiated;
        state.epsilon_per_sample = spec.epsilon_per_sample;
        state.last_activity = Instant::now();

        info!(session = %self.id, %profile, topic_key = %key, "profile negotiated");
        state.topic_key = Some(key);
        Ok(())
    }

    /// Move from `Negotiated` to `Active`.
    pub fn mark_active(&self) {
        let mut state = self.state.lock();
        if state.phase == SessionPhase::Negotiated {
            state.phase = SessionPhase::Active;
        }
        state.last_activity = Instant::now();
    }

    /// Mark the session closed.
    pub fn close(&self) {
        self.state.lock().phase = SessionPhase::Closed;
    }

    /// Charge one telemetry sample against the ledger.
    pub fn charge_sample(&self) -> GatewayResult<Calibration> {
        let epsilon = self.state.lock().epsilon_per_sample;
        let mut budget = self.budget.lock();
        let ledger = budget.as_mut().ok_or(RouterError::NotNegotiated)?;
        Ok(ledger.charge(epsilon)?)
    }

    /// Epsilon spent so far.
    pub fn epsilon_spent(&self) -> Option<f64> {
        self.budget.lock().as_ref().map(PrivacyBudget::epsilon_spent)
    }

    /// Apply patch operations in order; returns rejected indices and errors.
    pub fn apply_delta(&self, ops: &[PatchOp]) -> Vec<(usize, MergeError)> {
        self.context.lock().apply_all(ops)
    }

    /// Copy of the context document.
    pub fn context_snapshot(&self) -> ContextDocument {
        self.context.lock().clone()
    }

    /// Time since last activity.
    pub fn idle_time(&self) -> Duration {
        self.state.lock().last_activity.elapsed()
    }

    /// Session age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Live sessions keyed by id.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    /// Register a session.
    ///
    /// Refuses once the limit is reached, and never replaces a live session
    /// that holds the same ID.
    pub fn insert(&self, session: Arc<Session>) -> Result<(), RouterError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(RouterError::TooManySessions(self.max_sessions));
        }
        match sessions.entry(session.id()) {
            Entry::Occupied(_) => Err(RouterError::SessionIdCollision(session.id())),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Remove a session.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.write().remove(&id)
    }

    /// Look up a session.
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
