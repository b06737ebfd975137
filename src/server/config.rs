//! Gateway configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::core::{
    ALL_PROFILES_MASK, DEFAULT_ENVELOPE_NAMESPACE, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_DATAGRAM_SIZE,
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_SESSIONS, DEFAULT_PORT, DEFAULT_TELEMETRY_NAMESPACE,
    GatewayError, GatewayResult,
};
use crate::negotiation::{SessionCapabilities, mask_contains};
use crate::privacy::{BudgetPolicy, Mechanism};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,

    /// Profiles implemented locally (bit i set means profile i).
    pub supported_profiles: u32,

    /// Smallest profile the gateway accepts.
    pub minimum_profile: u32,

    /// Pre-agreed profile; sessions start negotiated when set.
    pub default_profile: Option<u32>,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Maximum stream frame body size.
    pub max_frame_size: usize,

    /// Maximum datagram size, tag included.
    pub max_datagram_size: usize,

    /// Topic namespace for noised telemetry.
    pub telemetry_namespace: String,

    /// Topic namespace for forwarded envelopes.
    pub envelope_namespace: String,

    /// Republish accepted envelopes to the broker.
    pub forward_envelopes: bool,

    /// Noise mechanism for telemetry.
    pub mechanism: Mechanism,

    /// Idle timeout for QUIC connections.
    pub idle_timeout: Duration,

    /// Per-topic privacy budgets.
    pub budget_policy: BudgetPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            supported_profiles: ALL_PROFILES_MASK,
            minimum_profile: 0,
            default_profile: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            telemetry_namespace: DEFAULT_TELEMETRY_NAMESPACE.to_string(),
            envelope_namespace: DEFAULT_ENVELOPE_NAMESPACE.to_string(),
            forward_envelopes: false,
            mechanism: Mechanism::Laplace,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            budget_policy: BudgetPolicy::default(),
        }
    }
}

impl GatewayConfig {
    /// Local capabilities offered during negotiation.
    pub fn local_capabilities(&self) -> SessionCapabilities {
        SessionCapabilities::new(self.supported_profiles & ALL_PROFILES_MASK, self.minimum_profile)
    }

    /// Check the configuration for contradictions.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.supported_profiles & ALL_PROFILES_MASK == 0 {
            return Err(GatewayError::Config(format!(
                "supported profile mask 0b{:b} has no usable profile",
                self.supported_profiles
            )));
        }
        if let Some(profile) = self.default_profile {
            if !mask_contains(self.supported_profiles, profile) {
                return Err(GatewayError::Config(format!(
                    "default profile {profile} is not in the supported mask"
                )));
            }
            if profile < self.minimum_profile {
                return Err(GatewayError::Config(format!(
                    "default profile {profile} is below the minimum {}",
                    self.minimum_profile
                )));
            }
        }
        if self.max_sessions == 0 {
            return Err(GatewayError::Config("max_sessions must be positive".into()));
        }
        self.budget_policy.validate()?;
        self.budget_policy.check_mechanism(self.mechanism)?;
        Ok(())
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the locally supported profile mask.
    pub fn supported_profiles(mut self, mask: u32) -> Self {
        self.config.supported_profiles = mask;
        self
    }

    /// Set the local minimum profile.
    pub fn minimum_profile(mut self, minimum: u32) -> Self {
        self.config.minimum_profile = minimum;
        self
    }

    /// Skip negotiation and use `profile` for every session.
    pub fn default_profile(mut self, profile: Option<u32>) -> Self {
        self.config.default_profile = profile;
        self
    }

    /// Set the maximum number of concurrent sessions.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    /// Set the maximum stream frame size.
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.config.max_frame_size = max;
        self
    }

    /// Set the maximum datagram size.
    pub fn max_datagram_size(mut self, max: usize) -> Self {
        self.config.max_datagram_size = max;
        self
    }

    /// Set the telemetry topic namespace.
    pub fn telemetry_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.telemetry_namespace = namespace.into();
        self
    }

    /// Set the envelope topic namespace.
    pub fn envelope_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.envelope_namespace = namespace.into();
        self
    }

    /// Enable or disable envelope forwarding.
    pub fn forward_envelopes(mut self, enabled: bool) -> Self {
        self.config.forward_envelopes = enabled;
        self
    }

    /// Set the noise mechanism.
    pub fn mechanism(mut self, mechanism: Mechanism) -> Self {
        self.config.mechanism = mechanism;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the budget policy.
    pub fn budget_policy(mut self, policy: BudgetPolicy) -> Self {
        self.config.budget_policy = policy;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> GatewayResult<GatewayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
