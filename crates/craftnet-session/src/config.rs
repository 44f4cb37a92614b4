//! Tunable knobs for session behavior.

use std::time::Duration;

/// How strictly a soft check (protocol version skew, identity
/// verification) is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnforcementPolicy {
    /// Admit the peer and surface a warning.
    #[default]
    Warn,
    /// Refuse the peer.
    Reject,
}

/// Configuration for one session.
///
/// Tests shrink the timeouts; the defaults are tuned for real networks.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a direct dial may take before the relay path wins.
    pub direct_open_timeout: Duration,
    /// Grace after relay registration before traffic is expected.
    pub relay_register_wait: Duration,
    /// Interval between lobby presence reports while hosting publicly.
    pub lobby_heartbeat: Duration,
    /// How long an orphaned client waits for a migration announcement
    /// before giving up.
    pub migration_signal_wait: Duration,
    /// Delay between queueing an error frame for a rejected peer and
    /// closing its wire, so the frame actually flushes.
    pub error_flush_grace: Duration,
    /// How long a join may wait for the host's welcome.
    pub join_timeout: Duration,
    /// Position fast-path broadcast interval.
    pub position_interval: Duration,
    /// World metadata (time of day, weather) broadcast interval.
    pub world_sync_interval: Duration,
    /// Client ping interval for latency and clock sync.
    pub ping_interval: Duration,
    /// Password required to join, if any.
    pub password: Option<String>,
    /// Protocol version this build speaks.
    pub protocol_version: u32,
    /// What to do about peers speaking a different protocol version.
    pub version_policy: EnforcementPolicy,
    /// What to do when identity verification fails outright. Network
    /// failure of the identity service itself is always soft.
    pub identity_policy: EnforcementPolicy,
    /// Address the host binds for inbound direct dials.
    pub direct_bind_addr: String,
}

/// The protocol version this crate speaks natively.
pub const PROTOCOL_VERSION: u32 = 3;

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            direct_open_timeout: Duration::from_secs(5),
            relay_register_wait: Duration::from_secs(2),
            lobby_heartbeat: Duration::from_secs(20),
            migration_signal_wait: Duration::from_secs(10),
            error_flush_grace: Duration::from_millis(100),
            join_timeout: Duration::from_secs(10),
            position_interval: Duration::from_millis(50),
            world_sync_interval: Duration::from_secs(10),
            ping_interval: Duration::from_secs(2),
            password: None,
            protocol_version: PROTOCOL_VERSION,
            version_policy: EnforcementPolicy::default(),
            identity_policy: EnforcementPolicy::default(),
            direct_bind_addr: "0.0.0.0:0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_bounds() {
        let config = SessionConfig::default();
        assert_eq!(config.direct_open_timeout, Duration::from_secs(5));
        assert_eq!(config.relay_register_wait, Duration::from_secs(2));
        assert_eq!(config.lobby_heartbeat, Duration::from_secs(20));
        assert_eq!(config.migration_signal_wait, Duration::from_secs(10));
        assert_eq!(config.error_flush_grace, Duration::from_millis(100));
        assert_eq!(config.version_policy, EnforcementPolicy::Warn);
        assert_eq!(config.identity_policy, EnforcementPolicy::Warn);
    }
}
