//! Configuration of a session context.

use cubeclash_match::{MatchConfig, SpawnConfig};
use cubeclash_replication::ReplicationConfig;
use cubeclash_session::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::MotionConfig;

/// Everything a session context needs to know up front.
///
/// All sections are optional when deserialized; missing ones take their
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub session: SessionConfig,
    pub lifecycle: MatchConfig,
    pub spawn: SpawnConfig,
    pub replication: ReplicationConfig,
    pub motion: MotionConfig,

    /// Processing ticks per second. Values below 1 are raised to 1.
    pub tick_rate_hz: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            lifecycle: MatchConfig::default(),
            spawn: SpawnConfig::default(),
            replication: ReplicationConfig::default(),
            motion: MotionConfig::default(),
            tick_rate_hz: 30,
        }
    }
}
