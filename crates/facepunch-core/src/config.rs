use serde::{Deserialize, Serialize};

use crate::attendance::AttendancePolicy;
use crate::liveness::LivenessConfig;
use crate::matcher::MatchConfig;
use crate::quality::QualityConfig;

/// Every tunable threshold of the engines, grouped per engine.
///
/// Missing sections and fields fall back to their defaults, so a partial
/// TOML table is enough to override a single value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matching: MatchConfig,
    pub liveness: LivenessConfig,
    pub attendance: AttendancePolicy,
    pub quality: QualityConfig,
}
