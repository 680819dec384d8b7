//! Simulation configuration
//!
//! Loaded from RON. Every field has a default, so a partial file (or an
//! empty `()`) is a valid configuration.
//!
//! ```ron
//! (
//!     num_ticks: 16,
//!     clocks: [(tick: 0, dt: 0.25), (tick: 1, dt: 1e-3)],
//!     trace: (enabled: true, max_events: 10000),
//! )
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound on the number of ticks a scheduler may own
pub const MAX_TICKS: usize = 1024;

/// A clock preset applied when the scheduler is built
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockPreset {
    pub tick: usize,
    pub dt: f64,
}

/// Trace journal settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,
    /// Oldest events are dropped beyond this count; `0` keeps everything
    pub max_events: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_events: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of ticks, clamped to `[1, MAX_TICKS]`
    pub num_ticks: usize,
    /// Relative tolerance when deciding whether a step fits in a run
    pub time_tolerance: f64,
    pub clocks: Vec<ClockPreset>,
    pub trace: TraceConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_ticks: 32,
            time_tolerance: 1e-9,
            clocks: Vec::new(),
            trace: TraceConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: SimConfig = ron::from_str(text)?;
        config.validated()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    pub fn to_ron_string(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// Builder-style clock preset
    pub fn with_clock(mut self, tick: usize, dt: f64) -> Self {
        self.clocks.push(ClockPreset { tick, dt });
        self
    }

    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace.enabled = enabled;
        self
    }

    /// Clamp the tick count and reject unusable values
    pub fn validated(mut self) -> Result<Self> {
        self.num_ticks = self.num_ticks.clamp(1, MAX_TICKS);
        if !(self.time_tolerance.is_finite() && self.time_tolerance >= 0.0) {
            return Err(Error::Config(format!(
                "time_tolerance must be finite and non-negative, got {}",
                self.time_tolerance
            )));
        }
        for preset in &self.clocks {
            if preset.tick >= self.num_ticks {
                return Err(Error::Config(format!(
                    "clock preset for tick {} but only {} ticks",
                    preset.tick, self.num_ticks
                )));
            }
            if !(preset.dt.is_finite() && preset.dt > 0.0) {
                return Err(Error::Config(format!(
                    "clock preset for tick {} has dt {}",
                    preset.tick, preset.dt
                )));
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.num_ticks, 32);
        assert_eq!(config.time_tolerance, 1e-9);
        assert!(!config.trace.enabled);
        assert_eq!(SimConfig::from_ron_str("()").unwrap(), config);
    }

    #[test]
    fn test_partial_ron() {
        let config = SimConfig::from_ron_str(
            "(num_ticks: 4, clocks: [(tick: 1, dt: 0.5)], trace: (enabled: true))",
        )
        .unwrap();
        assert_eq!(config.num_ticks, 4);
        assert_eq!(config.clocks, vec![ClockPreset { tick: 1, dt: 0.5 }]);
        assert!(config.trace.enabled);
        assert_eq!(config.trace.max_events, 0);
    }

    #[test]
    fn test_clamp_and_rejects() {
        assert_eq!(SimConfig::from_ron_str("(num_ticks: 0)").unwrap().num_ticks, 1);
        assert_eq!(
            SimConfig::from_ron_str("(num_ticks: 99999)").unwrap().num_ticks,
            MAX_TICKS
        );
        assert!(matches!(
            SimConfig::from_ron_str("(num_ticks: 2, clocks: [(tick: 5, dt: 1.0)])"),
            Err(Error::Config(_))
        ));
        assert!(SimConfig::from_ron_str("(clocks: [(tick: 0, dt: -1.0)])").is_err());
        assert!(SimConfig::from_ron_str("(num_ticks: \"many\")").is_err());
    }

    #[test]
    fn test_ron_round_trip() {
        let config = SimConfig::default().with_clock(0, 0.25).with_trace(true);
        let text = config.to_ron_string().unwrap();
        assert_eq!(SimConfig::from_ron_str(&text).unwrap(), config);
    }

    #[test]
    fn test_from_missing_file() {
        assert!(matches!(
            SimConfig::from_file("/definitely/not/here.ron"),
            Err(Error::Config(_))
        ));
    }
}
