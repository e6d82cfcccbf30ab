//! Construction-time configuration for topology-aware schedules.
//!
//! Everything the planner needs is carried explicitly in [`TapConfig`]:
//! processes per node, the rank-ordering scheme of the job launcher, and the
//! message-size thresholds that decide how inter-node traffic is split.
//! Thresholds are compared against element counts, not bytes.

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tap_error::TapError;

/// How the launcher places consecutive global ranks onto nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankOrdering {
    /// Round-robin: rank `p` lives on node `p % num_nodes`.
    Cyclic,
    /// Contiguous: rank `p` lives on node `p / ppn`.
    #[default]
    Block,
    /// Round-robin, reversing direction on every other row of nodes.
    Alternating,
}

impl RankOrdering {
    /// Decode the integer codes used by older launch scripts
    /// (0 = cyclic, 1 = block, 2 = alternating).
    pub fn from_code(code: i32) -> Result<Self, TapError> {
        match code {
            0 => Ok(RankOrdering::Cyclic),
            1 => Ok(RankOrdering::Block),
            2 => Ok(RankOrdering::Alternating),
            other => Err(TapError::UnsupportedOrdering(other.to_string())),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            RankOrdering::Cyclic => 0,
            RankOrdering::Block => 1,
            RankOrdering::Alternating => 2,
        }
    }
}

impl FromStr for RankOrdering {
    type Err = TapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i32>() {
            return RankOrdering::from_code(code);
        }
        match s.to_ascii_lowercase().as_str() {
            "cyclic" | "round-robin" => Ok(RankOrdering::Cyclic),
            "block" | "smp" => Ok(RankOrdering::Block),
            "alternating" => Ok(RankOrdering::Alternating),
            _ => Err(TapError::UnsupportedOrdering(s.to_string())),
        }
    }
}

impl fmt::Display for RankOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RankOrdering::Cyclic => "cyclic",
            RankOrdering::Block => "block",
            RankOrdering::Alternating => "alternating",
        };
        f.write_str(name)
    }
}

/// Which phases carry inter-node data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TapVariant {
    /// Gather on the sending node (S), one aggregated inter-node exchange,
    /// redistribute on the receiving node (R).
    #[default]
    ThreeStep,
    /// No S phase: every owner sends its own values to the rank with the same
    /// local index on the requesting node, which redistributes them (R).
    TwoStep,
}

impl FromStr for TapVariant {
    type Err = TapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "3" | "three-step" => Ok(TapVariant::ThreeStep),
            "2" | "two-step" => Ok(TapVariant::TwoStep),
            other => Err(TapError::InvalidConfig(format!(
                "unknown schedule variant `{other}`"
            ))),
        }
    }
}

impl fmt::Display for TapVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TapVariant::ThreeStep => "three-step",
            TapVariant::TwoStep => "two-step",
        })
    }
}

/// Planner configuration. Supplied by the caller; nothing is discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Processes per node.
    pub ppn: usize,
    /// Rank placement scheme.
    pub ordering: RankOrdering,
    /// Aggregate traffic above this is split across up to `ideal_n_comm` ranks.
    pub eager_cutoff: usize,
    /// Aggregate traffic above this is split proportionally when the node
    /// group is not already busy with one remote node per rank.
    pub rendezvous_cutoff: usize,
    /// Replica count used for very large inter-node messages.
    pub ideal_n_comm: usize,
    pub variant: TapVariant,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            ppn: 16,
            ordering: RankOrdering::Block,
            eager_cutoff: 8000,
            rendezvous_cutoff: 500,
            ideal_n_comm: 4,
            variant: TapVariant::ThreeStep,
        }
    }
}

impl TapConfig {
    pub fn with_ppn(mut self, ppn: usize) -> Self {
        self.ppn = ppn;
        self
    }

    pub fn with_ordering(mut self, ordering: RankOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_cutoffs(mut self, eager: usize, rendezvous: usize) -> Self {
        self.eager_cutoff = eager;
        self.rendezvous_cutoff = rendezvous;
        self
    }

    pub fn with_ideal_n_comm(mut self, n: usize) -> Self {
        self.ideal_n_comm = n;
        self
    }

    pub fn with_variant(mut self, variant: TapVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Defaults overridden by `PPN`, `TAP_RANK_ORDERING`, `TAP_EAGER_CUTOFF`,
    /// `TAP_RENDEZVOUS_CUTOFF`, `TAP_IDEAL_N_COMM` and `TAP_VARIANT` when set.
    pub fn from_env() -> Result<Self, TapError> {
        let mut cfg = TapConfig::default();
        if let Some(ppn) = env_usize("PPN")? {
            cfg.ppn = ppn;
        }
        if let Ok(raw) = env::var("TAP_RANK_ORDERING") {
            cfg.ordering = raw.parse()?;
        }
        if let Some(v) = env_usize("TAP_EAGER_CUTOFF")? {
            cfg.eager_cutoff = v;
        }
        if let Some(v) = env_usize("TAP_RENDEZVOUS_CUTOFF")? {
            cfg.rendezvous_cutoff = v;
        }
        if let Some(v) = env_usize("TAP_IDEAL_N_COMM")? {
            cfg.ideal_n_comm = v;
        }
        if let Ok(raw) = env::var("TAP_VARIANT") {
            cfg.variant = raw.parse()?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), TapError> {
        if self.ppn == 0 {
            return Err(TapError::InvalidConfig("ppn must be at least 1".into()));
        }
        if self.ideal_n_comm == 0 {
            return Err(TapError::InvalidConfig(
                "ideal_n_comm must be at least 1".into(),
            ));
        }
        if self.rendezvous_cutoff > self.eager_cutoff {
            return Err(TapError::InvalidConfig(format!(
                "rendezvous cutoff {} exceeds eager cutoff {}",
                self.rendezvous_cutoff, self.eager_cutoff
            )));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Result<Option<usize>, TapError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| TapError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
