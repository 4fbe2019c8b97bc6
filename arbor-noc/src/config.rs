// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Configuration of a tree network.
//!
//! Values are taken from, in increasing order of priority, the defaults, an
//! optional TOML file and `ARBOR_` environment variables:
//!
//! ```toml
//! num_vcs = 2
//! buffer_depth = 4
//! fanout = [2, 4, 0]
//! level_names = ["dram", "glb", "buffer"]
//!
//! [[relays]]
//! destination = 7
//! relay = 1
//! ```

use std::error::Error;
use std::fmt;
use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::flit::NodeId;
use crate::topology::TreeTopology;

const ENV_PREFIX: &str = "ARBOR_";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub destination: NodeId,
    pub relay: NodeId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NocConfig {
    /// Virtual channels per port.
    pub num_vcs: usize,

    /// Flits buffered per virtual channel of each input port.
    pub buffer_depth: usize,

    /// Children of each node, per level. The last entry must be 0.
    pub fanout: Vec<usize>,

    /// Names used for the routers of each level.
    pub level_names: Vec<String>,

    pub relays: Vec<RelayConfig>,

    pub seed: u64,

    /// Stop once this many flits have been delivered to local ports.
    pub drain_threshold: Option<u64>,

    pub clock_mhz: f64,
}

impl Default for NocConfig {
    fn default() -> Self {
        Self {
            num_vcs: 2,
            buffer_depth: 4,
            fanout: vec![2, 4, 0],
            level_names: vec!["dram".to_string(), "glb".to_string(), "buffer".to_string()],
            relays: Vec::new(),
            seed: 0,
            drain_threshold: None,
            clock_mhz: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NocConfigError(pub String);

impl fmt::Display for NocConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid configuration: {}", self.0)
    }
}

impl Error for NocConfigError {}

impl From<figment::Error> for NocConfigError {
    fn from(e: figment::Error) -> Self {
        Self(e.to_string())
    }
}

impl NocConfig {
    fn figment(conf_file: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(conf_file) = conf_file {
            figment = figment.merge(Toml::file(conf_file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load from the defaults, `conf_file` and the environment, then
    /// validate.
    pub fn load(conf_file: Option<&Path>) -> Result<Self, NocConfigError> {
        let config: Self = Self::figment(conf_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NocConfigError> {
        if self.num_vcs == 0 {
            return Err(NocConfigError("num_vcs must be at least 1".to_string()));
        }
        if self.buffer_depth == 0 {
            return Err(NocConfigError(
                "buffer_depth must be at least 1".to_string(),
            ));
        }
        if self.clock_mhz.is_nan() || self.clock_mhz <= 0.0 {
            return Err(NocConfigError(format!(
                "clock_mhz must be positive, got {}",
                self.clock_mhz
            )));
        }

        let num_nodes = TreeTopology::from_fanout(&self.fanout)
            .map_err(|e| NocConfigError(e.0))?
            .num_nodes();
        for relay in &self.relays {
            if relay.destination >= num_nodes || relay.relay >= num_nodes {
                return Err(NocConfigError(format!(
                    "relay {} -> {} is outside the {num_nodes} node tree",
                    relay.destination, relay.relay
                )));
            }
        }

        // Catches anything else the tree itself rejects
        self.topology().map(|_| ())
    }

    /// Build the tree described by this configuration.
    pub fn topology(&self) -> Result<TreeTopology, NocConfigError> {
        let relays: Vec<(NodeId, NodeId)> = self
            .relays
            .iter()
            .map(|r| (r.destination, r.relay))
            .collect();
        let topology = TreeTopology::from_fanout(&self.fanout)
            .and_then(|t| t.with_relays(&relays))
            .map_err(|e| NocConfigError(e.0))?;
        Ok(topology.with_level_names(&self.level_names))
    }
}
