use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The consensus parameters in §6: identical values across every node on
/// the network. Changing one of these amounts to a fork.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub initial_coins_per_block: f64,
    pub halving_frequency: u64,
    pub max_transactions_per_block: usize,
    pub minimum_hash_difficulty: u32,
    pub target_time_per_block: u64,
    pub difficulty_adjustment_span: u64,
    pub significant_digits: u32,
    pub short_chain_tolerance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub rest_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub version: String,
    pub listen_addr: String,
    pub seed_nodes: Vec<String>,
    pub full_node_port: u16,
    pub min_peers: usize,
    pub max_peers: usize,
    pub downtime_threshold: u32,
}

/// Controls the local mining worker. `reward_address` is the hex
/// compressed pubkey that collects coinbase rewards; mining is skipped
/// entirely when it's unset, so a node can run sync-and-serve-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    pub enabled: bool,
    pub reward_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub db: DbConfig,
    pub api: ApiConfig,
    pub consensus: ConsensusConfig,
    pub network: NetworkConfig,
    pub mining: MiningConfig,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("AMBERCOIN").separator("__"));
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// A starter configuration with the reference network's parameters,
    /// written out by `ambercoin-cli init`.
    pub fn example() -> Self {
        Self {
            db: DbConfig {
                path: "ambercoin.sqlite3".into(),
                pool_size: 5,
            },
            api: ApiConfig {
                rest_addr: "0.0.0.0:8080".into(),
            },
            consensus: ConsensusConfig {
                initial_coins_per_block: 50.0,
                halving_frequency: 210_000,
                max_transactions_per_block: 1_000,
                minimum_hash_difficulty: 4,
                target_time_per_block: 600,
                difficulty_adjustment_span: 2_016,
                significant_digits: 8,
                short_chain_tolerance: 10,
            },
            network: NetworkConfig {
                version: "ambercoin/1".into(),
                listen_addr: "/ip4/0.0.0.0/tcp/7000".into(),
                seed_nodes: vec![],
                full_node_port: 7000,
                min_peers: 3,
                max_peers: 125,
                downtime_threshold: 5,
            },
            mining: MiningConfig {
                enabled: false,
                reward_address: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_round_trips_through_toml() {
        let cfg = NodeConfig::example();
        let text = toml::to_string(&cfg).unwrap();
        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.consensus.halving_frequency, cfg.consensus.halving_frequency);
        assert_eq!(parsed.network.max_peers, cfg.network.max_peers);
    }
}
