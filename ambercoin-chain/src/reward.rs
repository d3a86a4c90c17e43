use ambercoin_config::ConsensusConfig;

/// `floor((initial / 2^floor(height/halving)) * 10^digits) / 10^digits`.
/// Monotonically non-increasing in `height`.
pub fn get_reward(params: &ConsensusConfig, height: u64) -> f64 {
    let halvings = height / params.halving_frequency;
    let scale = 10f64.powi(params.significant_digits as i32);
    if halvings >= 64 {
        return 0.0;
    }
    let reward = params.initial_coins_per_block / 2f64.powi(halvings as i32);
    (reward * scale).floor() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConsensusConfig {
        ConsensusConfig {
            initial_coins_per_block: 50.0,
            halving_frequency: 210_000,
            max_transactions_per_block: 1_000,
            minimum_hash_difficulty: 4,
            target_time_per_block: 600,
            difficulty_adjustment_span: 2_016,
            significant_digits: 8,
            short_chain_tolerance: 10,
        }
    }

    #[test]
    fn halving_schedule_matches_worked_example() {
        let p = params();
        assert_eq!(get_reward(&p, 0), 50.0);
        assert_eq!(get_reward(&p, 209_999), 50.0);
        assert_eq!(get_reward(&p, 210_000), 25.0);
        assert_eq!(get_reward(&p, 420_000), 12.5);
        assert_eq!(get_reward(&p, 6_510_000), 0.000_000_02);
        assert_eq!(get_reward(&p, 6_930_000), 0.0);
    }

    #[test]
    fn reward_is_monotonically_non_increasing() {
        let p = params();
        assert!(get_reward(&p, 0) >= get_reward(&p, 210_000));
        assert!(get_reward(&p, 210_000) >= get_reward(&p, 420_000));
    }
}
