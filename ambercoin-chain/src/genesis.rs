use ambercoin_core::{Block, Transaction, TxType, NATIVE_ASSET_ID, PROTOCOL_ADDRESS};

use crate::error::Result;

/// Fixed genesis parameters. Every node that boots against an empty store
/// synthesizes exactly this block; any block it later observes at height 0
/// must hash identically, or startup is fatal.
const GENESIS_TIMESTAMP: u32 = 1_231_006_505;
const GENESIS_ALLOCATION_ADDRESS: &str =
    "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f";
const GENESIS_ALLOCATION_AMOUNT: f64 = 50.0;

pub fn build_genesis_block() -> Result<Block> {
    let mut allocation = Transaction::new(
        PROTOCOL_ADDRESS,
        GENESIS_ALLOCATION_ADDRESS,
        GENESIS_ALLOCATION_AMOUNT,
        0.0,
        GENESIS_TIMESTAMP as i64,
        TxType::Genesis,
        NATIVE_ASSET_ID,
        "ambercoin genesis block",
        "",
    );
    allocation.recompute_hash();
    Ok(Block::new(0, vec![allocation], String::new(), Some(GENESIS_TIMESTAMP), 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let a = build_genesis_block().unwrap();
        let b = build_genesis_block().unwrap();
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }
}
