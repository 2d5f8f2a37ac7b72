use std::sync::{Mutex, PoisonError};
use std::time::{Duration, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use snowflake::SnowflakeIdGenerator;

// 2026-01-01T00:00:00Z
const SNOWFLAKE_EPOCH: u64 = 1767225600000;

static GENERATOR: OnceCell<Mutex<SnowflakeIdGenerator>> = OnceCell::new();

fn new() -> Mutex<SnowflakeIdGenerator> {
    let epoch = UNIX_EPOCH + Duration::from_millis(SNOWFLAKE_EPOCH);
    let machine_id = fastrand::i32(0..32);
    let node_id = fastrand::i32(0..32);
    Mutex::new(SnowflakeIdGenerator::with_epoch(machine_id, node_id, epoch))
}

/// Next id for a ledger row or withdrawal record. Ids from one process are increasing.
pub fn next() -> i64 {
    GENERATOR
        .get_or_init(new)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .generate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_positive_and_increasing() {
        let mut last = 0;
        for idx in 0..10000 {
            let id = next();
            assert!(id > last, "id: {id}, last: {last}, idx: {idx}");
            last = id;
        }
    }
}
