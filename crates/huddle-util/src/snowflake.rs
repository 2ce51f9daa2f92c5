use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch: 2024-01-01T00:00:00Z
const HUDDLE_EPOCH: u64 = 1_704_067_200_000;

const SEQUENCE_BITS: u64 = 12;
const WORKER_BITS: u64 = 10;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Packed `(last timestamp << SEQUENCE_BITS) | sequence`.
static STATE: AtomicU64 = AtomicU64::new(0);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(HUDDLE_EPOCH)
        .max(HUDDLE_EPOCH)
}

/// Generate a Snowflake ID.
/// Format: 42 bits timestamp | 10 bits worker | 12 bits sequence
///
/// Ids generated by one process are strictly increasing: when the sequence
/// for the current millisecond is exhausted, or the clock steps backwards,
/// the timestamp component is advanced past the last one handed out.
pub fn generate(worker_id: u16) -> i64 {
    let now = now_millis() - HUDDLE_EPOCH;
    let mut current = STATE.load(Ordering::Relaxed);
    let (timestamp, seq) = loop {
        let last_ts = current >> SEQUENCE_BITS;
        let last_seq = current & SEQUENCE_MASK;
        let (ts, seq) = if now > last_ts {
            (now, 0)
        } else if last_seq < SEQUENCE_MASK {
            (last_ts, last_seq + 1)
        } else {
            (last_ts + 1, 0)
        };
        match STATE.compare_exchange_weak(
            current,
            (ts << SEQUENCE_BITS) | seq,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => break (ts, seq),
            Err(observed) => current = observed,
        }
    };
    let worker = worker_id as u64 & ((1 << WORKER_BITS) - 1);
    ((timestamp << (WORKER_BITS + SEQUENCE_BITS)) | (worker << SEQUENCE_BITS) | seq) as i64
}

/// Extract the Unix timestamp (ms) from a snowflake.
pub fn timestamp_millis(id: i64) -> u64 {
    ((id as u64) >> (WORKER_BITS + SEQUENCE_BITS)) + HUDDLE_EPOCH
}
