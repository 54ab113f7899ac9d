use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Key for a batch: owner plus every (object key, content hash) pair in key order.
///
/// Input order does not matter; the same owner and contents always give the same key.
/// Each field is prefixed with its length, so names holding separators cannot collide.
pub fn compute_batch_key(owner_id: &str, entries: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(b.1)));

    let mut hasher = Sha256::new();
    let mut field = |value: &str| {
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value.as_bytes());
    };
    field(owner_id);
    for &(key, sha) in sorted {
        field(key);
        field(sha);
    }

    hex::encode(hasher.finalize())
}

/// Ledger key for a billing provider delivery.
pub fn billing_event_key(event_id: &str) -> String {
    format!("billing:{}", event_id)
}
