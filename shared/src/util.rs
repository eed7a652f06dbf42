/// Current UTC timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a human-readable order number: `ORD-<YYYYMMDDHHMMSS>-<XXXX>`.
///
/// The timestamp part keeps numbers roughly sortable by creation time; the
/// 4-char random suffix avoids collisions between orders created within the
/// same second. Uniqueness is still re-checked inside the creating
/// transaction.
pub fn generate_order_number() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

    let ts = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("ORD-{ts}-{suffix}")
}
