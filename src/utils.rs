// src/utils.rs
// Utility functions for the DLMM data miner

use rand::Rng;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Length of the random part of a snapshot key.
pub const ID_LENGTH: usize = 21;

/// Prefix shared by every snapshot query key.
pub const QUERY_KEY_PREFIX: &str = "historical_data_";

/// Generates a random identifier drawn from `[A-Za-z0-9-_]`.
pub fn generate_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// New query key for a pipeline run: `historical_data_<21 chars>`.
pub fn new_query_key() -> String {
    format!("{}{}", QUERY_KEY_PREFIX, generate_id(ID_LENGTH))
}

/// Splits `items` into consecutive chunks of at most `chunk_size` elements.
/// Useful for packing addresses into batched request URLs.
pub fn create_chunks<T: Clone>(items: &[T], chunk_size: usize) -> Vec<Vec<T>> {
    let chunk_size = chunk_size.max(1);
    items.chunks(chunk_size).map(|c| c.to_vec()).collect()
}

/// Truncates long URLs for log lines.
pub fn short_url(url: &str) -> &str {
    match url.char_indices().nth(150) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
