//! Key-to-slot mapping for the sharded counter store.
//!
//! Uses the Redis Cluster scheme: CRC16 (XMODEM) of the key, modulo 16384
//! slots, with hash-tag support so callers can pin related keys to one shard.

/// Number of hash slots in the cluster keyspace
pub const SLOT_COUNT: u16 = 16384;

/// Compute the hash slot owning a key
pub fn key_slot(key: &str) -> u16 {
    crc16(hash_tag(key).as_bytes()) % SLOT_COUNT
}

/// Extract the hash tag from a key, if present.
///
/// If the key contains a `{...}` section with a non-empty body, only that
/// body is hashed. This matches the cluster convention, so keys like
/// `{client-a}:global` and `{client-a}:route` land on the same shard.
fn hash_tag(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        if let Some(close) = key[open + 1..].find('}') {
            if close > 0 {
                return &key[open + 1..open + 1 + close];
            }
        }
    }
    key
}

/// CRC16 (XMODEM variant, polynomial 0x1021) as specified for cluster slots
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_reference_vector() {
        // Standard XMODEM check value
        assert_eq!(crc16(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_known_slots() {
        // Values match CLUSTER KEYSLOT on a real cluster
        assert_eq!(key_slot("foo"), 12182);
        assert_eq!(key_slot("bar"), 5061);
    }

    #[test]
    fn test_slot_in_range() {
        for key in ["", "a", "skygate:ratelimit:10.0.0.1", "{x}y", "{}"] {
            assert!(key_slot(key) < SLOT_COUNT);
        }
    }

    #[test]
    fn test_hash_tag_pins_keys_together() {
        assert_eq!(key_slot("{user1000}.following"), key_slot("{user1000}.followers"));
        assert_eq!(key_slot("{user1000}.following"), key_slot("user1000"));
    }

    #[test]
    fn test_empty_hash_tag_is_ignored() {
        // "{}" has an empty body, so the whole key is hashed
        assert_ne!(key_slot("foo{}bar"), key_slot(""));
        assert_eq!(hash_tag("foo{}bar"), "foo{}bar");
        assert_eq!(hash_tag("foo{tag}bar"), "tag");
        assert_eq!(hash_tag("no-braces"), "no-braces");
    }
}
