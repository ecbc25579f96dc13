//! Peer-id derivation and Kademlia XOR-distance math.

use sha3::{Digest, Keccak256};

/// Number of k-buckets: one per bit of the 256-bit XOR-distance space.
pub const NUM_BUCKETS: usize = 256;
/// Maximum peers held per bucket before FIFO eviction.
pub const BUCKET_SIZE: usize = 20;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Derive a peer-id from a node-id: `"Qm" ++ hex(keccak256(nodeId))[0..46]`.
pub fn derive_peer_id(node_id: &str) -> String {
    let digest = keccak256(node_id.as_bytes());
    let hexed = hex::encode(digest);
    format!("Qm{}", &hexed[0..46.min(hexed.len())])
}

/// XOR distance between two keys (already hashed to 256 bits).
pub fn xor_distance(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Index of the most significant differing bit, i.e. the k-bucket index
/// for a distance. Returns `None` if the distance is zero (identical
/// keys).
pub fn bucket_index(distance: &[u8; 32]) -> Option<usize> {
    for (byte_index, byte) in distance.iter().enumerate() {
        if *byte != 0 {
            let leading = byte.leading_zeros() as usize;
            let bit_in_byte = 7 - leading;
            return Some((31 - byte_index) * 8 + bit_in_byte);
        }
    }
    None
}

/// Hash used as the 256-bit key for a peer-id or DHT key.
pub fn hash_key(key: &str) -> [u8; 32] {
    keccak256(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_has_expected_shape() {
        let id = derive_peer_id("node-1");
        assert!(id.starts_with("Qm"));
        assert_eq!(id.len(), 2 + 46);
    }

    #[test]
    fn xor_distance_zero_for_identical_keys() {
        let k = hash_key("same");
        let d = xor_distance(&k, &k);
        assert_eq!(d, [0u8; 32]);
        assert_eq!(bucket_index(&d), None);
    }

    #[test]
    fn bucket_index_tracks_msb_difference() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 0b1000_0000;
        b[0] = 0b0000_0000;
        let d = xor_distance(&a, &b);
        assert_eq!(bucket_index(&d), Some(255));

        let mut c = [0u8; 32];
        c[31] = 0b0000_0001;
        let d2 = xor_distance(&c, &[0u8; 32]);
        assert_eq!(bucket_index(&d2), Some(0));
    }
}
