use sha2::{Digest, Sha256};

/// Hash commitment for a proof-of-work sync ticket:
/// `SHA256(peer_id ‖ nonce ‖ expires_at)`.
pub fn ticket_hash(peer_id: &str, nonce: u64, expires_at: i64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(peer_id.as_bytes());
    hasher.update(nonce.to_le_bytes());
    hasher.update(expires_at.to_le_bytes());
    hasher.finalize().into()
}

/// Verify that the ticket hash has at least `difficulty` leading zero bits,
/// i.e. the hash is below `2^(256 - difficulty)`.
pub fn verify_ticket_pow(peer_id: &str, nonce: u64, expires_at: i64, difficulty: u8) -> bool {
    leading_zero_bits(&ticket_hash(peer_id, nonce, expires_at)) >= difficulty as u16
}

/// Find a nonce that satisfies `difficulty` for this peer and expiry.
/// Requesters mine this locally before each sync request.
pub fn mine_ticket(peer_id: &str, expires_at: i64, difficulty: u8) -> u64 {
    for nonce in 0u64.. {
        if verify_ticket_pow(peer_id, nonce, expires_at, difficulty) {
            return nonce;
        }
    }
    unreachable!("PoW loop exhausted u64 range")
}

fn leading_zero_bits(hash: &[u8; 32]) -> u16 {
    let mut count = 0u16;
    for byte in hash {
        let lz = byte.leading_zeros() as u16;
        count += lz;
        if lz < 8 {
            break;
        }
    }
    count
}
