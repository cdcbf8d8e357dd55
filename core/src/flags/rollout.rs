//! Deterministic percentage rollout
//!
//! Version 1 of the bucketing rule, pinned so any other implementation can
//! reproduce it bit for bit:
//!
//! 1. Render the user id as its ASCII decimal string (`-` prefix for negatives).
//! 2. Hash those bytes with 32-bit FNV-1a (offset basis `0x811c9dc5`,
//!    prime `0x01000193`, wrapping multiplication).
//! 3. `bucket = hash % 100`.
//! 4. The user is in the rollout iff `bucket < percentage`.
//!
//! The bucket depends only on the user id, so raising a flag's percentage only
//! ever adds users.

/// Bumped whenever the bucketing rule changes.
pub const ROLLOUT_HASH_VERSION: u32 = 1;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Bucket in `0..100` for a user
pub fn rollout_bucket(user_id: i64) -> u32 {
    fnv1a_32(user_id.to_string().as_bytes()) % 100
}

/// Whether `user_id` falls inside a rollout of `percentage` percent
pub fn in_rollout(user_id: i64, percentage: u8) -> bool {
    if percentage >= 100 {
        return true;
    }
    rollout_bucket(user_id) < u32::from(percentage)
}
