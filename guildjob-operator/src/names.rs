//! Deterministic Job names for (interaction, action) pairs
//!
//! The name doubles as the dedup key: while a Job with this name exists no second
//! Job is created for the same action. It must therefore be stable across runs and
//! across implementations.

use sha2::{Digest, Sha224};

/// Prefix of every dispatched Job name
pub const JOB_NAME_PREFIX: &str = "job-";

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Encode `SHA-224(interaction || 0x00 || action)` in base 36, least significant
/// digit first, behind [`JOB_NAME_PREFIX`].
pub fn job_name(interaction: &str, action: &str) -> String {
    let mut hasher = Sha224::new();
    hasher.update(interaction.as_bytes());
    hasher.update([0u8]);
    hasher.update(action.as_bytes());
    let mut digits: Vec<u8> = hasher.finalize().to_vec();

    let base = ALPHABET.len() as u32;
    let mut encoded = String::from(JOB_NAME_PREFIX);
    while !is_less_than(&digits, base) {
        let remainder = div_rem(&mut digits, base);
        encoded.push(ALPHABET[remainder as usize] as char);
    }
    let last = digits.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
    encoded.push(ALPHABET[last as usize] as char);

    encoded
}

/// Divide a big-endian unsigned integer in place, returning the remainder
fn div_rem(digits: &mut [u8], divisor: u32) -> u32 {
    let mut remainder = 0u32;
    for byte in digits.iter_mut() {
        let acc = (remainder << 8) | u32::from(*byte);
        *byte = (acc / divisor) as u8;
        remainder = acc % divisor;
    }
    remainder
}

fn is_less_than(digits: &[u8], value: u32) -> bool {
    let split = digits.len().saturating_sub(1);
    digits[..split].iter().all(|b| *b == 0)
        && digits.get(split).map_or(true, |b| u32::from(*b) < value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            job_name("diName", "action"),
            "job-5c9aordx16dqd2mgii4bcliw986krokvd9e9oz4gt65"
        );
        assert_eq!(
            job_name("deploy-bot", "restart"),
            "job-s24we32lc5ghje1wdgun25kk4itj4brewwinj180rxw2"
        );
    }

    #[test]
    fn test_separator_prevents_concatenation_collisions() {
        assert_eq!(job_name("a", "bc"), "job-2uxbytimirvboez2x5ebof04hovino3u56y9yrgdiuf");
        assert_eq!(job_name("ab", "c"), "job-4pab3gjrirwgvqfxyi3tkmdf3uk6u54jj4rimyg6kx73");
    }

    #[test]
    fn test_deterministic_and_distinct() {
        assert_eq!(job_name("deploy-bot", "restart"), job_name("deploy-bot", "restart"));
        assert_ne!(job_name("deploy-bot", "restart"), job_name("deploy-bot", "restart2"));
    }

    #[test]
    fn test_output_is_a_valid_object_name() {
        for (interaction, action) in [("", ""), ("x", "y"), ("deploy-bot", "a-very-long-action-name")] {
            let name = job_name(interaction, action);
            let suffix = name.strip_prefix(JOB_NAME_PREFIX).unwrap();
            assert!(!suffix.is_empty());
            assert!(suffix.bytes().all(|b| ALPHABET.contains(&b)));
            assert!(name.len() <= 63);
        }
    }

    #[test]
    fn test_div_rem() {
        let mut digits = vec![0x01, 0x00]; // 256
        assert_eq!(div_rem(&mut digits, 36), 256 % 36);
        assert_eq!(digits, vec![0x00, 0x07]);
        assert!(is_less_than(&digits, 36));
        assert!(!is_less_than(&[0x00, 0x24], 36));
    }
}
