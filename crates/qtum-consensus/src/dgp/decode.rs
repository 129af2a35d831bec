//! Decoding and bound checking of governance values.

use alloy_primitives::U256;

use super::DgpError;
use crate::evm::{GasSchedule, GOVERNED_SCHEDULE_LEN, GOVERNED_SCHEDULE_LEN_SHANGHAI};

/// Size of one ABI word.
const WORD: usize = 32;

/// Decodes a schedule returned by a template call: one entry per 32-byte word, truncated to
/// 32 bits. Trailing bytes that do not fill a word are ignored.
pub fn decode_schedule_words(output: &[u8]) -> Vec<u32> {
    output.chunks_exact(WORD).map(|word| U256::from_be_slice(word).as_limbs()[0] as u32).collect()
}

/// Decodes a single parameter returned by a template call.
///
/// Returns `None` unless the output is exactly one word.
pub fn decode_scalar_word(output: &[u8]) -> Option<u64> {
    (output.len() == WORD).then(|| U256::from_be_slice(output).as_limbs()[0])
}

/// Decodes a schedule kept in template storage.
///
/// Every slot holds eight entries: its four 64-bit limbs from least significant up, each
/// split into its low then its high 32 bits.
pub fn decode_storage_schedule(slots: impl IntoIterator<Item = U256>) -> Vec<u32> {
    slots
        .into_iter()
        .flat_map(|slot| slot.into_limbs())
        .flat_map(|limb| [limb as u32, (limb >> 32) as u32])
        .collect()
}

/// Inclusive bounds a governed schedule entry must respect given its default.
pub const fn schedule_entry_bounds(default: u32) -> (u64, u64) {
    let default = default as u64;
    let min = if default / 100 > 0 { default / 100 } else { 1 };
    let max = if default * 1000 > 0 { default * 1000 } else { 1000 };
    (min, max)
}

/// Checks a published schedule against the compiled defaults.
///
/// A 40-entry schedule, carrying the init code limit, is only accepted when
/// `allow_initcode_limit` is set. Every entry must lie within [`schedule_entry_bounds`] of its
/// default.
pub fn check_schedule_bounds(values: &[u32], allow_initcode_limit: bool) -> Result<(), DgpError> {
    let defaults = GasSchedule::eip158();
    let defaults = match values.len() {
        GOVERNED_SCHEDULE_LEN => defaults.governed_values(),
        GOVERNED_SCHEDULE_LEN_SHANGHAI if allow_initcode_limit => defaults.governed_values_shanghai(),
        len => return Err(DgpError::ScheduleLength(len)),
    };
    for (index, (value, default)) in values.iter().zip(defaults).enumerate() {
        let (min, max) = schedule_entry_bounds(default);
        if !(min..=max).contains(&u64::from(*value)) {
            return Err(DgpError::ScheduleOutOfBounds { index, value: *value });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_words_are_truncated_to_32_bits() {
        let mut output = vec![0u8; 64];
        output[31] = 7;
        output[27] = 1;
        output[63] = 0xff;
        output[58] = 0xaa;
        output.extend([1, 2, 3]);
        assert_eq!(decode_schedule_words(&output), vec![(1 << 24) | 7, 0xff]);
    }

    #[test]
    fn scalar_needs_exactly_one_word() {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&2_000_000u64.to_be_bytes());
        assert_eq!(decode_scalar_word(&word), Some(2_000_000));
        assert_eq!(decode_scalar_word(&word[1..]), None);
        assert_eq!(decode_scalar_word(&[]), None);
    }

    #[test]
    fn storage_slots_split_into_low_then_high_halves() {
        let slot = U256::from_limbs([(3 << 32) | 2, 5 << 32, 0, u64::from(u32::MAX)]);
        assert_eq!(decode_storage_schedule([slot]), vec![2, 3, 0, 5, 0, 0, u32::MAX, 0]);
    }

    #[test]
    fn entry_bounds_have_floors() {
        assert_eq!(schedule_entry_bounds(0), (1, 1000));
        assert_eq!(schedule_entry_bounds(3), (1, 3000));
        assert_eq!(schedule_entry_bounds(21_000), (210, 21_000_000));
    }

    #[test]
    fn default_tier_zero_is_out_of_bounds() {
        let defaults = GasSchedule::eip158().governed_values();
        assert_eq!(
            check_schedule_bounds(&defaults, false),
            Err(DgpError::ScheduleOutOfBounds { index: 0, value: 0 })
        );
    }

    #[test]
    fn initcode_limit_needs_the_upgrade() {
        let mut values = GasSchedule::eip158().governed_values_shanghai();
        values[..8].fill(10);
        assert_eq!(check_schedule_bounds(&values, false), Err(DgpError::ScheduleLength(40)));
        assert_eq!(check_schedule_bounds(&values[..39], false), Ok(()));
        assert_eq!(check_schedule_bounds(&values, true), Ok(()));
    }
}
