use alloy_primitives::U256;

/// A target decoded from its compact `nBits` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactTarget {
    /// The decoded target.
    pub target: U256,
    /// The sign bit was set on a non-zero mantissa.
    pub negative: bool,
    /// The target does not fit in 256 bits.
    pub overflow: bool,
}

impl CompactTarget {
    /// Decodes a compact target.
    pub fn from_bits(bits: u32) -> Self {
        let size = (bits >> 24) as usize;
        let mut word = bits & 0x007f_ffff;
        let target = if size <= 3 {
            word >>= 8 * (3 - size);
            U256::from(word)
        } else {
            U256::from(word) << (8 * (size - 3))
        };
        let negative = word != 0 && bits & 0x0080_0000 != 0;
        let overflow = word != 0 &&
            (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));
        Self { target, negative, overflow }
    }

    /// Returns whether the target is usable: positive, non-zero and in range.
    pub fn is_valid(&self) -> bool {
        !self.negative && !self.overflow && !self.target.is_zero()
    }
}

/// Encodes a target into its compact form, rounding down to the 23-bit mantissa.
pub fn to_compact(target: U256) -> u32 {
    let mut size = target.bit_len().div_ceil(8);
    let mut compact = if size <= 3 {
        (target.as_limbs()[0] << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).as_limbs()[0] as u32
    };
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | (size as u32) << 24
}

/// Round-trips a target through the compact form.
pub fn round_compact(target: U256) -> U256 {
    CompactTarget::from_bits(to_compact(target)).target
}
