//! EIP-2200 storage write classification and pricing.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use super::GasSchedule;

/// Effect of a storage write, relative to the slot's value at transaction start (original)
/// and its value right before the write (current).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageStatus {
    /// The write leaves the slot in a state that needs no further accounting: either the new
    /// value equals the current one, or the slot was already dirty and stays so.
    Assigned,
    /// `0 -> 0 -> Z`: a clean zero slot becomes non-zero.
    Added,
    /// `X -> X -> 0`: a clean non-zero slot is cleared.
    Deleted,
    /// `X -> X -> Z`: a clean non-zero slot changes value.
    Modified,
    /// `X -> 0 -> Z`: a slot cleared earlier is set again.
    DeletedAdded,
    /// `X -> Y -> 0`: a slot modified earlier is cleared.
    ModifiedDeleted,
    /// `X -> 0 -> X`: a slot cleared earlier gets its original value back.
    DeletedRestored,
    /// `0 -> Y -> 0`: a slot added earlier is cleared again.
    AddedDeleted,
    /// `X -> Y -> X`: a slot modified earlier gets its original value back.
    ModifiedRestored,
}

/// Classifies a write of `new` to a slot holding `current`, whose value at transaction start
/// was `original`.
pub fn classify_storage_write(original: U256, current: U256, new: U256) -> StorageStatus {
    if new == current {
        return StorageStatus::Assigned;
    }
    if original == current {
        return if original.is_zero() {
            StorageStatus::Added
        } else if new.is_zero() {
            StorageStatus::Deleted
        } else {
            StorageStatus::Modified
        };
    }
    match (original.is_zero(), current.is_zero(), new.is_zero()) {
        (false, true, _) if new == original => StorageStatus::DeletedRestored,
        (false, true, _) => StorageStatus::DeletedAdded,
        (_, false, true) if original.is_zero() => StorageStatus::AddedDeleted,
        (false, false, true) => StorageStatus::ModifiedDeleted,
        (false, false, false) if new == original => StorageStatus::ModifiedRestored,
        _ => StorageStatus::Assigned,
    }
}

/// Change of the refund counter caused by a write of the given status under net gas metering.
///
/// The result may be negative: clearing a slot and setting it again within one transaction
/// takes back the refund granted for the clearing.
pub fn storage_refund_delta(schedule: &GasSchedule, status: StorageStatus) -> i64 {
    let refund = schedule.sstore_refund_gas as i64;
    let unchanged = schedule.sstore_unchanged_gas() as i64;
    let restored_from_zero = schedule.sstore_set_gas as i64 - unchanged;
    let restored = schedule.sstore_reset_effective_gas() as i64 - unchanged;
    match status {
        StorageStatus::Assigned | StorageStatus::Added | StorageStatus::Modified => 0,
        StorageStatus::Deleted | StorageStatus::ModifiedDeleted => refund,
        StorageStatus::DeletedAdded => -refund,
        StorageStatus::DeletedRestored => restored - refund,
        StorageStatus::AddedDeleted => restored_from_zero,
        StorageStatus::ModifiedRestored => restored,
    }
}

/// Change of the refund counter caused by a write before net gas metering.
pub fn legacy_storage_refund_delta(schedule: &GasSchedule, current: U256, new: U256) -> i64 {
    if !current.is_zero() && new.is_zero() {
        schedule.sstore_refund_gas as i64
    } else {
        0
    }
}

/// Gas charged for a storage write, excluding the EIP-2929 cold surcharge.
pub fn storage_write_cost(
    schedule: &GasSchedule,
    status: StorageStatus,
    current: U256,
    new: U256,
) -> u64 {
    if !schedule.upgrades.istanbul {
        return if current.is_zero() && !new.is_zero() {
            schedule.sstore_set_gas
        } else {
            schedule.sstore_reset_gas
        };
    }
    match status {
        StorageStatus::Added => schedule.sstore_set_gas,
        StorageStatus::Deleted | StorageStatus::Modified => schedule.sstore_reset_effective_gas(),
        StorageStatus::Assigned |
        StorageStatus::DeletedAdded |
        StorageStatus::ModifiedDeleted |
        StorageStatus::DeletedRestored |
        StorageStatus::AddedDeleted |
        StorageStatus::ModifiedRestored => schedule.sstore_unchanged_gas(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::GasUpgrades;
    use rstest::rstest;

    fn u(n: u64) -> U256 {
        U256::from(n)
    }

    #[rstest]
    #[case(0, 0, 0, StorageStatus::Assigned)]
    #[case(0, 0, 5, StorageStatus::Added)]
    #[case(5, 5, 0, StorageStatus::Deleted)]
    #[case(5, 5, 7, StorageStatus::Modified)]
    #[case(5, 0, 7, StorageStatus::DeletedAdded)]
    #[case(5, 7, 0, StorageStatus::ModifiedDeleted)]
    #[case(5, 0, 5, StorageStatus::DeletedRestored)]
    #[case(0, 7, 0, StorageStatus::AddedDeleted)]
    #[case(5, 7, 5, StorageStatus::ModifiedRestored)]
    #[case(0, 7, 9, StorageStatus::Assigned)]
    #[case(5, 7, 9, StorageStatus::Assigned)]
    fn classification_table(
        #[case] original: u64,
        #[case] current: u64,
        #[case] new: u64,
        #[case] status: StorageStatus,
    ) {
        assert_eq!(classify_storage_write(u(original), u(current), u(new)), status);
    }

    #[test]
    fn istanbul_refunds() {
        let schedule = GasSchedule::eip158().with_upgrades(GasUpgrades { istanbul: true, ..Default::default() });
        assert_eq!(storage_refund_delta(&schedule, StorageStatus::Added), 0);
        assert_eq!(storage_refund_delta(&schedule, StorageStatus::Deleted), 15_000);
        assert_eq!(storage_refund_delta(&schedule, StorageStatus::DeletedAdded), -15_000);
        assert_eq!(storage_refund_delta(&schedule, StorageStatus::DeletedRestored), 4_200 - 15_000);
        assert_eq!(storage_refund_delta(&schedule, StorageStatus::AddedDeleted), 19_200);
        assert_eq!(storage_refund_delta(&schedule, StorageStatus::ModifiedRestored), 4_200);
        assert_eq!(storage_write_cost(&schedule, StorageStatus::Added, u(0), u(1)), 20_000);
        assert_eq!(storage_write_cost(&schedule, StorageStatus::Assigned, u(1), u(1)), 800);
    }

    #[test]
    fn legacy_pricing_ignores_the_original_value() {
        let schedule = GasSchedule::eip158();
        assert_eq!(storage_write_cost(&schedule, StorageStatus::ModifiedRestored, u(0), u(1)), 20_000);
        assert_eq!(storage_write_cost(&schedule, StorageStatus::ModifiedRestored, u(1), u(2)), 5_000);
        assert_eq!(legacy_storage_refund_delta(&schedule, u(1), u(0)), 15_000);
        assert_eq!(legacy_storage_refund_delta(&schedule, u(0), u(0)), 0);
    }
}
