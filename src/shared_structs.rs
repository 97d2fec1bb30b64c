//! # Girder shared structs
//! Structs used by the Girder component's public surface and its tests

use scrypto::prelude::*;

/// Record of a single collateralized debt position. Stored by numeric id,
/// with a secondary (owner, collateral) lookup through `PositionKey`.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct Position {
    /// Unique, immutable id of this position.
    pub position_id: u64,
    /// The account that opened the position and owes its debt.
    pub owner: ComponentAddress,
    /// The resource address of the collateral backing this position.
    pub collateral_address: ResourceAddress,
    /// The current amount of collateral backing this position. Always equals
    /// the sum of the position's deposit records.
    pub collateral_amount: Decimal,
    /// Outstanding drawn debt, in gUSD.
    pub principal: Decimal,
    /// Compounded borrowing fees not yet repaid, in gUSD.
    pub accumulated_fees: Decimal,
    /// Timestamp of the last fee synchronization.
    pub fees_updated: Instant,
    /// Snapshot of the collateral type's global interest factor at last sync.
    pub interest_factor: Decimal,
    /// The ratio key under which this position currently sits in the
    /// collateral-ratio index. Used for sorting positions by health.
    pub collateral_ratio: Decimal,
}

/// One depositor's recorded contribution to a position's collateral.
/// A position carries one record per distinct depositor; the record is
/// removed when its amount reaches zero.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct Deposit {
    /// The account the contribution came from.
    pub depositor: ComponentAddress,
    /// The contributed collateral amount still held for this depositor.
    pub amount: Decimal,
}

/// Lookup key enforcing a single position per (owner, collateral type) pair.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct PositionKey {
    pub owner: ComponentAddress,
    pub collateral_address: ResourceAddress,
}

/// A struct providing a summarized view of a specific collateral's state within
/// the Girder protocol. Used for returning information via getter methods.
#[derive(ScryptoSbor, Clone)]
pub struct CollateralInfoReturn {
    /// The resource address of the collateral token.
    pub resource_address: ResourceAddress,
    /// The oracle market identifier used to price this collateral.
    pub market_id: String,
    /// The current USD price used for ratio computations.
    pub usd_price: Decimal,
    /// The minimum collateralization ratio below which withdrawals and draws are refused.
    pub liquidation_ratio: Decimal,
    /// The per-second borrow-rate mantissa. A rate of 1 means zero growth.
    pub per_second_rate: Decimal,
    /// The maximum total principal that may be drawn against this collateral.
    pub debt_limit: Decimal,
    /// The total amount of this collateral deposited across all positions.
    pub collateral_amount: Decimal,
    /// The sum of outstanding principal and minted fees of this type.
    pub total_principal: Decimal,
    /// The cumulative compounding factor, if accrual has seeded it yet.
    pub interest_factor: Option<Decimal>,
    /// Epoch seconds of the last interest accrual, if one has been observed.
    pub previous_accrual_time: Option<i64>,
    /// The amount of this collateral held in the reserve vault.
    pub vault: Decimal,
    /// The amount of gUSD interest minted but not yet collected for this collateral.
    pub accrued_fees: Decimal,
    /// Indicates if this collateral type currently accepts new positions and deposits.
    pub accepted: bool,
}
