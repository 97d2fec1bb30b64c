//! Defines events emitted by the Girder protocol component.

use scrypto::prelude::*;

/// Event emitted when a new collateral type is added to the Girder protocol.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventNewCollateral {
    /// The `ResourceAddress` of the newly accepted collateral token.
    pub address: ResourceAddress,
    /// The liquidation ratio set for this collateral type.
    pub liquidation_ratio: Decimal,
    /// The per-second borrow-rate mantissa set for this collateral type.
    pub per_second_rate: Decimal,
    /// The initial USD price set for this collateral type.
    pub usd_price: Decimal,
}

/// Event emitted when parameters of an existing collateral type are changed.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventChangeCollateral {
    /// The `ResourceAddress` of the collateral type being modified.
    pub address: ResourceAddress,
    /// The new liquidation ratio, if changed.
    pub new_liquidation_ratio: Option<Decimal>,
    /// The new per-second borrow-rate mantissa, if changed.
    pub new_per_second_rate: Option<Decimal>,
    /// The new debt limit, if changed.
    pub new_debt_limit: Option<Decimal>,
    /// The new acceptance status, if changed.
    pub new_accepted: Option<bool>,
    /// The new USD price, if changed.
    pub new_usd_price: Option<Decimal>,
}

/// Event emitted when a new position is opened.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventNewPosition {
    /// The numeric id of the new position.
    pub position_id: u64,
    /// The account that opened the position.
    pub owner: ComponentAddress,
    /// The `ResourceAddress` of the collateral backing the position.
    pub collateral_address: ResourceAddress,
    /// The collateral amount deposited at opening.
    pub collateral_amount: Decimal,
    /// The gUSD debt drawn at opening.
    pub debt_amount: Decimal,
}

/// Event emitted when collateral is deposited into an existing position.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventDepositCollateral {
    /// The numeric id of the position receiving the deposit.
    pub position_id: u64,
    /// The account the collateral came from.
    pub depositor: ComponentAddress,
    /// The `ResourceAddress` of the deposited collateral.
    pub collateral_address: ResourceAddress,
    /// The deposited amount.
    pub amount: Decimal,
}

/// Event emitted when a depositor withdraws collateral from a position.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventWithdrawCollateral {
    /// The numeric id of the position the collateral left.
    pub position_id: u64,
    /// The account receiving the collateral.
    pub depositor: ComponentAddress,
    /// The `ResourceAddress` of the withdrawn collateral.
    pub collateral_address: ResourceAddress,
    /// The withdrawn amount.
    pub amount: Decimal,
}

/// Event emitted when additional gUSD debt is drawn against a position.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventDrawDebt {
    /// The numeric id of the position.
    pub position_id: u64,
    /// The gUSD amount drawn.
    pub amount: Decimal,
    /// The position's total debt (principal plus fees) after the draw.
    pub total_debt: Decimal,
}

/// Event emitted when gUSD debt is repaid on a position.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRepayDebt {
    /// The numeric id of the position.
    pub position_id: u64,
    /// The part of the payment applied to accumulated fees.
    pub fees_paid: Decimal,
    /// The part of the payment applied to principal.
    pub principal_paid: Decimal,
    /// The position's total debt (principal plus fees) after the repayment.
    pub total_debt: Decimal,
}

/// Event emitted when a position with zero collateral and zero debt is deleted.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventClosePosition {
    /// The numeric id of the deleted position.
    pub position_id: u64,
}

/// Event emitted when interest accrual advances a collateral type's global state.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventAccrueInterest {
    /// The `ResourceAddress` of the collateral type.
    pub collateral_address: ResourceAddress,
    /// The elapsed seconds covered by this accrual.
    pub time_elapsed: i64,
    /// The gUSD amount minted into the accrued-fees vault.
    pub interest_accrued: Decimal,
    /// The cumulative interest factor after this accrual.
    pub interest_factor: Decimal,
    /// The total principal of the type after this accrual.
    pub total_principal: Decimal,
}

/// Event emitted when the oracle component or method the protocol queries is replaced.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventSetOracle {
    /// The `ComponentAddress` of the new oracle.
    pub oracle_address: ComponentAddress,
    /// The method name used for price lookups on the new oracle.
    pub method_name: String,
}
