#![allow(deprecated)]
//! # Girder Core Logic
//!
//! Core accounting component of the Girder Protocol, a collateralized debt position (CDP)
//! engine issuing the gUSD stablecoin against accepted collateral resources.
//!
//! Each collateral resource carries its own interest accrual state, a global interest factor
//! that compounds per second, and an AVL tree ordering all live positions by their
//! collateral-to-debt value ratio. The ascending tree order puts the riskiest positions
//! first, so liquidation tooling can walk the tree front to back.
//!
//! A position is identified by a `u64` id and keyed by the pair of owner address and
//! collateral resource, so an owner holds at most one position per collateral. Collateral
//! backing a position can come from multiple depositors, each tracked by their own deposit
//! record. A depositor can only take back what their own record covers.
//!
//! Interest is charged lazily. `accumulate_interest` rolls the per-collateral factor
//! forward and mints the accrued gUSD into a fee vault, while `synchronize_interest`
//! folds the factor delta since a position's snapshot into that position's accumulated
//! fees. Every position mutation runs both steps first, so positions are always settled
//! before they change.

use crate::events::*;
use crate::shared_structs::*;
use scrypto::prelude::*;
use scrypto_avltree::AvlTree;
use scrypto_math::*;

/// Converts a fractional annual interest rate (0.1 meaning 10% a year) into the
/// per-second compounding mantissa stored on a collateral, chosen so that
/// `rate.checked_powi(31_536_000)` lands on `1 + annual_rate` up to fixed-point precision.
pub fn per_second_interest_rate(annual_rate: Decimal) -> Decimal {
    assert!(
        annual_rate >= Decimal::ZERO,
        "Annual rate cannot be negative."
    );
    (Decimal::ONE + annual_rate)
        .pow(Decimal::ONE / dec!(31_536_000))
        .unwrap()
}

#[blueprint]
#[types(
    ResourceAddress,
    CollateralInfo,
    Decimal,
    AvlTree<Decimal, Vec<u64>>,
    Vec<u64>,
    u64,
    Position,
    PositionKey,
    Deposit,
    Vec<Deposit>
)]
#[events(
    EventNewCollateral,
    EventChangeCollateral,
    EventNewPosition,
    EventDepositCollateral,
    EventWithdrawCollateral,
    EventDrawDebt,
    EventRepayDebt,
    EventClosePosition,
    EventAccrueInterest,
    EventSetOracle
)]
mod girder_component {
    enable_method_auth! {
        methods {
            open_position => PUBLIC;
            deposit_collateral => PUBLIC;
            withdraw_collateral => PUBLIC;
            draw_debt => PUBLIC;
            repay_debt => PUBLIC;
            accumulate_interest => PUBLIC;
            synchronize_interest => PUBLIC;
            refresh_price => PUBLIC;
            get_position => PUBLIC;
            get_position_id => PUBLIC;
            get_current_debt => PUBLIC;
            get_deposits => PUBLIC;
            get_deposit => PUBLIC;
            get_positions_by_ratio => PUBLIC;
            get_ratio_entries => PUBLIC;
            get_collateral_infos => PUBLIC;
            get_gusd_address => PUBLIC;
            get_circulating_gusd => PUBLIC;
            new_collateral => restrict_to: [OWNER];
            edit_collateral => restrict_to: [OWNER];
            change_collateral_price => restrict_to: [OWNER];
            set_oracle => restrict_to: [OWNER];
            set_stops => restrict_to: [OWNER];
            set_minimum_debt => restrict_to: [OWNER];
            set_max_vector_length => restrict_to: [OWNER];
            collect_accrued_fees => restrict_to: [OWNER];
            mint_controller_badge => restrict_to: [OWNER];
        }
    }

    struct Girder {
        /// Per-collateral accounting state, keyed by collateral resource address
        collaterals: KeyValueStore<ResourceAddress, CollateralInfo>,
        /// All live positions, keyed by position id
        positions: KeyValueStore<u64, Position>,
        /// Lookup of position id by (owner, collateral) pair
        position_ids: KeyValueStore<PositionKey, u64>,
        /// Deposit records per position, one entry per distinct depositor
        deposits: KeyValueStore<u64, Vec<Deposit>>,
        /// Counter used to hand out position ids
        position_counter: u64,
        /// Resource manager of the gUSD stablecoin
        gusd_manager: ResourceManager,
        /// Resource manager of the controller badge
        controller_badge_manager: ResourceManager,
        /// Total gUSD minted by this component and not yet burned
        circulating_gusd: Decimal,
        /// Protocol-wide parameters
        parameters: ProtocolParameters,
        /// The oracle component queried for collateral prices
        oracle: Global<AnyComponent>,
        /// Name of the method to call on the oracle component
        oracle_method_name: String,
    }

    impl Girder {
        /// Instantiates the Girder component, creating the gUSD resource and the
        /// controller badges in the process.
        ///
        /// # Arguments
        /// - `oracle_address`: address of the price oracle component
        /// - `dapp_def_address`: address of the dapp definition account
        ///
        /// # Returns
        /// - the global component
        /// - a bucket with the controller badges
        /// - the gUSD resource address
        pub fn instantiate(
            oracle_address: ComponentAddress,
            dapp_def_address: GlobalAddress,
        ) -> (Global<Girder>, Bucket, ResourceAddress) {
            let parameters = ProtocolParameters {
                minimum_debt: Decimal::ONE,
                max_vector_length: 250,
                stop_openings: false,
                stop_closings: false,
            };

            let (address_reservation, component_address) =
                Runtime::allocate_component_address(Girder::blueprint_id());

            let controller_role: Bucket = ResourceBuilder::new_fungible(OwnerRole::Fixed(rule!(
                require(global_caller(component_address))
            )))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "girder controller badge", locked;
                    "symbol" => "girderCTRL", locked;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address)));
                minter_updater => rule!(deny_all);
            ))
            .mint_initial_supply(10)
            .into();

            let controller_badge_manager: ResourceManager = controller_role.resource_manager();

            let gusd_manager: ResourceManager = ResourceBuilder::new_fungible(OwnerRole::Fixed(
                rule!(require(controller_role.resource_address())),
            ))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "gUSD", updatable;
                    "symbol" => "gUSD", updatable;
                    "info_url" => Url::of("https://girder.finance"), updatable;
                    "icon_url" => Url::of("https://girder.finance/images/gusd.png"), updatable;
                    "tags" => vec!["stablecoin", "defi"], updatable;
                    "dapp_definitions" => vec![dapp_def_address], updatable;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address))
                || require_amount(
                    dec!("0.75"),
                    controller_role.resource_address()
                ));
                minter_updater => rule!(require_amount(
                    dec!("0.75"),
                    controller_role.resource_address()
                ));
            ))
            .burn_roles(burn_roles!(
                burner => rule!(require(global_caller(component_address))
                || require_amount(
                    dec!("0.75"),
                    controller_role.resource_address()
                ));
                burner_updater => rule!(require_amount(
                    dec!("0.75"),
                    controller_role.resource_address()
                ));
            ))
            .create_with_no_initial_supply()
            .into();

            let girder = Self {
                collaterals: KeyValueStore::new_with_registered_type(),
                positions: KeyValueStore::new_with_registered_type(),
                position_ids: KeyValueStore::new_with_registered_type(),
                deposits: KeyValueStore::new_with_registered_type(),
                position_counter: 0,
                gusd_manager,
                controller_badge_manager,
                circulating_gusd: Decimal::ZERO,
                parameters,
                oracle: Global::from(oracle_address),
                oracle_method_name: "get_price".to_string(),
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                controller_role.resource_address()
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Girder Protocol Core Logic".to_string(), updatable;
                    "description" => "Core CDP accounting component of the Girder Protocol.".to_string(), updatable;
                    "info_url" => Url::of("https://girder.finance"), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize();

            (girder, controller_role, gusd_manager.address())
        }

        /// Opens a new position: stores the collateral, mints the requested debt and
        /// places the position into the ratio tree of its collateral.
        ///
        /// # Arguments
        /// - `owner`: account the position belongs to
        /// - `collateral`: bucket with the collateral to back the position with
        /// - `debt_amount`: amount of gUSD to mint against the collateral
        ///
        /// # Returns
        /// - a bucket with the minted gUSD
        ///
        /// # Panics
        /// - if openings are stopped, the collateral is not accepted, the owner already
        ///   has a position for this collateral, the debt is below the protocol minimum
        ///   or above the collateral's debt limit, or the resulting position would sit
        ///   below the liquidation ratio
        pub fn open_position(
            &mut self,
            owner: ComponentAddress,
            collateral: Bucket,
            debt_amount: Decimal,
        ) -> Bucket {
            let collateral_address: ResourceAddress = collateral.resource_address();
            let collateral_amount: Decimal = collateral.amount();

            assert!(
                !self.parameters.stop_openings,
                "Not allowed to open positions right now."
            );
            assert!(
                self.collaterals.get(&collateral_address).is_some(),
                "Not an accepted collateral: {:?}",
                collateral_address
            );
            assert!(
                self.collaterals.get(&collateral_address).unwrap().accepted,
                "Collateral {:?} is not accepted right now.",
                collateral_address
            );
            assert!(
                collateral_amount > Decimal::ZERO,
                "Collateral must be a positive amount."
            );
            assert!(
                debt_amount >= self.parameters.minimum_debt,
                "Minimum debt on a position is {}.",
                self.parameters.minimum_debt
            );
            assert!(
                self.position_ids
                    .get(&PositionKey {
                        owner,
                        collateral_address,
                    })
                    .is_none(),
                "Owner {:?} already has a position for collateral {:?}",
                owner,
                collateral_address
            );

            self.accumulate_interest(collateral_address);

            let total_principal: Decimal = self
                .collaterals
                .get(&collateral_address)
                .unwrap()
                .total_principal;
            let debt_limit: Decimal = self.collaterals.get(&collateral_address).unwrap().debt_limit;
            assert!(
                total_principal + debt_amount <= debt_limit,
                "Drawing {} would exceed the debt limit of {} for collateral {:?}",
                debt_amount,
                debt_limit,
                collateral_address
            );

            self.position_counter += 1;
            let position_id: u64 = self.position_counter;

            self.assert_ratio_safe(collateral_address, position_id, collateral_amount, debt_amount);

            let interest_factor: Decimal = self
                .collaterals
                .get(&collateral_address)
                .unwrap()
                .interest_factor
                .unwrap_or(Decimal::ONE);
            let collateral_ratio: Decimal =
                self.position_ratio(collateral_address, collateral_amount, debt_amount);

            let position = Position {
                position_id,
                owner,
                collateral_address,
                collateral_amount,
                principal: debt_amount,
                accumulated_fees: Decimal::ZERO,
                fees_updated: Clock::current_time_rounded_to_seconds(),
                interest_factor,
                collateral_ratio,
            };

            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .vault
                .put(collateral);
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .collateral_amount += collateral_amount;
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .total_principal += debt_amount;

            self.position_ids.insert(
                PositionKey {
                    owner,
                    collateral_address,
                },
                position_id,
            );
            self.deposits.insert(
                position_id,
                vec![Deposit {
                    depositor: owner,
                    amount: collateral_amount,
                }],
            );
            self.insert_ratio_entry(collateral_address, collateral_ratio, position_id);
            self.positions.insert(position_id, position);

            self.circulating_gusd += debt_amount;

            Runtime::emit_event(EventNewPosition {
                position_id,
                owner,
                collateral_address,
                collateral_amount,
                debt_amount,
            });

            self.gusd_manager.mint(debt_amount)
        }

        /// Adds collateral to an existing position on behalf of a depositor. The
        /// deposit is recorded under the depositor's address, topping up an earlier
        /// record by the same depositor if one exists.
        ///
        /// # Arguments
        /// - `owner`: owner of the position to add to
        /// - `depositor`: account the deposit is credited to
        /// - `collateral`: bucket with the collateral to add
        ///
        /// # Panics
        /// - if openings are stopped, the collateral is not accepted, or the owner has
        ///   no position for this collateral
        pub fn deposit_collateral(
            &mut self,
            owner: ComponentAddress,
            depositor: ComponentAddress,
            collateral: Bucket,
        ) {
            let collateral_address: ResourceAddress = collateral.resource_address();
            let amount: Decimal = collateral.amount();

            assert!(
                !self.parameters.stop_openings,
                "Not allowed to add to positions right now."
            );
            assert!(
                self.collaterals.get(&collateral_address).is_some(),
                "Not an accepted collateral: {:?}",
                collateral_address
            );
            assert!(
                self.collaterals.get(&collateral_address).unwrap().accepted,
                "Collateral {:?} is not accepted right now.",
                collateral_address
            );
            assert!(amount > Decimal::ZERO, "Deposit must be a positive amount.");

            let position_id: u64 = self.get_position_id(owner, collateral_address);

            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .vault
                .put(collateral);

            Runtime::emit_event(EventDepositCollateral {
                position_id,
                depositor,
                collateral_address,
                amount,
            });

            self.add_to_deposits(position_id, depositor, amount);

            self.accumulate_interest(collateral_address);
            let mut position: Position = self.synchronize_position(position_id);
            position.collateral_amount += amount;
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .collateral_amount += amount;
            self.reindex_and_persist(position);
        }

        /// Takes collateral back out of a position. Only the amount recorded under the
        /// depositor's own deposit record can be withdrawn, and the position must stay
        /// at or above the liquidation ratio after the withdrawal.
        ///
        /// # Arguments
        /// - `owner`: owner of the position to withdraw from
        /// - `depositor`: account whose deposit record is drawn down
        /// - `collateral_address`: collateral resource to withdraw
        /// - `amount`: amount of collateral to withdraw
        ///
        /// # Returns
        /// - a bucket with the withdrawn collateral
        ///
        /// # Panics
        /// - if closings are stopped, the collateral is unknown, the owner has no
        ///   position for it, the depositor's record does not cover the amount, or the
        ///   position would end up below the liquidation ratio
        ///
        /// # Logic
        /// Interest is settled before the ratio check, so the check runs against the
        /// position's live debt. If the withdrawal empties the position entirely it is
        /// closed and removed from the ledger.
        pub fn withdraw_collateral(
            &mut self,
            owner: ComponentAddress,
            depositor: ComponentAddress,
            collateral_address: ResourceAddress,
            amount: Decimal,
        ) -> Bucket {
            assert!(
                !self.parameters.stop_closings,
                "Not allowed to withdraw from positions right now."
            );
            assert!(
                self.collaterals.get(&collateral_address).is_some(),
                "Not a known collateral: {:?}",
                collateral_address
            );
            assert!(
                amount > Decimal::ZERO,
                "Withdrawal must be a positive amount."
            );
            let divisibility: u8 = ResourceManager::from_address(collateral_address)
                .resource_type()
                .divisibility()
                .unwrap();
            let smallest_unit: Decimal =
                Decimal::ONE / Decimal::from(10i64.pow(divisibility as u32));
            assert!(
                self.is_divisible_by(amount, smallest_unit),
                "Withdrawal amount not compatible with collateral divisibility of {}.",
                divisibility
            );

            let position_id: u64 = self.get_position_id(owner, collateral_address);

            let deposited: Option<Decimal> = self.deposit_amount_of(position_id, depositor);
            assert!(
                deposited.is_some(),
                "No deposit on position {} by depositor {:?}",
                position_id,
                depositor
            );
            assert!(
                amount <= deposited.unwrap(),
                "Withdrawal of {} exceeds the {} deposited on position {} by depositor {:?}",
                amount,
                deposited.unwrap(),
                position_id,
                depositor
            );

            self.accumulate_interest(collateral_address);
            let mut position: Position = self.synchronize_position(position_id);

            let total_debt: Decimal = position.principal + position.accumulated_fees;
            self.assert_ratio_safe(
                collateral_address,
                position_id,
                position.collateral_amount - amount,
                total_debt,
            );

            Runtime::emit_event(EventWithdrawCollateral {
                position_id,
                depositor,
                collateral_address,
                amount,
            });

            let withdrawn: Bucket = self
                .collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .vault
                .take_advanced(amount, WithdrawStrategy::Rounded(RoundingMode::ToZero));

            position.collateral_amount -= amount;
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .collateral_amount -= amount;
            let position: Position = self.reindex_and_persist(position);

            self.subtract_from_deposits(position_id, depositor, amount);
            self.close_position_if_empty(position);

            withdrawn
        }

        /// Mints additional gUSD against an existing position.
        ///
        /// # Arguments
        /// - `owner`: owner of the position to draw from
        /// - `collateral_address`: collateral resource the position is keyed under
        /// - `amount`: amount of gUSD to draw
        ///
        /// # Returns
        /// - a bucket with the minted gUSD
        ///
        /// # Panics
        /// - if openings are stopped, the collateral is not accepted, the owner has no
        ///   position for it, the collateral's debt limit would be exceeded, or the
        ///   position would fall below the liquidation ratio
        pub fn draw_debt(
            &mut self,
            owner: ComponentAddress,
            collateral_address: ResourceAddress,
            amount: Decimal,
        ) -> Bucket {
            assert!(
                !self.parameters.stop_openings,
                "Not allowed to draw debt right now."
            );
            assert!(
                self.collaterals.get(&collateral_address).is_some(),
                "Not an accepted collateral: {:?}",
                collateral_address
            );
            assert!(
                self.collaterals.get(&collateral_address).unwrap().accepted,
                "Collateral {:?} is not accepted right now.",
                collateral_address
            );
            assert!(amount > Decimal::ZERO, "Debt draw must be a positive amount.");

            let position_id: u64 = self.get_position_id(owner, collateral_address);

            self.accumulate_interest(collateral_address);
            let mut position: Position = self.synchronize_position(position_id);

            let total_principal: Decimal = self
                .collaterals
                .get(&collateral_address)
                .unwrap()
                .total_principal;
            let debt_limit: Decimal = self.collaterals.get(&collateral_address).unwrap().debt_limit;
            assert!(
                total_principal + amount <= debt_limit,
                "Drawing {} would exceed the debt limit of {} for collateral {:?}",
                amount,
                debt_limit,
                collateral_address
            );

            let new_total_debt: Decimal = position.principal + position.accumulated_fees + amount;
            self.assert_ratio_safe(
                collateral_address,
                position_id,
                position.collateral_amount,
                new_total_debt,
            );

            position.principal += amount;
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .total_principal += amount;
            self.reindex_and_persist(position);

            self.circulating_gusd += amount;

            Runtime::emit_event(EventDrawDebt {
                position_id,
                amount,
                total_debt: new_total_debt,
            });

            self.gusd_manager.mint(amount)
        }

        /// Repays debt on a position with a gUSD payment. Accumulated fees are paid
        /// down before principal. Whatever part of the payment is not needed flows back
        /// to the caller.
        ///
        /// # Arguments
        /// - `owner`: owner of the position to repay
        /// - `collateral_address`: collateral resource the position is keyed under
        /// - `payment`: bucket of gUSD to repay with
        ///
        /// # Returns
        /// - the payment bucket, holding any gUSD that was not needed
        ///
        /// # Panics
        /// - if the collateral is unknown, the payment is not gUSD, the owner has no
        ///   position for it, the position carries no debt, or a partial repayment
        ///   would leave the remaining debt below the protocol minimum
        ///
        /// # Logic
        /// A full repayment leaves the position open with zero debt, sorted last in the
        /// ratio tree. It is closed once its collateral is withdrawn as well.
        pub fn repay_debt(
            &mut self,
            owner: ComponentAddress,
            collateral_address: ResourceAddress,
            mut payment: Bucket,
        ) -> Bucket {
            assert!(
                self.collaterals.get(&collateral_address).is_some(),
                "Not a known collateral: {:?}",
                collateral_address
            );
            assert!(
                payment.resource_address() == self.gusd_manager.address(),
                "Can only repay debt in gUSD."
            );
            assert!(
                payment.amount() > Decimal::ZERO,
                "Repayment must be a positive amount."
            );

            let position_id: u64 = self.get_position_id(owner, collateral_address);

            self.accumulate_interest(collateral_address);
            let mut position: Position = self.synchronize_position(position_id);

            let total_debt: Decimal = position.principal + position.accumulated_fees;
            assert!(
                total_debt > Decimal::ZERO,
                "Position {} has no outstanding debt.",
                position_id
            );

            let repay_amount: Decimal = if payment.amount() > total_debt {
                total_debt
            } else {
                payment.amount()
            };
            let fees_paid: Decimal = if repay_amount > position.accumulated_fees {
                position.accumulated_fees
            } else {
                repay_amount
            };
            let principal_paid: Decimal = repay_amount - fees_paid;
            let remaining_debt: Decimal = total_debt - repay_amount;

            assert!(
                remaining_debt == Decimal::ZERO || remaining_debt >= self.parameters.minimum_debt,
                "Remaining debt of {} on position {} would be below the minimum of {}. Repay fully or repay less.",
                remaining_debt,
                position_id,
                self.parameters.minimum_debt
            );

            let repaid: Bucket = payment.take(repay_amount);
            self.gusd_manager.burn(repaid);
            self.circulating_gusd -= repay_amount;

            position.accumulated_fees -= fees_paid;
            position.principal -= principal_paid;
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .total_principal -= repay_amount;
            let position: Position = self.reindex_and_persist(position);

            Runtime::emit_event(EventRepayDebt {
                position_id,
                fees_paid,
                principal_paid,
                total_debt: remaining_debt,
            });

            self.close_position_if_empty(position);

            payment
        }

        /// Rolls the global interest state of a collateral forward to the current time.
        ///
        /// # Arguments
        /// - `collateral_address`: collateral to accrue interest for
        ///
        /// # Logic
        /// Runs through a ladder of early exits before touching the factor:
        /// - first call ever: store the current time and stop
        /// - no time passed: stop
        /// - no outstanding principal: seed the factor if unset, store the time, stop
        /// - a per-second rate of exactly 1: store the time, stop
        /// - accrued amount rounds to zero: stop without storing the time, so short
        ///   intervals on small principal keep carrying over until they round to
        ///   something
        ///
        /// Otherwise the factor delta `rate ^ seconds` is applied to the outstanding
        /// principal, the accrued gUSD is minted into the collateral's fee vault and
        /// the factor, principal and timestamp are rolled forward.
        pub fn accumulate_interest(&mut self, collateral_address: ResourceAddress) {
            assert!(
                self.collaterals.get(&collateral_address).is_some(),
                "Not a known collateral: {:?}",
                collateral_address
            );

            let now: i64 = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            let previous_accrual_time: Option<i64> = self
                .collaterals
                .get(&collateral_address)
                .unwrap()
                .previous_accrual_time;

            if previous_accrual_time.is_none() {
                self.collaterals
                    .get_mut(&collateral_address)
                    .unwrap()
                    .previous_accrual_time = Some(now);
                return;
            }

            let time_elapsed: i64 = now - previous_accrual_time.unwrap();
            if time_elapsed == 0 {
                return;
            }

            let total_principal: Decimal = self
                .collaterals
                .get(&collateral_address)
                .unwrap()
                .total_principal;
            let interest_factor: Option<Decimal> = self
                .collaterals
                .get(&collateral_address)
                .unwrap()
                .interest_factor;

            if total_principal <= Decimal::ZERO || interest_factor.is_none() {
                if interest_factor.is_none() {
                    self.collaterals
                        .get_mut(&collateral_address)
                        .unwrap()
                        .interest_factor = Some(Decimal::ONE);
                }
                self.collaterals
                    .get_mut(&collateral_address)
                    .unwrap()
                    .previous_accrual_time = Some(now);
                return;
            }

            let per_second_rate: Decimal = self
                .collaterals
                .get(&collateral_address)
                .unwrap()
                .per_second_rate;
            if per_second_rate == Decimal::ONE {
                self.collaterals
                    .get_mut(&collateral_address)
                    .unwrap()
                    .previous_accrual_time = Some(now);
                return;
            }

            let interest_factor_delta: Decimal =
                per_second_rate.checked_powi(time_elapsed).unwrap();
            let interest_accrued: Decimal =
                self.round_product(total_principal, interest_factor_delta) - total_principal;
            if interest_accrued == Decimal::ZERO {
                return;
            }

            let fee_bucket: Bucket = self.gusd_manager.mint(interest_accrued);
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .accrued_fees
                .put(fee_bucket);
            self.circulating_gusd += interest_accrued;

            let new_interest_factor: Decimal =
                self.round_product(interest_factor.unwrap(), interest_factor_delta);
            let new_total_principal: Decimal = total_principal + interest_accrued;

            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .interest_factor = Some(new_interest_factor);
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .total_principal = new_total_principal;
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .previous_accrual_time = Some(now);

            Runtime::emit_event(EventAccrueInterest {
                collateral_address,
                time_elapsed,
                interest_accrued,
                interest_factor: new_interest_factor,
                total_principal: new_total_principal,
            });
        }

        /// Settles a single position against the global interest state of its
        /// collateral and re-keys it in the ratio tree at the current price.
        ///
        /// # Arguments
        /// - `position_id`: id of the position to settle
        ///
        /// # Returns
        /// - the settled position
        pub fn synchronize_interest(&mut self, position_id: u64) -> Position {
            let collateral_address: ResourceAddress =
                self.get_position(position_id).collateral_address;
            self.accumulate_interest(collateral_address);
            self.synchronize_position(position_id)
        }

        /// Fetches the current collateral price for a collateral from the oracle
        /// component and stores it.
        pub fn refresh_price(&mut self, collateral_address: ResourceAddress) {
            assert!(
                self.collaterals.get(&collateral_address).is_some(),
                "Not a known collateral: {:?}",
                collateral_address
            );
            let market_id: String = self
                .collaterals
                .get(&collateral_address)
                .unwrap()
                .market_id
                .clone();
            let price: Decimal = self
                .oracle
                .call_raw(&self.oracle_method_name, scrypto_args!(market_id));
            assert!(
                price > Decimal::ZERO,
                "Oracle returned a non-positive price for collateral {:?}",
                collateral_address
            );
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .usd_price = price;

            Runtime::emit_event(EventChangeCollateral {
                address: collateral_address,
                new_liquidation_ratio: None,
                new_per_second_rate: None,
                new_debt_limit: None,
                new_accepted: None,
                new_usd_price: Some(price),
            });
        }

        /// Returns a position by id.
        pub fn get_position(&self, position_id: u64) -> Position {
            assert!(
                self.positions.get(&position_id).is_some(),
                "No position with id {}.",
                position_id
            );
            self.positions.get(&position_id).unwrap().clone()
        }

        /// Returns the position id of an owner's position for a collateral.
        pub fn get_position_id(
            &self,
            owner: ComponentAddress,
            collateral_address: ResourceAddress,
        ) -> u64 {
            assert!(
                self.position_ids
                    .get(&PositionKey {
                        owner,
                        collateral_address,
                    })
                    .is_some(),
                "No position found for owner {:?} and collateral {:?}",
                owner,
                collateral_address
            );
            *self
                .position_ids
                .get(&PositionKey {
                    owner,
                    collateral_address,
                })
                .unwrap()
        }

        /// Returns a position's debt as it stands right now, with the factor delta
        /// since the position's snapshot applied. Does not write anything.
        pub fn get_current_debt(&self, position_id: u64) -> Decimal {
            let position: Position = self.get_position(position_id);
            let global_factor: Option<Decimal> = self
                .collaterals
                .get(&position.collateral_address)
                .unwrap()
                .interest_factor;
            let total_debt: Decimal = position.principal + position.accumulated_fees;

            if global_factor.is_none() || global_factor.unwrap() == position.interest_factor {
                return total_debt;
            }
            let position_factor: Decimal =
                Decimal::ONE + (global_factor.unwrap() - position.interest_factor);
            self.round_product(total_debt, position_factor)
        }

        /// Returns all deposit records of a position.
        pub fn get_deposits(&self, position_id: u64) -> Vec<Deposit> {
            assert!(
                self.deposits.get(&position_id).is_some(),
                "No position with id {}.",
                position_id
            );
            self.deposits.get(&position_id).unwrap().to_vec()
        }

        /// Returns the amount a single depositor has deposited on a position.
        pub fn get_deposit(&self, position_id: u64, depositor: ComponentAddress) -> Decimal {
            let amount: Option<Decimal> = self.deposit_amount_of(position_id, depositor);
            assert!(
                amount.is_some(),
                "No deposit on position {} by depositor {:?}",
                position_id,
                depositor
            );
            amount.unwrap()
        }

        /// Walks the ratio tree of a collateral in ascending order, riskiest positions
        /// first, and returns up to `amount` position ids with their ratio keys.
        ///
        /// # Arguments
        /// - `collateral_address`: collateral whose tree to walk
        /// - `amount`: maximum number of entries to return
        /// - `ratio_start`: ratio key to resume the walk from, None to start at the front
        pub fn get_positions_by_ratio(
            &self,
            collateral_address: ResourceAddress,
            amount: u64,
            ratio_start: Option<Decimal>,
        ) -> Vec<(Decimal, u64)> {
            assert!(
                self.collaterals.get(&collateral_address).is_some(),
                "Not a known collateral: {:?}",
                collateral_address
            );
            let start: Decimal = ratio_start.unwrap_or(Decimal::ZERO);
            let mut found: Vec<(Decimal, u64)> = Vec::new();

            let collateral_info = self.collaterals.get(&collateral_address).unwrap();
            for (ratio, position_ids, _next_ratio) in collateral_info.ratios.range(start..) {
                for position_id in position_ids {
                    found.push((ratio, position_id));
                }
                if found.len() >= amount as usize {
                    break;
                }
            }
            found.truncate(amount as usize);

            found
        }

        /// Returns the raw ratio tree entries of a collateral between two ratio keys,
        /// each entry holding all position ids sharing that ratio.
        pub fn get_ratio_entries(
            &self,
            collateral_address: ResourceAddress,
            ratio_start: Option<Decimal>,
            ratio_end: Option<Decimal>,
        ) -> Vec<(Decimal, Vec<u64>)> {
            assert!(
                self.collaterals.get(&collateral_address).is_some(),
                "Not a known collateral: {:?}",
                collateral_address
            );
            let start = ratio_start.unwrap_or(Decimal::ZERO);

            if let Some(end) = ratio_end {
                self.collaterals
                    .get(&collateral_address)
                    .unwrap()
                    .ratios
                    .range(start..end)
                    .map(|(ratio, position_ids, _)| (ratio, position_ids))
                    .collect()
            } else {
                self.collaterals
                    .get(&collateral_address)
                    .unwrap()
                    .ratios
                    .range(start..)
                    .map(|(ratio, position_ids, _)| (ratio, position_ids))
                    .collect()
            }
        }

        /// Returns the collateral info for the requested collaterals. Unknown addresses
        /// are skipped.
        pub fn get_collateral_infos(
            &self,
            collateral_addresses: Vec<ResourceAddress>,
        ) -> Vec<CollateralInfoReturn> {
            collateral_addresses
                .iter()
                .filter_map(|collateral_address| {
                    self.collaterals
                        .get(collateral_address)
                        .map(|collateral_info| CollateralInfoReturn {
                            resource_address: collateral_info.resource_address,
                            market_id: collateral_info.market_id.clone(),
                            usd_price: collateral_info.usd_price,
                            liquidation_ratio: collateral_info.liquidation_ratio,
                            per_second_rate: collateral_info.per_second_rate,
                            debt_limit: collateral_info.debt_limit,
                            collateral_amount: collateral_info.collateral_amount,
                            total_principal: collateral_info.total_principal,
                            interest_factor: collateral_info.interest_factor,
                            previous_accrual_time: collateral_info.previous_accrual_time,
                            vault: collateral_info.vault.amount(),
                            accrued_fees: collateral_info.accrued_fees.amount(),
                            accepted: collateral_info.accepted,
                        })
                })
                .collect()
        }

        /// Returns the gUSD resource address.
        pub fn get_gusd_address(&self) -> ResourceAddress {
            self.gusd_manager.address()
        }

        /// Returns the amount of gUSD minted by this component and not yet burned.
        pub fn get_circulating_gusd(&self) -> Decimal {
            self.circulating_gusd
        }

        /// Adds a new accepted collateral to the protocol.
        ///
        /// # Arguments
        /// - `address`: resource address of the collateral
        /// - `market_id`: market identifier used for oracle price lookups
        /// - `usd_price`: initial USD price of the collateral
        /// - `liquidation_ratio`: minimum collateral value to debt ratio
        /// - `per_second_rate`: per-second compounding interest mantissa
        /// - `debt_limit`: maximum gUSD principal for this collateral
        pub fn new_collateral(
            &mut self,
            address: ResourceAddress,
            market_id: String,
            usd_price: Decimal,
            liquidation_ratio: Decimal,
            per_second_rate: Decimal,
            debt_limit: Decimal,
        ) {
            assert!(
                self.collaterals.get(&address).is_none(),
                "Collateral is already accepted."
            );
            assert!(usd_price > Decimal::ZERO, "Price must be positive.");
            assert!(
                liquidation_ratio >= Decimal::ONE,
                "Liquidation ratio must be at least 1."
            );
            assert!(
                per_second_rate >= Decimal::ONE,
                "Per-second rate must be at least 1."
            );
            assert!(debt_limit >= Decimal::ZERO, "Debt limit cannot be negative.");

            let info = CollateralInfo {
                resource_address: address,
                market_id,
                usd_price,
                liquidation_ratio,
                per_second_rate,
                debt_limit,
                accepted: true,
                total_principal: Decimal::ZERO,
                collateral_amount: Decimal::ZERO,
                interest_factor: None,
                previous_accrual_time: None,
                vault: Vault::new(address),
                accrued_fees: Vault::new(self.gusd_manager.address()),
                ratios: AvlTree::new(),
            };
            self.collaterals.insert(address, info);

            Runtime::emit_event(EventNewCollateral {
                address,
                liquidation_ratio,
                per_second_rate,
                usd_price,
            });
        }

        /// Edits the parameters of an accepted collateral. Parameters passed as None
        /// are left untouched.
        ///
        /// # Logic
        /// The open interval is settled at the old rate first, so a rate change never
        /// applies to seconds that already passed.
        pub fn edit_collateral(
            &mut self,
            address: ResourceAddress,
            new_liquidation_ratio: Option<Decimal>,
            new_per_second_rate: Option<Decimal>,
            new_debt_limit: Option<Decimal>,
            new_accepted: Option<bool>,
        ) {
            self.accumulate_interest(address);

            if new_liquidation_ratio.is_some() {
                assert!(
                    new_liquidation_ratio.unwrap() >= Decimal::ONE,
                    "Liquidation ratio must be at least 1."
                );
                self.collaterals.get_mut(&address).unwrap().liquidation_ratio =
                    new_liquidation_ratio.unwrap();
            }
            if new_per_second_rate.is_some() {
                assert!(
                    new_per_second_rate.unwrap() >= Decimal::ONE,
                    "Per-second rate must be at least 1."
                );
                self.collaterals.get_mut(&address).unwrap().per_second_rate =
                    new_per_second_rate.unwrap();
            }
            if new_debt_limit.is_some() {
                self.collaterals.get_mut(&address).unwrap().debt_limit = new_debt_limit.unwrap();
            }
            if new_accepted.is_some() {
                self.collaterals.get_mut(&address).unwrap().accepted = new_accepted.unwrap();
            }

            Runtime::emit_event(EventChangeCollateral {
                address,
                new_liquidation_ratio,
                new_per_second_rate,
                new_debt_limit,
                new_accepted,
                new_usd_price: None,
            });
        }

        /// Manually sets the USD price of a collateral.
        pub fn change_collateral_price(&mut self, collateral: ResourceAddress, new_price: Decimal) {
            assert!(
                self.collaterals.get(&collateral).is_some(),
                "Not a known collateral: {:?}",
                collateral
            );
            assert!(new_price > Decimal::ZERO, "Price must be positive.");
            self.collaterals.get_mut(&collateral).unwrap().usd_price = new_price;

            Runtime::emit_event(EventChangeCollateral {
                address: collateral,
                new_liquidation_ratio: None,
                new_per_second_rate: None,
                new_debt_limit: None,
                new_accepted: None,
                new_usd_price: Some(new_price),
            });
        }

        /// Points the component at a different oracle component and method.
        pub fn set_oracle(&mut self, oracle_address: ComponentAddress, method_name: String) {
            self.oracle = Global::from(oracle_address);
            self.oracle_method_name = method_name.clone();

            Runtime::emit_event(EventSetOracle {
                oracle_address,
                method_name,
            });
        }

        /// Stops or starts opening and closing operations.
        pub fn set_stops(&mut self, stop_openings: bool, stop_closings: bool) {
            self.parameters.stop_openings = stop_openings;
            self.parameters.stop_closings = stop_closings;
        }

        /// Sets the minimum debt a position must carry.
        pub fn set_minimum_debt(&mut self, minimum_debt: Decimal) {
            self.parameters.minimum_debt = minimum_debt;
        }

        /// Sets the maximum length of the id vectors sharing a single ratio key.
        pub fn set_max_vector_length(&mut self, max_vector_length: u64) {
            self.parameters.max_vector_length = max_vector_length;
        }

        /// Takes the gUSD accrued as interest on a collateral out of its fee vault.
        pub fn collect_accrued_fees(&mut self, collateral_address: ResourceAddress) -> Bucket {
            assert!(
                self.collaterals.get(&collateral_address).is_some(),
                "Not a known collateral: {:?}",
                collateral_address
            );
            self.collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .accrued_fees
                .take_all()
        }

        /// Mints more controller badges.
        pub fn mint_controller_badge(&self, amount: Decimal) -> Bucket {
            self.controller_badge_manager.mint(amount)
        }

        //HELPER METHODS

        /// Folds the factor delta since a position's snapshot into its accumulated
        /// fees, stamps the position and re-keys it in the ratio tree. Returns the
        /// persisted position.
        fn synchronize_position(&mut self, position_id: u64) -> Position {
            let mut position: Position = self.get_position(position_id);
            let global_factor: Option<Decimal> = self
                .collaterals
                .get(&position.collateral_address)
                .unwrap()
                .interest_factor;

            if global_factor.is_some() {
                let position_factor: Decimal =
                    Decimal::ONE + (global_factor.unwrap() - position.interest_factor);
                if position_factor != Decimal::ONE {
                    let total_debt: Decimal = position.principal + position.accumulated_fees;
                    let accrued: Decimal =
                        self.round_product(total_debt, position_factor) - total_debt;
                    position.accumulated_fees += accrued;
                }
                position.interest_factor = global_factor.unwrap();
            } else {
                position.interest_factor = Decimal::ONE;
            }
            position.fees_updated = Clock::current_time_rounded_to_seconds();

            self.reindex_and_persist(position)
        }

        /// The single write path for positions: removes the position from the ratio
        /// tree under its stored key, recomputes the key from current price and debt,
        /// inserts it back and persists the position. Returns the written position.
        fn reindex_and_persist(&mut self, mut position: Position) -> Position {
            self.remove_ratio_entry(
                position.collateral_address,
                position.collateral_ratio,
                position.position_id,
            );
            position.collateral_ratio = self.position_ratio(
                position.collateral_address,
                position.collateral_amount,
                position.principal + position.accumulated_fees,
            );
            self.insert_ratio_entry(
                position.collateral_address,
                position.collateral_ratio,
                position.position_id,
            );
            self.positions
                .insert(position.position_id, position.clone());

            position
        }

        /// Computes the ratio key of a position. Zero debt maps to `Decimal::MAX` so
        /// debt-free positions sort behind every position with debt.
        fn position_ratio(
            &self,
            collateral_address: ResourceAddress,
            collateral_amount: Decimal,
            total_debt: Decimal,
        ) -> Decimal {
            if total_debt == Decimal::ZERO {
                return Decimal::MAX;
            }
            let usd_price: Decimal = self.collaterals.get(&collateral_address).unwrap().usd_price;

            usd_price * collateral_amount / total_debt
        }

        /// Panics if collateral of this amount cannot carry this debt at the
        /// collateral's liquidation ratio. Sitting exactly on the ratio passes.
        fn assert_ratio_safe(
            &self,
            collateral_address: ResourceAddress,
            position_id: u64,
            collateral_amount: Decimal,
            total_debt: Decimal,
        ) {
            let usd_price: Decimal = self.collaterals.get(&collateral_address).unwrap().usd_price;
            let liquidation_ratio: Decimal = self
                .collaterals
                .get(&collateral_address)
                .unwrap()
                .liquidation_ratio;
            assert!(
                usd_price * collateral_amount >= total_debt * liquidation_ratio,
                "Position {} would fall below the liquidation ratio of {} for collateral {:?}",
                position_id,
                liquidation_ratio,
                collateral_address
            );
        }

        /// Inserts a position id into the ratio tree of a collateral, appending to the
        /// id vector if the ratio key is already taken.
        fn insert_ratio_entry(
            &mut self,
            collateral_address: ResourceAddress,
            ratio: Decimal,
            position_id: u64,
        ) {
            if self
                .collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .ratios
                .get_mut(&ratio)
                .is_some()
            {
                let mut position_ids: Vec<u64> = self
                    .collaterals
                    .get_mut(&collateral_address)
                    .unwrap()
                    .ratios
                    .get_mut(&ratio)
                    .unwrap()
                    .to_vec();
                assert!(
                    position_ids.len() < self.parameters.max_vector_length.try_into().unwrap(),
                    "Too many positions sharing this ratio. Try a slightly different collateral or debt amount."
                );
                position_ids.push(position_id);
                self.collaterals
                    .get_mut(&collateral_address)
                    .unwrap()
                    .ratios
                    .insert(ratio, position_ids);
            } else {
                let position_ids: Vec<u64> = vec![position_id];
                self.collaterals
                    .get_mut(&collateral_address)
                    .unwrap()
                    .ratios
                    .insert(ratio, position_ids);
            }
        }

        /// Removes a position id from the ratio tree of a collateral, dropping the
        /// tree node when its id vector runs empty.
        fn remove_ratio_entry(
            &mut self,
            collateral_address: ResourceAddress,
            ratio: Decimal,
            position_id: u64,
        ) {
            let mut position_ids: Vec<u64> = self
                .collaterals
                .get_mut(&collateral_address)
                .unwrap()
                .ratios
                .get_mut(&ratio)
                .unwrap()
                .to_vec();
            position_ids.retain(|id| id != &position_id);

            if position_ids.is_empty() {
                self.collaterals
                    .get_mut(&collateral_address)
                    .unwrap()
                    .ratios
                    .remove(&ratio);
            } else {
                self.collaterals
                    .get_mut(&collateral_address)
                    .unwrap()
                    .ratios
                    .insert(ratio, position_ids);
            }
        }

        /// Credits an amount to a depositor's record on a position, creating the
        /// record if the depositor has none yet.
        fn add_to_deposits(
            &mut self,
            position_id: u64,
            depositor: ComponentAddress,
            amount: Decimal,
        ) {
            let max_vector_length: u64 = self.parameters.max_vector_length;
            let mut deposits = self.deposits.get_mut(&position_id).unwrap();

            for deposit in deposits.iter_mut() {
                if deposit.depositor == depositor {
                    deposit.amount += amount;
                    return;
                }
            }
            assert!(
                deposits.len() < max_vector_length.try_into().unwrap(),
                "Position {} cannot track more distinct depositors.",
                position_id
            );
            deposits.push(Deposit { depositor, amount });
        }

        /// Debits an amount from a depositor's record on a position, dropping the
        /// record once it runs empty.
        fn subtract_from_deposits(
            &mut self,
            position_id: u64,
            depositor: ComponentAddress,
            amount: Decimal,
        ) {
            let mut deposits = self.deposits.get_mut(&position_id).unwrap();
            for deposit in deposits.iter_mut() {
                if deposit.depositor == depositor {
                    deposit.amount -= amount;
                    break;
                }
            }
            deposits.retain(|deposit| deposit.amount > Decimal::ZERO);
        }

        /// Looks up the amount a depositor has deposited on a position.
        fn deposit_amount_of(
            &self,
            position_id: u64,
            depositor: ComponentAddress,
        ) -> Option<Decimal> {
            self.deposits.get(&position_id).and_then(|deposits| {
                deposits
                    .iter()
                    .find(|deposit| deposit.depositor == depositor)
                    .map(|deposit| deposit.amount)
            })
        }

        /// Deletes a position and all records tied to it once both its collateral and
        /// its debt are zero.
        fn close_position_if_empty(&mut self, position: Position) {
            if position.collateral_amount == Decimal::ZERO
                && position.principal + position.accumulated_fees == Decimal::ZERO
            {
                self.remove_ratio_entry(
                    position.collateral_address,
                    position.collateral_ratio,
                    position.position_id,
                );
                self.positions.remove(&position.position_id);
                self.position_ids.remove(&PositionKey {
                    owner: position.owner,
                    collateral_address: position.collateral_address,
                });
                self.deposits.remove(&position.position_id);

                Runtime::emit_event(EventClosePosition {
                    position_id: position.position_id,
                });
            }
        }

        /// Multiplies two decimals in 36-decimal precision and rounds the product back
        /// to 18 decimal places, half to even.
        fn round_product(&self, amount: Decimal, factor: Decimal) -> Decimal {
            let product: PreciseDecimal = PreciseDecimal::from(amount)
                .checked_mul(PreciseDecimal::from(factor))
                .unwrap();

            Decimal::try_from(
                product
                    .checked_round(18, RoundingMode::ToNearestMidpointToEven)
                    .unwrap(),
            )
            .unwrap()
        }

        /// Tells whether `value` is an exact multiple of `divisor`, compared on the
        /// underlying atto units.
        fn is_divisible_by(&self, value: Decimal, divisor: Decimal) -> bool {
            value.attos() % divisor.attos() == I192::from(0)
        }
    }
}

/// All information the protocol keeps about a single collateral resource
#[derive(ScryptoSbor)]
pub struct CollateralInfo {
    /// The collateral's resource address
    pub resource_address: ResourceAddress,
    /// Market identifier used for oracle price lookups
    pub market_id: String,
    /// Latest stored USD price of the collateral
    pub usd_price: Decimal,
    /// Minimum collateral value to debt ratio before liquidation
    pub liquidation_ratio: Decimal,
    /// Per-second compounding interest mantissa
    pub per_second_rate: Decimal,
    /// Maximum gUSD principal that may be drawn against this collateral
    pub debt_limit: Decimal,
    /// Whether new positions and debt draws are accepted
    pub accepted: bool,
    /// Total gUSD debt owed against this collateral, fees included
    pub total_principal: Decimal,
    /// Total amount of this collateral held across all positions
    pub collateral_amount: Decimal,
    /// Global interest factor, None until interest first accrues
    pub interest_factor: Option<Decimal>,
    /// Unix timestamp of the last accrual, None until first touched
    pub previous_accrual_time: Option<i64>,
    /// Vault holding the collateral backing all positions
    pub vault: Vault,
    /// Vault holding gUSD minted as interest and not yet collected
    pub accrued_fees: Vault,
    /// Live positions keyed by collateral value to debt ratio, ascending
    pub ratios: AvlTree<Decimal, Vec<u64>>,
}

/// Protocol-wide parameters
#[derive(ScryptoSbor)]
pub struct ProtocolParameters {
    /// Minimum debt a position must carry
    pub minimum_debt: Decimal,
    /// Maximum length of id vectors sharing a ratio key, and of deposit vectors
    pub max_vector_length: u64,
    /// Stops opening positions, adding collateral and drawing debt when true
    pub stop_openings: bool,
    /// Stops withdrawing collateral when true
    pub stop_closings: bool,
}
