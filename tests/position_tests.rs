use helper::Helper;

use scrypto_test::prelude::*;

#[test]
fn test_open_position() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;

    // Open a position with 1000 XRD backing 500 gUSD of debt
    let gusd = helper.open_xrd_position(alice, dec!(1000), dec!(500))?;
    helper.assert_bucket_eq(&gusd, helper.gusd_address, dec!(500))?;

    let position = helper.get_position(1)?;
    assert_eq!(position.position_id, 1);
    assert_eq!(position.owner, alice);
    assert_eq!(position.collateral_address, helper.xrd_address);
    assert_eq!(position.collateral_amount, dec!(1000));
    assert_eq!(position.principal, dec!(500));
    assert_eq!(position.accumulated_fees, dec!(0));
    assert_eq!(position.interest_factor, dec!(1));
    assert_eq!(position.collateral_ratio, dec!(2));

    // The owner's full collateral is recorded as a single deposit
    let deposits = helper.get_deposits(1)?;
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].depositor, alice);
    assert_eq!(deposits[0].amount, dec!(1000));

    // The position sits in the ratio tree under its ratio of 2
    let entries = helper.xrd_ratio_entries()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, dec!(2));
    assert_eq!(entries[0].1, vec![1u64]);

    let info = helper.xrd_collateral_info()?;
    assert_eq!(info.total_principal, dec!(500));
    assert_eq!(info.collateral_amount, dec!(1000));
    assert_eq!(info.vault, dec!(1000));

    let circulating = helper.girder.get_circulating_gusd(&mut helper.env)?;
    assert_eq!(circulating, dec!(500));

    Ok(())
}

#[test]
fn test_open_position_enforces_minimum_debt() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;

    let result = helper.open_xrd_position(alice, dec!(1000), dec!(0.5));
    assert!(result.is_err(), "Debt below the protocol minimum should fail");

    Ok(())
}

#[test]
fn test_open_position_enforces_liquidation_ratio() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;

    // 100 XRD at price 1 carries at most 100 / 1.5 of debt
    let result = helper.open_xrd_position(alice, dec!(100), dec!(67));
    assert!(result.is_err(), "Opening below the liquidation ratio should fail");

    // Sitting exactly on the ratio passes
    let gusd = helper.open_xrd_position(alice, dec!(150), dec!(100))?;
    helper.assert_bucket_eq(&gusd, helper.gusd_address, dec!(100))?;

    Ok(())
}

#[test]
fn test_one_position_per_owner_per_collateral() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;
    let bob = helper.bob;

    helper.open_xrd_position(alice, dec!(1000), dec!(500))?;

    let result = helper.open_xrd_position(alice, dec!(1000), dec!(500));
    assert!(result.is_err(), "Second XRD position for the same owner should fail");

    // A different collateral or a different owner is fine
    let steel = helper.steel.take(dec!(1000), &mut helper.env)?;
    helper
        .girder
        .open_position(alice, steel, dec!(500), &mut helper.env)?;
    helper.open_xrd_position(bob, dec!(1000), dec!(500))?;

    Ok(())
}

#[test]
fn test_deposit_merges_depositor_records() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;
    let bob = helper.bob;

    helper.open_xrd_position(alice, dec!(100), dec!(50))?;

    // Three deposits by the same depositor collapse into one record
    helper.deposit_xrd(alice, bob, dec!(10))?;
    helper.deposit_xrd(alice, bob, dec!(10))?;
    helper.deposit_xrd(alice, bob, dec!(10))?;

    let position = helper.get_position(1)?;
    assert_eq!(position.collateral_amount, dec!(130));

    let deposits = helper.get_deposits(1)?;
    assert_eq!(deposits.len(), 2);
    let bob_deposit = deposits
        .iter()
        .find(|deposit| deposit.depositor == bob)
        .unwrap();
    assert_eq!(bob_deposit.amount, dec!(30));

    // Deposit records always add up to the position's collateral
    let sum: Decimal = deposits
        .iter()
        .map(|deposit| deposit.amount)
        .fold(Decimal::ZERO, |acc, amount| acc + amount);
    assert_eq!(sum, position.collateral_amount);

    let info = helper.xrd_collateral_info()?;
    assert_eq!(info.vault, dec!(130));

    Ok(())
}

#[test]
fn test_deposit_requires_existing_position() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;
    let bob = helper.bob;

    let result = helper.deposit_xrd(bob, alice, dec!(10));
    assert!(result.is_err(), "Depositing to an owner without a position should fail");

    Ok(())
}

#[test]
fn test_withdraw_limited_to_own_deposit() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;
    let bob = helper.bob;

    helper.open_xrd_position(alice, dec!(100), dec!(1))?;
    helper.deposit_xrd(alice, bob, dec!(30))?;

    // Bob can take his full deposit back out
    let withdrawn = helper.withdraw_xrd(alice, bob, dec!(30))?;
    helper.assert_bucket_eq(&withdrawn, helper.xrd_address, dec!(30))?;

    // But no more than his own record, no matter how much the position holds
    helper.deposit_xrd(alice, bob, dec!(30))?;
    let result = helper.withdraw_xrd(alice, bob, dec!(31));
    assert!(
        result.is_err(),
        "Withdrawing more than the depositor's own record should fail"
    );

    // And a depositor without a record cannot withdraw at all
    let charlie = helper.create_account()?;
    let result = helper.withdraw_xrd(alice, charlie, dec!(1));
    assert!(result.is_err(), "Withdrawing without a deposit record should fail");

    Ok(())
}

#[test]
fn test_withdraw_boundary_exact() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;

    // 50 gUSD of debt at a liquidation ratio of 1.5 needs 75 XRD at price 1
    helper.open_xrd_position(alice, dec!(100), dec!(50))?;

    // Withdrawing down to exactly the required 75 passes
    let withdrawn = helper.withdraw_xrd(alice, alice, dec!(25))?;
    helper.assert_bucket_eq(&withdrawn, helper.xrd_address, dec!(25))?;

    // One atto more fails
    let result = helper.withdraw_xrd(alice, alice, dec!(0.000000000000000001));
    assert!(result.is_err(), "Withdrawing past the liquidation ratio should fail");

    Ok(())
}

#[test]
fn test_withdraw_respects_divisibility() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;

    let coarse: Bucket = ResourceBuilder::new_fungible(OwnerRole::None)
        .divisibility(2)
        .mint_initial_supply(1000, &mut helper.env)?
        .into();
    let coarse_address = coarse.resource_address(&mut helper.env)?;

    helper.env.disable_auth_module();
    helper.girder.new_collateral(
        coarse_address,
        "COARSE".to_string(),
        dec!(1),
        dec!(1.5),
        Decimal::ONE,
        dec!(1000000),
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();

    let collateral = coarse.take(dec!(100), &mut helper.env)?;
    helper
        .girder
        .open_position(alice, collateral, dec!(10), &mut helper.env)?;

    let result = helper
        .girder
        .withdraw_collateral(alice, alice, coarse_address, dec!(0.005), &mut helper.env);
    assert!(result.is_err(), "Withdrawal below the divisibility should fail");

    let withdrawn = helper
        .girder
        .withdraw_collateral(alice, alice, coarse_address, dec!(0.01), &mut helper.env)?;
    helper.assert_bucket_eq(&withdrawn, coarse_address, dec!(0.01))?;

    Ok(())
}

#[test]
fn test_stops_block_operations() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;
    let bob = helper.bob;

    let gusd = helper.open_xrd_position(alice, dec!(1000), dec!(500))?;

    helper.set_stops(true, true)?;

    let result = helper.open_xrd_position(bob, dec!(1000), dec!(500));
    assert!(result.is_err(), "Opening should be stopped");
    let result = helper.deposit_xrd(alice, bob, dec!(10));
    assert!(result.is_err(), "Depositing should be stopped");
    let result = helper.draw_xrd_debt(alice, dec!(10));
    assert!(result.is_err(), "Drawing debt should be stopped");
    let result = helper.withdraw_xrd(alice, alice, dec!(10));
    assert!(result.is_err(), "Withdrawing should be stopped");

    // Repaying stays possible so users can always reduce their risk
    let payment = gusd.take(dec!(100), &mut helper.env)?;
    helper.repay_xrd_debt(alice, payment)?;

    helper.set_stops(false, false)?;
    helper.deposit_xrd(alice, bob, dec!(10))?;
    let withdrawn = helper.withdraw_xrd(alice, alice, dec!(10))?;
    helper.assert_bucket_eq(&withdrawn, helper.xrd_address, dec!(10))?;

    Ok(())
}

#[test]
fn test_draw_debt() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;

    helper.open_xrd_position(alice, dec!(1000), dec!(500))?;

    let gusd = helper.draw_xrd_debt(alice, dec!(100))?;
    helper.assert_bucket_eq(&gusd, helper.gusd_address, dec!(100))?;

    let position = helper.get_position(1)?;
    assert_eq!(position.principal, dec!(600));

    // The ratio tree is re-keyed to the new debt
    let entries = helper.xrd_ratio_entries()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, dec!(1000) / dec!(600));

    // 1000 of collateral value carries at most 1000 / 1.5 of debt
    let result = helper.draw_xrd_debt(alice, dec!(100));
    assert!(result.is_err(), "Drawing past the liquidation ratio should fail");

    Ok(())
}

#[test]
fn test_draw_debt_respects_debt_limit() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;

    helper.open_xrd_position(alice, dec!(10000), dec!(500))?;

    helper.env.disable_auth_module();
    helper.girder.edit_collateral(
        helper.xrd_address,
        None,
        None,
        Some(dec!(550)),
        None,
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();

    let result = helper.draw_xrd_debt(alice, dec!(51));
    assert!(result.is_err(), "Drawing past the debt limit should fail");

    let gusd = helper.draw_xrd_debt(alice, dec!(50))?;
    helper.assert_bucket_eq(&gusd, helper.gusd_address, dec!(50))?;

    Ok(())
}

#[test]
fn test_repay_enforces_minimum_remaining_debt() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;
    let bob = helper.bob;

    let gusd = helper.open_xrd_position(alice, dec!(100), dec!(50))?;
    // Bob's debt funds the failing attempt, since a bucket passed into a failed
    // call is not returned by the test environment
    let bob_gusd = helper.open_xrd_position(bob, dec!(1000), dec!(500))?;

    // Leaving 0.5 of debt behind is below the minimum of 1
    let payment = bob_gusd.take(dec!(49.5), &mut helper.env)?;
    let result = helper.repay_xrd_debt(alice, payment);
    assert!(
        result.is_err(),
        "Leaving debt below the protocol minimum should fail"
    );

    // Leaving exactly the minimum passes
    let payment = gusd.take(dec!(49), &mut helper.env)?;
    helper.repay_xrd_debt(alice, payment)?;
    let position = helper.get_position(1)?;
    assert_eq!(position.principal, dec!(1));

    // And a full repayment passes
    helper.repay_xrd_debt(alice, gusd)?;
    let position = helper.get_position(1)?;
    assert_eq!(position.principal, dec!(0));

    Ok(())
}

#[test]
fn test_repay_rejects_other_tokens() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;

    helper.open_xrd_position(alice, dec!(100), dec!(50))?;

    let payment = helper.xrd.take(dec!(50), &mut helper.env)?;
    let result = helper.repay_xrd_debt(alice, payment);
    assert!(result.is_err(), "Repaying with anything but gUSD should fail");

    Ok(())
}

#[test]
fn test_position_closes_after_full_exit() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;

    let gusd = helper.open_xrd_position(alice, dec!(100), dec!(50))?;

    // Repay everything, then take all collateral back out
    helper.repay_xrd_debt(alice, gusd)?;
    let withdrawn = helper.withdraw_xrd(alice, alice, dec!(100))?;
    helper.assert_bucket_eq(&withdrawn, helper.xrd_address, dec!(100))?;

    // The position and all records tied to it are gone
    let result = helper.get_position(1);
    assert!(result.is_err(), "A fully exited position should be deleted");
    let entries = helper.xrd_ratio_entries()?;
    assert!(entries.is_empty());

    // The owner can open a fresh position for the same collateral again
    helper.open_xrd_position(alice, dec!(100), dec!(50))?;
    let position = helper.get_xrd_position(alice)?;
    assert_eq!(position.position_id, 2);

    Ok(())
}

#[test]
fn test_zero_debt_positions_sort_last() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;
    let bob = helper.bob;

    let gusd = helper.open_xrd_position(alice, dec!(100), dec!(50))?;
    helper.repay_xrd_debt(alice, gusd)?;
    helper.open_xrd_position(bob, dec!(90), dec!(50))?;

    // Debt-free positions are keyed at Decimal::MAX, behind every indebted one
    let found = helper
        .girder
        .get_positions_by_ratio(helper.xrd_address, 10, None, &mut helper.env)?;
    assert_eq!(found.len(), 2);
    assert_eq!(found[0], (dec!(1.8), 2));
    assert_eq!(found[1], (Decimal::MAX, 1));

    // The walk stops early once enough entries are found
    let found = helper
        .girder
        .get_positions_by_ratio(helper.xrd_address, 1, None, &mut helper.env)?;
    assert_eq!(found, vec![(dec!(1.8), 2)]);

    // And can be restarted from any ratio key
    let found = helper
        .girder
        .get_positions_by_ratio(helper.xrd_address, 10, Some(dec!(2)), &mut helper.env)?;
    assert_eq!(found, vec![(Decimal::MAX, 1)]);

    Ok(())
}

#[test]
fn test_index_rekeys_on_sync_after_price_change() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;

    helper.open_xrd_position(alice, dec!(100), dec!(50))?;

    // A price change leaves stored keys alone until positions are touched
    helper.change_collateral_price(helper.xrd_address, dec!(2))?;
    let entries = helper.xrd_ratio_entries()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, dec!(2));

    // Synchronizing re-keys the position at the current price
    helper.girder.synchronize_interest(1, &mut helper.env)?;
    let entries = helper.xrd_ratio_entries()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, dec!(4));
    assert_eq!(entries[0].1, vec![1u64]);

    let position = helper.get_position(1)?;
    assert_eq!(position.collateral_ratio, dec!(4));

    Ok(())
}

#[test]
fn test_positions_share_a_ratio_key() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;
    let bob = helper.bob;

    // Same ratio of 2 for both positions
    helper.open_xrd_position(alice, dec!(100), dec!(50))?;
    helper.open_xrd_position(bob, dec!(200), dec!(100))?;

    let entries = helper.xrd_ratio_entries()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1, vec![1u64, 2u64]);

    // Withdrawing moves only the touched position to its new key
    helper.withdraw_xrd(bob, bob, dec!(20))?;
    let entries = helper.xrd_ratio_entries()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, dec!(1.8));
    assert_eq!(entries[0].1, vec![2u64]);
    assert_eq!(entries[1].0, dec!(2));
    assert_eq!(entries[1].1, vec![1u64]);

    Ok(())
}

#[test]
fn test_collateral_conservation_across_depositors() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alice = helper.alice;
    let bob = helper.bob;
    let charlie = helper.create_account()?;

    helper.open_xrd_position(alice, dec!(100), dec!(50))?;
    helper.deposit_xrd(alice, bob, dec!(40))?;
    helper.withdraw_xrd(alice, bob, dec!(15))?;
    helper.deposit_xrd(alice, charlie, dec!(5))?;

    let position = helper.get_position(1)?;
    let deposits = helper.get_deposits(1)?;
    let sum: Decimal = deposits
        .iter()
        .map(|deposit| deposit.amount)
        .fold(Decimal::ZERO, |acc, amount| acc + amount);

    assert_eq!(position.collateral_amount, dec!(130));
    assert_eq!(sum, position.collateral_amount);

    let info = helper.xrd_collateral_info()?;
    assert_eq!(info.vault, dec!(130));
    assert_eq!(info.collateral_amount, dec!(130));

    Ok(())
}
