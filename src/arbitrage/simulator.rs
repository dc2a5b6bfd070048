use bigdecimal::{BigDecimal, Zero};

use crate::{
    error::ScanError,
    types::{FillResult, Ladder, SizeUnit, TradeSide},
};

/// Walks `ladder` from the best level outward until `target_quantity` base
/// units are filled or the depth runs out.
pub fn simulate(
    ladder: &Ladder,
    side: TradeSide,
    target_quantity: &BigDecimal,
) -> Result<FillResult, ScanError> {
    validate(ladder, side, target_quantity)?;

    let mut remaining = target_quantity.clone();
    let mut filled_quantity = BigDecimal::zero();
    let mut filled_notional = BigDecimal::zero();
    let mut levels_consumed = 0usize;

    for level in ladder.levels() {
        if remaining <= BigDecimal::zero() {
            break;
        }
        let take = if level.quantity < remaining {
            level.quantity.clone()
        } else {
            remaining.clone()
        };
        filled_notional += &take * &level.price;
        filled_quantity += &take;
        remaining -= &take;
        levels_consumed += 1;
    }

    Ok(fill_result(
        side,
        target_quantity,
        SizeUnit::Base,
        filled_quantity,
        filled_notional,
        remaining > BigDecimal::zero(),
        levels_consumed,
    ))
}

/// Quote-denominated variant: spends (buy) or raises (sell) up to
/// `target_notional` quote units.
pub fn simulate_notional(
    ladder: &Ladder,
    side: TradeSide,
    target_notional: &BigDecimal,
) -> Result<FillResult, ScanError> {
    validate(ladder, side, target_notional)?;

    let mut remaining = target_notional.clone();
    let mut filled_quantity = BigDecimal::zero();
    let mut filled_notional = BigDecimal::zero();
    let mut levels_consumed = 0usize;

    for level in ladder.levels() {
        if remaining <= BigDecimal::zero() {
            break;
        }
        let level_notional = &level.price * &level.quantity;
        let (take_quantity, take_notional) = if level_notional < remaining {
            (level.quantity.clone(), level_notional)
        } else {
            (&remaining / &level.price, remaining.clone())
        };
        filled_quantity += &take_quantity;
        filled_notional += &take_notional;
        remaining -= &take_notional;
        levels_consumed += 1;
    }

    Ok(fill_result(
        side,
        target_notional,
        SizeUnit::Quote,
        filled_quantity,
        filled_notional,
        remaining > BigDecimal::zero(),
        levels_consumed,
    ))
}

fn validate(ladder: &Ladder, side: TradeSide, target: &BigDecimal) -> Result<(), ScanError> {
    if *target <= BigDecimal::zero() {
        return Err(ScanError::InvalidSimulationInput(format!(
            "target must be positive, got {}",
            target
        )));
    }
    if ladder.is_empty() || ladder.total_quantity() <= BigDecimal::zero() {
        return Err(ScanError::InvalidSimulationInput(format!(
            "no depth available to {}",
            side
        )));
    }
    Ok(())
}

fn fill_result(
    side: TradeSide,
    requested: &BigDecimal,
    requested_unit: SizeUnit,
    filled_quantity: BigDecimal,
    filled_notional: BigDecimal,
    exhausted: bool,
    levels_consumed: usize,
) -> FillResult {
    let average_price = if filled_quantity > BigDecimal::zero() {
        &filled_notional / &filled_quantity
    } else {
        BigDecimal::zero()
    };

    FillResult {
        side,
        requested: requested.clone(),
        requested_unit,
        average_price,
        filled_quantity,
        filled_notional,
        exhausted,
        levels_consumed,
    }
}
