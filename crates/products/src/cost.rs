//! Weighted-average stock costing.

use shopledger_core::money::div_round_half_up;
use shopledger_core::{Amount, DomainError, DomainResult, Quantity};

/// Merge incoming stock into existing stock.
///
/// Returns `(new_qty, new_cost)` where `new_cost` is the quantity-weighted
/// average of both costs, rounded half-up to the smallest currency unit.
/// When the merged quantity is zero the existing cost is returned unchanged.
///
/// Inputs are expected to be non-negative; use [`merge_stock_checked`] at
/// any boundary where that is not already guaranteed.
pub fn merge_stock(
    existing_qty: Quantity,
    existing_cost: Amount,
    incoming_qty: Quantity,
    incoming_cost: Amount,
) -> (Quantity, Amount) {
    let new_qty = existing_qty.saturating_add(incoming_qty);
    if new_qty == 0 {
        return (new_qty, existing_cost);
    }

    let value = existing_qty as i128 * existing_cost as i128
        + incoming_qty as i128 * incoming_cost as i128;
    let new_cost = div_round_half_up(value, new_qty as i128).unwrap_or(existing_cost);
    (new_qty, new_cost)
}

/// [`merge_stock`] with input validation.
///
/// Negative quantities or costs fail with `InvalidQuantity` before any
/// arithmetic runs.
pub fn merge_stock_checked(
    entity: &str,
    existing_qty: Quantity,
    existing_cost: Amount,
    incoming_qty: Quantity,
    incoming_cost: Amount,
) -> DomainResult<(Quantity, Amount)> {
    if incoming_qty < 0 {
        return Err(DomainError::invalid_quantity(
            entity,
            format!("incoming quantity {incoming_qty} is negative"),
        ));
    }
    if existing_qty < 0 {
        return Err(DomainError::invalid_quantity(
            entity,
            format!("existing quantity {existing_qty} is negative"),
        ));
    }
    if incoming_cost < 0 || existing_cost < 0 {
        return Err(DomainError::validation(format!(
            "{entity}: unit cost cannot be negative"
        )));
    }
    if existing_qty.checked_add(incoming_qty).is_none() {
        return Err(DomainError::invalid_quantity(entity, "merged quantity overflows"));
    }
    Ok(merge_stock(existing_qty, existing_cost, incoming_qty, incoming_cost))
}
