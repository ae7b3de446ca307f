//! Stock decrements and the low-stock edge.

use super::error::ScheduleError;
use crate::models::Medicine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDecrement {
    pub new_stock: u32,
    /// True only on the transition into the at-or-below-threshold range —
    /// one caregiver alert per crossing, not one per dose. Restocking above
    /// the threshold re-arms it.
    pub low_stock_triggered: bool,
}

/// Apply one taken dose to the medicine's stock.
///
/// Fails with `OutOfStock` at 0 — the caller surfaces "out of stock" instead
/// of driving the count negative.
pub fn decrement(medicine: &Medicine) -> Result<StockDecrement, ScheduleError> {
    if medicine.stock == 0 {
        return Err(ScheduleError::OutOfStock(medicine.id));
    }
    let new_stock = medicine.stock - 1;
    let low_stock_triggered =
        medicine.stock > medicine.low_stock_threshold && new_stock <= medicine.low_stock_threshold;
    Ok(StockDecrement {
        new_stock,
        low_stock_triggered,
    })
}
