//! Weighted allocation of fate tickets to vendors.

use thiserror::Error;

use super::types::{TicketStub, VendorWeight};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    /// The weights sum to zero, so no tickets would be produced.
    #[error("invalid allocation: total weight is zero")]
    InvalidAllocation,
}

/// Sum of all vendor weights, saturating at `u32::MAX`.
pub fn total_weight(weights: &[VendorWeight]) -> u32 {
    weights
        .iter()
        .fold(0u32, |acc, w| acc.saturating_add(w.weight))
}

/// Expand vendor weights into one stub per unit of weight.
///
/// Stubs come out vendor-major in input order; positioning happens later in
/// [`arrange_non_adjacent`](super::shuffle::arrange_non_adjacent).
pub fn allocate(weights: &[VendorWeight]) -> Result<Vec<TicketStub>, AllocationError> {
    let total = total_weight(weights);
    if total == 0 {
        return Err(AllocationError::InvalidAllocation);
    }

    let mut stubs = Vec::with_capacity(total as usize);
    for vendor in weights {
        for _ in 0..vendor.weight {
            stubs.push(TicketStub {
                shop_id: vendor.shop_id.clone(),
            });
        }
    }

    Ok(stubs)
}
