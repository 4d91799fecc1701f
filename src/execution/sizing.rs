use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::models::{ContractSpec, SizingResult};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SizingError {
    #[error("invalid sizing input: {0}")]
    InvalidInput(String),
    #[error("arithmetic overflow while sizing")]
    Overflow,
}

/// Converts a target notional into an exchange-compliant contract quantity
///
/// Quantities are computed in exact decimal arithmetic and rounded down to
/// the size increment, so the submitted notional never exceeds the target.
/// A floor below the minimum size is raised to the smallest increment
/// multiple at or above it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionSizer;

impl PositionSizer {
    pub fn new() -> Self {
        Self
    }

    /// Size an order, substituting the minimal default on failure
    pub fn size(
        &self,
        price: f64,
        target_notional: f64,
        spec: &ContractSpec,
        leverage: u32,
    ) -> SizingResult {
        match self.try_size(price, target_notional, spec, leverage) {
            Ok(result) => {
                tracing::debug!(
                    "Sized {} contracts, notional {:.4} USDT, margin {:.4} USDT",
                    result.contracts,
                    result.notional,
                    result.required_margin
                );
                result
            }
            Err(e) => {
                tracing::warn!("Position sizing failed: {}, using minimal default", e);
                default_sizing(price, spec, leverage)
            }
        }
    }

    pub fn try_size(
        &self,
        price: f64,
        target_notional: f64,
        spec: &ContractSpec,
        leverage: u32,
    ) -> Result<SizingResult, SizingError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(SizingError::InvalidInput(format!("price {}", price)));
        }
        if !target_notional.is_finite() || target_notional <= 0.0 {
            return Err(SizingError::InvalidInput(format!("target notional {}", target_notional)));
        }
        if leverage == 0 {
            return Err(SizingError::InvalidInput("leverage 0".to_string()));
        }
        if spec.contract_value <= Decimal::ZERO || spec.size_increment <= Decimal::ZERO {
            return Err(SizingError::InvalidInput(format!(
                "contract value {} / size increment {}",
                spec.contract_value, spec.size_increment
            )));
        }

        let price_d = Decimal::from_f64(price).ok_or(SizingError::Overflow)?;
        let target_d = Decimal::from_f64(target_notional).ok_or(SizingError::Overflow)?;

        let per_contract = spec
            .contract_value
            .checked_mul(price_d)
            .ok_or(SizingError::Overflow)?;
        let needed = target_d
            .checked_div(per_contract)
            .ok_or(SizingError::Overflow)?;

        let contracts = quantize(needed, spec.size_increment, spec.min_size)?;

        let notional_d = contracts
            .checked_mul(per_contract)
            .ok_or(SizingError::Overflow)?;
        let notional = notional_d.to_f64().ok_or(SizingError::Overflow)?;

        Ok(SizingResult {
            contracts,
            notional,
            required_margin: notional / leverage as f64,
            is_default: false,
        })
    }
}

/// Floor to `increment`, then lift to the first multiple at or above `min_size`
fn quantize(raw: Decimal, increment: Decimal, min_size: Decimal) -> Result<Decimal, SizingError> {
    let steps = raw.checked_div(increment).ok_or(SizingError::Overflow)?.floor();
    let floored = steps.checked_mul(increment).ok_or(SizingError::Overflow)?;

    if floored >= min_size {
        return Ok(floored.normalize());
    }

    let min_steps = min_size
        .checked_div(increment)
        .ok_or(SizingError::Overflow)?
        .ceil()
        .max(Decimal::ONE);
    let lifted = min_steps.checked_mul(increment).ok_or(SizingError::Overflow)?;
    Ok(lifted.normalize())
}

/// Minimal sizing used when the real computation fails
///
/// Flagged `is_default` so the engine refuses to open on it.
pub fn default_sizing(price: f64, spec: &ContractSpec, leverage: u32) -> SizingResult {
    let contracts = if spec.min_size > Decimal::ZERO {
        spec.min_size
    } else {
        ContractSpec::default().min_size
    };
    let price = if price.is_finite() && price > 0.0 { price } else { 0.0 };
    let notional = spec.notional(contracts.to_f64().unwrap_or(0.0), price);

    SizingResult {
        contracts,
        notional,
        required_margin: notional / leverage.max(1) as f64,
        is_default: true,
    }
}
