use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Confidence, SizingResult};

/// Pre-submission bounds every opening order must satisfy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub margin_usage_cap: f64,
    pub max_position_value: f64,
    pub min_trade_value: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            margin_usage_cap: 0.6,      // 60% of available balance
            max_position_value: 100.0,  // USDT notional
            min_trade_value: 3.0,       // Below this the trade is dust
        }
    }
}

/// Inputs for one gate evaluation, all read live this cycle
#[derive(Debug, Clone, Copy)]
pub struct ExposureCheck<'a> {
    pub confidence: Confidence,
    pub sizing: &'a SizingResult,
    pub available_balance: f64,
    /// Notional already held in the direction being added to
    pub existing_same_side_notional: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskGateTrip {
    LowConfidence,
    DefaultSizing,
    InsufficientMargin { required: f64, allowed: f64 },
    AboveMaxPosition { notional: f64, max: f64 },
    BelowMinTrade { notional: f64, min: f64 },
    CombinedExposure { combined: f64, max: f64 },
}

impl fmt::Display for RiskGateTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskGateTrip::LowConfidence => write!(f, "low confidence signal"),
            RiskGateTrip::DefaultSizing => write!(f, "sizing fell back to defaults"),
            RiskGateTrip::InsufficientMargin { required, allowed } => write!(
                f,
                "margin {:.4} USDT exceeds allowed {:.4} USDT",
                required, allowed
            ),
            RiskGateTrip::AboveMaxPosition { notional, max } => write!(
                f,
                "notional {:.4} USDT above max position value {:.2}",
                notional, max
            ),
            RiskGateTrip::BelowMinTrade { notional, min } => write!(
                f,
                "notional {:.4} USDT below minimum trade value {:.2}",
                notional, min
            ),
            RiskGateTrip::CombinedExposure { combined, max } => write!(
                f,
                "combined notional {:.4} USDT above max position value {:.2}",
                combined, max
            ),
        }
    }
}

impl RiskLimits {
    pub fn check(&self, input: &ExposureCheck<'_>) -> Result<(), RiskGateTrip> {
        // Check confidence
        if input.confidence == Confidence::Low {
            return Err(RiskGateTrip::LowConfidence);
        }

        // Default sizing means the instrument data was unusable
        if input.sizing.is_default {
            return Err(RiskGateTrip::DefaultSizing);
        }

        // Check margin against live balance
        let allowed = input.available_balance * self.margin_usage_cap;
        if input.sizing.required_margin > allowed {
            return Err(RiskGateTrip::InsufficientMargin {
                required: input.sizing.required_margin,
                allowed,
            });
        }

        // Check notional bounds
        let notional = input.sizing.notional;
        if notional > self.max_position_value {
            return Err(RiskGateTrip::AboveMaxPosition {
                notional,
                max: self.max_position_value,
            });
        }
        if notional < self.min_trade_value {
            return Err(RiskGateTrip::BelowMinTrade {
                notional,
                min: self.min_trade_value,
            });
        }

        // Check combined exposure when adding to a position
        if let Some(existing) = input.existing_same_side_notional {
            let combined = existing + notional;
            if combined > self.max_position_value {
                return Err(RiskGateTrip::CombinedExposure {
                    combined,
                    max: self.max_position_value,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn sizing(notional: f64, margin: f64) -> SizingResult {
        SizingResult {
            contracts: Decimal::new(5, 1),
            notional,
            required_margin: margin,
            is_default: false,
        }
    }

    fn check(confidence: Confidence, sizing: &SizingResult, balance: f64) -> Result<(), RiskGateTrip> {
        RiskLimits::default().check(&ExposureCheck {
            confidence,
            sizing,
            available_balance: balance,
            existing_same_side_notional: None,
        })
    }

    #[test]
    fn test_gates_pass() {
        let s = sizing(5.0, 0.5);
        assert!(check(Confidence::High, &s, 10.0).is_ok());
        assert!(check(Confidence::Medium, &s, 10.0).is_ok());
    }

    #[test]
    fn test_low_confidence_always_trips() {
        let s = sizing(5.0, 0.5);
        assert_eq!(check(Confidence::Low, &s, 1_000.0), Err(RiskGateTrip::LowConfidence));
    }

    #[test]
    fn test_margin_cap() {
        // 60% of 1.0 is 0.6
        let s = sizing(5.0, 0.61);
        assert!(matches!(
            check(Confidence::High, &s, 1.0),
            Err(RiskGateTrip::InsufficientMargin { .. })
        ));

        let s = sizing(5.0, 0.6);
        assert!(check(Confidence::High, &s, 1.0).is_ok());
    }

    #[test]
    fn test_notional_bounds() {
        assert!(matches!(
            check(Confidence::High, &sizing(150.0, 1.0), 100.0),
            Err(RiskGateTrip::AboveMaxPosition { .. })
        ));
        assert!(matches!(
            check(Confidence::High, &sizing(2.5, 0.25), 100.0),
            Err(RiskGateTrip::BelowMinTrade { .. })
        ));
    }

    #[test]
    fn test_combined_exposure() {
        let s = sizing(30.0, 3.0);
        let input = ExposureCheck {
            confidence: Confidence::High,
            sizing: &s,
            available_balance: 100.0,
            existing_same_side_notional: Some(80.0),
        };

        assert_eq!(
            RiskLimits::default().check(&input),
            Err(RiskGateTrip::CombinedExposure { combined: 110.0, max: 100.0 })
        );
    }

    #[test]
    fn test_default_sizing_is_refused() {
        let mut s = sizing(5.0, 0.5);
        s.is_default = true;
        assert_eq!(check(Confidence::High, &s, 100.0), Err(RiskGateTrip::DefaultSizing));
    }
}
