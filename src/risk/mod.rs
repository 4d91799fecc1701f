// Risk management module
pub mod gates;

pub use gates::{ExposureCheck, RiskGateTrip, RiskLimits};
