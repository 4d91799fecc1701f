// Core modules
pub mod bot;
pub mod config;
pub mod exchange;
pub mod execution;
pub mod history;
pub mod indicators;
pub mod models;
pub mod oracle;
pub mod retry;
pub mod risk;
pub mod scheduler;
pub mod setup;
pub mod strategy;

// Re-export commonly used types
pub use bot::{CycleReport, TradingBot};
pub use models::*;
pub use scheduler::CycleScheduler;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
