// Account state, position sizing and order execution
pub mod account;
pub mod engine;
pub mod sizing;

pub use account::{normalize_position, select_position, AccountState};
pub use engine::{
    plan_transition, CloseOutcome, ExecutionAction, ExecutionDecision, ExecutionEngine,
    ExecutionOutcome, ExecutionSettings, Transition,
};
pub use sizing::{default_sizing, PositionSizer, SizingError};
