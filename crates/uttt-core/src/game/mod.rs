//! Nested-board rules logic: marks, sub-boards, and the game engine.

pub mod board;
pub mod engine;

pub use board::{GameOutcome, Mark, SubOutcome};
pub use engine::{ActiveBoard, GameEngine, GamePhase, MoveError, MoveOutcome};
