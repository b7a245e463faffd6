//! The nested-board game engine: move legality, cascading outcome
//! detection, and turn handoff.
//!
//! Each endpoint owns exactly one [`GameEngine`]; there is no authoritative
//! shared copy.  The two copies stay in agreement because every local move
//! is mirrored to the remote side as a MOVE message and applied there with
//! [`GameEngine::apply_remote_move`], which runs the identical update logic
//! with the opponent's mark and then grants the local turn.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted ──start(is_first)──► InProgress ──overall outcome──► Decided
//! ```
//!
//! The first player's mark is always `X` and the second player's `O`, so
//! two engines started with complementary `is_first` values agree on who
//! plays which symbol without exchanging it.

use crate::game::board::{overall_outcome, BoardWriteError, GameOutcome, Mark, SubBoard, SubOutcome};
use thiserror::Error;
use tracing::debug;

/// Rule violations.  All are returned to the caller without mutating the
/// board, and none terminates the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoveError {
    /// The game has not started, is already decided, or the turn belongs to
    /// the other side.
    #[error("not your turn")]
    NotYourTurn,
    /// A specific sub-board is active and the move targeted a different one,
    /// or the targeted sub-board is already decided.
    #[error("move must be played into the active sub-board")]
    WrongSubBoard,
    /// The targeted cell is occupied.
    #[error("cell is already taken")]
    CellTaken,
    /// A coordinate is outside 0..=2.
    #[error("coordinates out of range")]
    InvalidCoordinates,
}

/// Where the next move must be played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveBoard {
    /// Unconstrained: any not-yet-decided sub-board.
    Any,
    /// Exactly the sub-board at `(row, col)`.
    At(usize, usize),
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    NotStarted,
    InProgress,
    Decided,
}

/// What a single applied move produced.  The fields mirror the optional
/// outcome block of the MOVE wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Terminal value the targeted sub-board reached, if this move decided it.
    pub sub_board_result: Option<SubOutcome>,
    /// Whether this move ended the overall game.
    pub game_over: bool,
    /// Winning mark when the game ended with a line.
    pub winner: Option<Mark>,
    /// Whether the game ended as an overall draw.
    pub is_draw: bool,
}

/// One endpoint's copy of the nested board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEngine {
    boards: [[SubBoard; 3]; 3],
    active: ActiveBoard,
    turn_owner: bool,
    mark: Option<Mark>,
    phase: GamePhase,
    outcome: Option<GameOutcome>,
}

impl Default for GameEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GameEngine {
    pub fn new() -> Self {
        Self {
            boards: Default::default(),
            active: ActiveBoard::Any,
            turn_owner: false,
            mark: None,
            phase: GamePhase::NotStarted,
            outcome: None,
        }
    }

    /// Starts the game.  `is_first` assigns both the opening turn and the
    /// mark: the first player plays `X`, the second `O`.
    pub fn start(&mut self, is_first: bool) {
        self.turn_owner = is_first;
        self.mark = Some(if is_first { Mark::X } else { Mark::O });
        self.phase = GamePhase::InProgress;
    }

    /// Applies a move by the local player and relinquishes the turn.
    ///
    /// # Errors
    ///
    /// [`MoveError::NotYourTurn`] unless the game is in progress and this
    /// side owns the turn; otherwise the rule-violation variants.  Errors
    /// leave the engine unchanged.
    pub fn apply_local_move(
        &mut self,
        main_row: usize,
        main_col: usize,
        sub_row: usize,
        sub_col: usize,
    ) -> Result<MoveOutcome, MoveError> {
        if self.phase != GamePhase::InProgress || !self.turn_owner {
            return Err(MoveError::NotYourTurn);
        }
        let mark = self.mark.ok_or(MoveError::NotYourTurn)?;

        let outcome = self.apply(mark, main_row, main_col, sub_row, sub_col)?;
        self.turn_owner = false;
        Ok(outcome)
    }

    /// Applies a move received from the remote side and grants the local
    /// turn.  Runs the identical update logic with the opponent's mark but
    /// skips the turn-ownership check: the remote engine already validated
    /// ownership before putting the move on the wire.
    ///
    /// # Errors
    ///
    /// [`MoveError::NotYourTurn`] when the game is not in progress;
    /// otherwise the rule-violation variants.
    pub fn apply_remote_move(
        &mut self,
        main_row: usize,
        main_col: usize,
        sub_row: usize,
        sub_col: usize,
    ) -> Result<MoveOutcome, MoveError> {
        if self.phase != GamePhase::InProgress {
            return Err(MoveError::NotYourTurn);
        }
        let mark = self.mark.ok_or(MoveError::NotYourTurn)?.opponent();

        let outcome = self.apply(mark, main_row, main_col, sub_row, sub_col)?;
        self.turn_owner = true;
        Ok(outcome)
    }

    /// Shared update path: validate, write the cell, evaluate the sub-board,
    /// recompute the overall outcome, and select the next active sub-board.
    fn apply(
        &mut self,
        mark: Mark,
        main_row: usize,
        main_col: usize,
        sub_row: usize,
        sub_col: usize,
    ) -> Result<MoveOutcome, MoveError> {
        if main_row > 2 || main_col > 2 || sub_row > 2 || sub_col > 2 {
            return Err(MoveError::InvalidCoordinates);
        }
        if let ActiveBoard::At(row, col) = self.active {
            if (row, col) != (main_row, main_col) {
                return Err(MoveError::WrongSubBoard);
            }
        }

        let sub_board_result = self.boards[main_row][main_col]
            .place(sub_row, sub_col, mark)
            .map_err(|e| match e {
                // Decided sub-boards are unreachable through legal play but
                // are rejected here regardless.
                BoardWriteError::Decided => MoveError::WrongSubBoard,
                BoardWriteError::Taken => MoveError::CellTaken,
            })?;

        if let Some(result) = sub_board_result {
            debug!("sub-board ({main_row}, {main_col}) decided: {result:?}");
        }

        let mut results: [[Option<SubOutcome>; 3]; 3] = Default::default();
        for row in 0..3 {
            for col in 0..3 {
                results[row][col] = self.boards[row][col].outcome();
            }
        }
        self.outcome = overall_outcome(&results);

        let (game_over, winner, is_draw) = match self.outcome {
            Some(GameOutcome::Won(winning_mark)) => (true, Some(winning_mark), false),
            Some(GameOutcome::Draw) => (true, None, true),
            None => (false, None, false),
        };
        if game_over {
            self.phase = GamePhase::Decided;
            debug!("game over: {:?}", self.outcome);
        }

        // The move's cell coordinates name the sub-board the opponent is
        // sent to; a decided destination lifts the constraint.
        self.active = if self.boards[sub_row][sub_col].is_decided() {
            ActiveBoard::Any
        } else {
            ActiveBoard::At(sub_row, sub_col)
        };

        Ok(MoveOutcome {
            sub_board_result,
            game_over,
            winner,
            is_draw,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// The overall terminal value, once the game is decided.
    pub fn outcome(&self) -> Option<GameOutcome> {
        self.outcome
    }

    /// The sub-board the next move must be played into.
    pub fn active_board(&self) -> ActiveBoard {
        self.active
    }

    /// Whether this side currently owns the turn of an in-progress game.
    pub fn is_my_turn(&self) -> bool {
        self.phase == GamePhase::InProgress && self.turn_owner
    }

    /// This side's mark, assigned at [`start`](GameEngine::start).
    pub fn my_mark(&self) -> Option<Mark> {
        self.mark
    }

    /// Terminal value of the sub-board at `(row, col)`, if decided.
    pub fn sub_board_outcome(&self, row: usize, col: usize) -> Option<SubOutcome> {
        self.boards[row][col].outcome()
    }

    /// The mark in a single cell of the nested board, if any.
    pub fn cell(&self, main_row: usize, main_col: usize, sub_row: usize, sub_col: usize) -> Option<Mark> {
        self.boards[main_row][main_col].cell(sub_row, sub_col)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
