//! Board primitives: player marks, a single 3×3 sub-board, and the win rule.
//!
//! The same line rule decides both layers of the nested board: a sub-board
//! is won by three equal marks in a line, and the overall game is won by
//! three sub-boards with the same winning mark in a line of the outer grid.
//! Lines are checked in a fixed order — rows, columns, diagonal a
//! (top-left to bottom-right), diagonal b — and the first match wins, so a
//! finished board has exactly one terminal value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The symbol a player places.  The first player is always `X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    /// The other player's mark.
    pub fn opponent(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mark::X => write!(f, "X"),
            Mark::O => write!(f, "O"),
        }
    }
}

/// Terminal value of a decided sub-board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubOutcome {
    /// One mark completed a line.
    Won(Mark),
    /// All nine cells are filled with no line.
    Draw,
}

/// Terminal value of the overall game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Won(Mark),
    Draw,
}

/// Rejected write into a sub-board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardWriteError {
    /// The sub-board already holds a terminal value.
    Decided,
    /// The targeted cell is occupied.
    Taken,
}

/// One of the nine 3×3 cell grids in the nested board.
///
/// A sub-board is immutable once decided: [`SubBoard::place`] rejects every
/// write after the outcome is set, regardless of the targeted cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubBoard {
    cells: [[Option<Mark>; 3]; 3],
    outcome: Option<SubOutcome>,
}

impl SubBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mark at `(row, col)`, if any.  Coordinates must be < 3.
    pub fn cell(&self, row: usize, col: usize) -> Option<Mark> {
        self.cells[row][col]
    }

    /// The terminal value, once decided.
    pub fn outcome(&self) -> Option<SubOutcome> {
        self.outcome
    }

    pub fn is_decided(&self) -> bool {
        self.outcome.is_some()
    }

    /// Places `mark` at `(row, col)` and evaluates the board.
    ///
    /// Returns the terminal value this write produced, or `None` while the
    /// board stays in progress.  Coordinates must already be validated to be
    /// < 3 by the caller.
    ///
    /// # Errors
    ///
    /// [`BoardWriteError::Decided`] when the board already holds a terminal
    /// value, [`BoardWriteError::Taken`] when the cell is occupied.
    pub fn place(
        &mut self,
        row: usize,
        col: usize,
        mark: Mark,
    ) -> Result<Option<SubOutcome>, BoardWriteError> {
        if self.outcome.is_some() {
            return Err(BoardWriteError::Decided);
        }
        if self.cells[row][col].is_some() {
            return Err(BoardWriteError::Taken);
        }

        self.cells[row][col] = Some(mark);

        if let Some(winner) = line_through(&self.cells) {
            self.outcome = Some(SubOutcome::Won(winner));
        } else if self.is_full() {
            self.outcome = Some(SubOutcome::Draw);
        }
        Ok(self.outcome)
    }

    fn is_full(&self) -> bool {
        self.cells
            .iter()
            .all(|row| row.iter().all(|cell| cell.is_some()))
    }
}

/// Returns the mark completing a line, checked in fixed order: rows,
/// columns, diagonal a, diagonal b.  The first match wins.
pub fn line_through(cells: &[[Option<Mark>; 3]; 3]) -> Option<Mark> {
    for row in 0..3 {
        if let Some(mark) = cells[row][0] {
            if cells[row][1] == Some(mark) && cells[row][2] == Some(mark) {
                return Some(mark);
            }
        }
    }
    for col in 0..3 {
        if let Some(mark) = cells[0][col] {
            if cells[1][col] == Some(mark) && cells[2][col] == Some(mark) {
                return Some(mark);
            }
        }
    }
    if let Some(mark) = cells[0][0] {
        if cells[1][1] == Some(mark) && cells[2][2] == Some(mark) {
            return Some(mark);
        }
    }
    if let Some(mark) = cells[0][2] {
        if cells[1][1] == Some(mark) && cells[2][0] == Some(mark) {
            return Some(mark);
        }
    }
    None
}

/// Derives the overall outcome from the 3×3 matrix of sub-board terminal
/// values, using the same line rule as a single board.  Drawn sub-boards
/// count as decided but match no line.  Returns `None` while the game is
/// still in progress.
pub fn overall_outcome(results: &[[Option<SubOutcome>; 3]; 3]) -> Option<GameOutcome> {
    let mut marks: [[Option<Mark>; 3]; 3] = Default::default();
    for row in 0..3 {
        for col in 0..3 {
            if let Some(SubOutcome::Won(mark)) = results[row][col] {
                marks[row][col] = Some(mark);
            }
        }
    }

    if let Some(winner) = line_through(&marks) {
        return Some(GameOutcome::Won(winner));
    }

    let all_decided = results
        .iter()
        .all(|row| row.iter().all(|result| result.is_some()));
    if all_decided {
        Some(GameOutcome::Draw)
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
