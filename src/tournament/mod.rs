use chrono::{DateTime, Utc};
use std::{fmt, ops::Not, path::PathBuf, time::Duration};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Side {
    Red,
    Black,
}

impl Side {
    /// RED makes the first ply; plies are numbered from 1.
    pub fn to_move(ply: u32) -> Side {
        if ply % 2 == 1 { Side::Red } else { Side::Black }
    }
}

impl Not for Side {
    type Output = Side;

    fn not(self) -> Side {
        match self {
            Side::Red => Side::Black,
            Side::Black => Side::Red,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Red => "RED",
            Side::Black => "BLACK",
        })
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Competitor {
    A,
    B,
}

impl Competitor {
    pub const ALL: [Competitor; 2] = [Competitor::A, Competitor::B];

    pub fn index(self) -> usize {
        match self {
            Competitor::A => 0,
            Competitor::B => 1,
        }
    }
}

impl Not for Competitor {
    type Output = Competitor;

    fn not(self) -> Competitor {
        match self {
            Competitor::A => Competitor::B,
            Competitor::B => Competitor::A,
        }
    }
}

impl fmt::Display for Competitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Competitor::A => "A",
            Competitor::B => "B",
        })
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MatchJob {
    pub id: u64,
    pub arbiter: PathBuf,
    pub competitors: [PathBuf; 2],
    pub verbose: bool,
    pub read_timeout: Option<Duration>,
}

impl MatchJob {
    /// Odd ids put A on RED, even ids put A on BLACK.
    pub fn side_of(&self, competitor: Competitor) -> Side {
        let a_side = if self.id % 2 == 1 { Side::Red } else { Side::Black };
        match competitor {
            Competitor::A => a_side,
            Competitor::B => !a_side,
        }
    }

    pub fn competitor_on(&self, side: Side) -> Competitor {
        if self.side_of(Competitor::A) == side {
            Competitor::A
        } else {
            Competitor::B
        }
    }

    pub fn competitor_path(&self, competitor: Competitor) -> &PathBuf {
        &self.competitors[competitor.index()]
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Decision {
    Win(Competitor),
    Draw,
    Error,
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Win(Competitor::A) => "A",
            Decision::Win(Competitor::B) => "B",
            Decision::Draw => "draw",
            Decision::Error => "error",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a match ended, before it is stamped with match bookkeeping.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Verdict {
    pub decision: Decision,
    pub winner_side: Option<Side>,
    pub reason: String,
}

impl Verdict {
    pub fn win(winner: Competitor, side: Side, reason: impl Into<String>) -> Verdict {
        Verdict {
            decision: Decision::Win(winner),
            winner_side: Some(side),
            reason: reason.into(),
        }
    }

    /// `loser` failed to act while on `loser_side`; the opponent takes the game.
    pub fn forfeit(loser: Competitor, loser_side: Side, reason: impl Into<String>) -> Verdict {
        Verdict::win(!loser, !loser_side, reason)
    }

    pub fn draw(reason: impl Into<String>) -> Verdict {
        Verdict {
            decision: Decision::Draw,
            winner_side: None,
            reason: reason.into(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Verdict {
        Verdict {
            decision: Decision::Error,
            winner_side: None,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MatchOutcome {
    pub match_id: u64,
    pub started: DateTime<Utc>,
    pub plies: u32,
    pub decision: Decision,
    pub winner_side: Option<Side>,
    pub reason: String,
}

impl MatchOutcome {
    pub fn new(match_id: u64, started: DateTime<Utc>, plies: u32, verdict: Verdict) -> MatchOutcome {
        MatchOutcome {
            match_id,
            started,
            plies,
            decision: verdict.decision,
            winner_side: verdict.winner_side,
            reason: verdict.reason,
        }
    }

    /// One line of progress output for the operator.
    pub fn describe(&self) -> String {
        let id = self.match_id;
        match (self.decision, self.winner_side) {
            (Decision::Win(c), Some(side)) => {
                format!("Game #{id}: {c} ({side}) won by {}", self.reason)
            }
            (Decision::Win(c), None) => format!("Game #{id}: {c} won by {}", self.reason),
            (Decision::Draw, _) => format!("Game #{id}: drawn by {}", self.reason),
            (Decision::Error, _) if self.reason.is_empty() => format!("Game #{id}: error"),
            (Decision::Error, _) => format!("Game #{id}: error ({})", self.reason),
        }
    }
}
