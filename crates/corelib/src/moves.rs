//! Move codes sent by players.
//!
//! Codes follow the single-character keyboard protocol: `0` refreshes,
//! `1`-`4` move west, south, east and north, `9` leaves the session.

use crate::board::Coord;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Neighbouring cell in this direction, or `None` if it would leave a
    /// board of side `dim`.
    pub fn step(self, from: Coord, dim: usize) -> Option<Coord> {
        let target = match self {
            Direction::North => Coord::new(from.row.checked_sub(1)?, from.col),
            Direction::South => Coord::new(from.row + 1, from.col),
            Direction::West => Coord::new(from.row, from.col.checked_sub(1)?),
            Direction::East => Coord::new(from.row, from.col + 1),
        };
        (target.row < dim && target.col < dim).then_some(target)
    }
}

/// A request a player makes against the session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum MoveCode {
    /// Ask for the current state without changing it.
    Refresh,
    Step(Direction),
    /// Leave the session.
    Exit,
}

impl MoveCode {
    /// The keyboard character for this code.
    pub fn code(self) -> char {
        match self {
            MoveCode::Refresh => '0',
            MoveCode::Step(Direction::West) => '1',
            MoveCode::Step(Direction::South) => '2',
            MoveCode::Step(Direction::East) => '3',
            MoveCode::Step(Direction::North) => '4',
            MoveCode::Exit => '9',
        }
    }

    pub fn is_mutating(self) -> bool {
        !matches!(self, MoveCode::Refresh)
    }
}

impl FromStr for MoveCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(MoveCode::Refresh),
            "1" => Ok(MoveCode::Step(Direction::West)),
            "2" => Ok(MoveCode::Step(Direction::South)),
            "3" => Ok(MoveCode::Step(Direction::East)),
            "4" => Ok(MoveCode::Step(Direction::North)),
            "9" => Ok(MoveCode::Exit),
            other => Err(Error::InvalidMoveCode(other.to_string())),
        }
    }
}

impl fmt::Display for MoveCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveCode::Refresh => f.write_str("refresh"),
            MoveCode::Step(dir) => write!(f, "{:?}", dir),
            MoveCode::Exit => f.write_str("exit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codes() {
        assert_eq!("0".parse::<MoveCode>().unwrap(), MoveCode::Refresh);
        assert_eq!("4\n".parse::<MoveCode>().unwrap(), MoveCode::Step(Direction::North));
        assert_eq!("9".parse::<MoveCode>().unwrap(), MoveCode::Exit);
        assert!("5".parse::<MoveCode>().is_err());
        for code in ["0", "1", "2", "3", "4", "9"] {
            let parsed: MoveCode = code.parse().unwrap();
            assert_eq!(parsed.code().to_string(), code);
        }
    }

    #[test]
    fn test_step_stays_in_bounds() {
        let corner = Coord::new(0, 0);
        assert_eq!(Direction::North.step(corner, 3), None);
        assert_eq!(Direction::West.step(corner, 3), None);
        assert_eq!(Direction::South.step(corner, 3), Some(Coord::new(1, 0)));
        assert_eq!(Direction::East.step(Coord::new(1, 2), 3), None);
    }
}
