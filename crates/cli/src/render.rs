//! Text rendering of a [`View`].

use corelib::{Cell, MemberId, View};
use std::fmt::Write;

const TREASURE: &str = "*";
const EMPTY: &str = ".";

/// Draw the board, then one score line per member. The local member is
/// marked with `>` and the header carries its role.
pub fn render(view: &View, me: &MemberId) -> String {
    let width = view
        .scores
        .keys()
        .map(|id| id.as_str().len())
        .max()
        .unwrap_or(1)
        .max(1);

    let mut out = String::new();
    let _ = writeln!(out, "[{}] {}", view.role, me);
    for row in view.board.rows() {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| {
                let glyph = match cell {
                    Cell::Empty => EMPTY,
                    Cell::Treasure => TREASURE,
                    Cell::Member(id) => id.as_str(),
                };
                format!("{:>width$}", glyph, width = width)
            })
            .collect();
        let _ = writeln!(out, "{}", cells.join(" "));
    }
    for (id, score) in &view.scores {
        let marker = if id == me { '>' } else { ' ' };
        let _ = writeln!(out, "{}{:<width$} {}", marker, id, score, width = width);
    }
    out
}
