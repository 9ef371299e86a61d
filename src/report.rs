use crate::{
    stats::Tally,
    tournament::{Competitor, Decision},
};
use itertools::Itertools;
use std::{fmt::Write, path::Path};

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Renders the final results of a run.
pub fn render(tally: &Tally, names: [&Path; 2]) -> String {
    let names = names.map(display_name);
    let mut out = String::new();

    let _ = writeln!(out, "=== Results over {} games ===", tally.match_count());

    let decisions = Competitor::ALL
        .map(Decision::Win)
        .into_iter()
        .chain([Decision::Draw, Decision::Error]);
    for decision in decisions
        .filter(|&d| tally.count(d) > 0)
        .sorted_by_key(|&d| std::cmp::Reverse(tally.count(d)))
    {
        let count = tally.count(decision);
        match decision {
            Decision::Win(c) => {
                let _ = writeln!(
                    out,
                    "  {} ({}): {count} ({} Red)",
                    decision.label(),
                    names[c.index()],
                    tally.red_wins(c)
                );
            }
            _ => {
                let _ = writeln!(out, "  {}: {count}", decision.label());
            }
        }
    }

    let _ = writeln!(out, "==============================");
    let _ = writeln!(
        out,
        "{:<10}{} - {}{:>10}",
        "A",
        tally.score(Competitor::A),
        tally.score(Competitor::B),
        "B"
    );

    let wdl = tally.wdl;
    if wdl.game_count() > 0 {
        let (elo, elo_diff) = wdl.logistic_elo();
        let _ = writeln!(out, "Elo (A vs B): {elo:.2} +/- {elo_diff:.2}");
    }
    out
}
