use crate::tournament::{Competitor, Decision, MatchOutcome, Side};

const NORM_PPF_0_975: f64 = 1.959963984540054;

fn score<const N: usize>(probs: [f64; N]) -> f64 {
    probs
        .iter()
        .enumerate()
        .map(|(i, &p)| (i as f64 / (N - 1) as f64) * p)
        .sum()
}

fn variance<const N: usize>(probs: [f64; N], mu: f64) -> f64 {
    probs
        .iter()
        .enumerate()
        .map(|(i, &p)| ((i as f64 / (N - 1) as f64) - mu).powi(2) * p)
        .sum()
}

fn logistic_elo(score: f64) -> f64 {
    let score = score.clamp(1e-6, 1.0 - 1e-6);
    -400.0 * (1.0 / score - 1.0).log10()
}

/// Wins, draws and losses from competitor A's point of view.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Wdl {
    pub w: u64,
    pub d: u64,
    pub l: u64,
}

impl std::ops::Add for Wdl {
    type Output = Wdl;

    fn add(self, other: Wdl) -> Self::Output {
        Wdl {
            w: self.w + other.w,
            d: self.d + other.d,
            l: self.l + other.l,
        }
    }
}

impl Wdl {
    pub const ONE_WIN: Wdl = Wdl { w: 1, d: 0, l: 0 };
    pub const ONE_DRAW: Wdl = Wdl { w: 0, d: 1, l: 0 };
    pub const ONE_LOSS: Wdl = Wdl { w: 0, d: 0, l: 1 };

    pub fn game_count(&self) -> u64 {
        self.w + self.d + self.l
    }

    pub fn flip(&self) -> Wdl {
        Wdl {
            w: self.l,
            d: self.d,
            l: self.w,
        }
    }

    pub fn to_probs(self) -> [f64; 3] {
        let gc = self.game_count() as f64;
        [self.l as f64 / gc, self.d as f64 / gc, self.w as f64 / gc]
    }

    pub fn points(&self) -> f64 {
        self.w as f64 * 1.0 + self.d as f64 * 0.5
    }

    pub fn score(&self) -> f64 {
        score(self.to_probs())
    }

    pub fn variance(&self) -> f64 {
        variance(self.to_probs(), self.score())
    }

    /// Elo difference and its 95% confidence half-width. NaN without games.
    pub fn logistic_elo(&self) -> (f64, f64) {
        let score = self.score();
        let variance = self.variance();
        let per_game_variance = variance / self.game_count() as f64;
        let score_lower = score - NORM_PPF_0_975 * per_game_variance.sqrt();
        let score_upper = score + NORM_PPF_0_975 * per_game_variance.sqrt();

        let elo_lower = logistic_elo(score_lower);
        let elo = logistic_elo(score);
        let elo_upper = logistic_elo(score_upper);

        (elo, (elo_upper - elo_lower) / 2.0)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Tally {
    pub wdl: Wdl,
    pub errors: u64,
    pub red_wins: [u64; 2],
}

impl std::ops::Add for Tally {
    type Output = Tally;

    fn add(self, other: Tally) -> Self::Output {
        Tally {
            wdl: self.wdl + other.wdl,
            errors: self.errors + other.errors,
            red_wins: [
                self.red_wins[0] + other.red_wins[0],
                self.red_wins[1] + other.red_wins[1],
            ],
        }
    }
}

impl std::iter::Sum for Tally {
    fn sum<I>(iter: I) -> Self
    where
        I: Iterator<Item = Self>,
    {
        iter.fold(Tally::default(), |a, b| a + b)
    }
}

impl Tally {
    pub fn of(outcome: &MatchOutcome) -> Tally {
        let mut tally = Tally::default();
        match outcome.decision {
            Decision::Win(c) => {
                tally.wdl = match c {
                    Competitor::A => Wdl::ONE_WIN,
                    Competitor::B => Wdl::ONE_LOSS,
                };
                if outcome.winner_side == Some(Side::Red) {
                    tally.red_wins[c.index()] = 1;
                }
            }
            Decision::Draw => tally.wdl = Wdl::ONE_DRAW,
            Decision::Error => tally.errors = 1,
        }
        tally
    }

    pub fn fold<'a, I>(outcomes: I) -> Tally
    where
        I: IntoIterator<Item = &'a MatchOutcome>,
    {
        outcomes.into_iter().map(Tally::of).sum()
    }

    pub fn match_count(&self) -> u64 {
        self.wdl.game_count() + self.errors
    }

    pub fn count(&self, decision: Decision) -> u64 {
        match decision {
            Decision::Win(c) => self.wins(c),
            Decision::Draw => self.wdl.d,
            Decision::Error => self.errors,
        }
    }

    pub fn wins(&self, competitor: Competitor) -> u64 {
        self.wdl_for(competitor).w
    }

    pub fn red_wins(&self, competitor: Competitor) -> u64 {
        self.red_wins[competitor.index()]
    }

    pub fn wdl_for(&self, competitor: Competitor) -> Wdl {
        match competitor {
            Competitor::A => self.wdl,
            Competitor::B => self.wdl.flip(),
        }
    }

    /// Wins plus half the draws. Errored matches score nothing.
    pub fn score(&self, competitor: Competitor) -> f64 {
        self.wdl_for(competitor).points()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::Verdict;
    use chrono::Utc;

    fn outcome(id: u64, verdict: Verdict) -> MatchOutcome {
        MatchOutcome::new(id, Utc::now(), 0, verdict)
    }

    fn sample() -> Vec<MatchOutcome> {
        vec![
            outcome(0, Verdict::win(Competitor::A, Side::Red, "mate")),
            outcome(1, Verdict::win(Competitor::A, Side::Black, "mate")),
            outcome(2, Verdict::forfeit(Competitor::A, Side::Black, "crashed")),
            outcome(3, Verdict::draw("fifty-move rule")),
            outcome(4, Verdict::error("ERR bad-args")),
            outcome(5, Verdict::draw("repetition")),
        ]
    }

    #[test]
    fn counts_labels_and_red_split() {
        let tally = Tally::fold(&sample());
        assert_eq!(tally.count(Decision::Win(Competitor::A)), 2);
        assert_eq!(tally.count(Decision::Win(Competitor::B)), 1);
        assert_eq!(tally.count(Decision::Draw), 2);
        assert_eq!(tally.count(Decision::Error), 1);
        assert_eq!(tally.red_wins(Competitor::A), 1);
        assert_eq!(tally.red_wins(Competitor::B), 1);
        assert_eq!(tally.match_count(), 6);
    }

    #[test]
    fn fold_is_order_independent() {
        let outcomes = sample();
        let forward = Tally::fold(&outcomes);
        let reordered = [2, 5, 0, 4, 1, 3].map(|i| outcomes[i].clone());
        assert_eq!(forward, Tally::fold(&reordered));
        let reversed: Vec<_> = outcomes.iter().rev().cloned().collect();
        assert_eq!(forward, Tally::fold(&reversed));
    }

    #[test]
    fn scores_sum_to_decided_matches() {
        let tally = Tally::fold(&sample());
        assert_eq!(tally.score(Competitor::A), 3.0);
        assert_eq!(tally.score(Competitor::B), 2.0);
        let decided = tally.wins(Competitor::A) + tally.wins(Competitor::B) + tally.wdl.d;
        assert_eq!(
            tally.score(Competitor::A) + tally.score(Competitor::B),
            decided as f64
        );
    }

    #[test]
    fn even_results_have_zero_elo() {
        let wdl = Wdl { w: 10, d: 5, l: 10 };
        let (elo, diff) = wdl.logistic_elo();
        assert!(elo.abs() < 1e-9);
        assert!(diff > 0.0);
    }

    #[test]
    fn winning_record_has_positive_elo() {
        let (elo, _) = Wdl { w: 30, d: 10, l: 10 }.logistic_elo();
        assert!(elo > 0.0);
        let (flipped, _) = Wdl { w: 30, d: 10, l: 10 }.flip().logistic_elo();
        assert!((elo + flipped).abs() < 1e-6);
    }
}
