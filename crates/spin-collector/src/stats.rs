//! Statistics over a list of spins
//!
//! Everything here is a pure function of its input: the same list always
//! yields the same summary, and nothing is cached between calls.

use serde::Serialize;
use shared::{Color, Spin, MAX_NUMBER};
use std::fmt;

/// Number of most frequent pockets reported by default
pub const DEFAULT_TOP_K: usize = 5;

/// Count and share of one color
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ColorShare {
    pub count: usize,
    pub percent: f64,
}

/// Run lengths of consecutive reds and blacks
///
/// A green ends both runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Streaks {
    /// Run at the newest end of the list
    pub current_red: usize,
    pub current_black: usize,
    /// Longest run anywhere in the list
    pub max_red: usize,
    pub max_black: usize,
}

/// How often a pocket came up
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumberFrequency {
    pub number: u8,
    pub count: usize,
    pub percent: f64,
}

/// Summary of a spin list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub red: ColorShare,
    pub black: ColorShare,
    pub green: ColorShare,
    pub streaks: Streaks,
    /// Most frequent pockets, highest count first; equal counts keep the
    /// order the pockets first appear in the list
    pub top_numbers: Vec<NumberFrequency>,
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

/// Summarize `spins` (newest first), reporting the `top_k` most frequent pockets
pub fn summarize(spins: &[Spin], top_k: usize) -> Summary {
    let total = spins.len();

    let count_of = |color: Color| spins.iter().filter(|s| s.color == color).count();
    let share = |count: usize| ColorShare {
        count,
        percent: percent(count, total),
    };

    Summary {
        total,
        red: share(count_of(Color::Red)),
        black: share(count_of(Color::Black)),
        green: share(count_of(Color::Green)),
        streaks: streaks(spins),
        top_numbers: top_numbers(spins, top_k),
    }
}

fn streaks(spins: &[Spin]) -> Streaks {
    let mut result = Streaks::default();
    let (mut red_run, mut black_run) = (0, 0);

    for spin in spins {
        match spin.color {
            Color::Red => {
                red_run += 1;
                black_run = 0;
            }
            Color::Black => {
                black_run += 1;
                red_run = 0;
            }
            Color::Green => {
                red_run = 0;
                black_run = 0;
            }
        }
        result.max_red = result.max_red.max(red_run);
        result.max_black = result.max_black.max(black_run);
    }

    let current = |color: Color| spins.iter().take_while(|s| s.color == color).count();
    result.current_red = current(Color::Red);
    result.current_black = current(Color::Black);

    result
}

fn top_numbers(spins: &[Spin], top_k: usize) -> Vec<NumberFrequency> {
    // (count, first index) per pocket
    let mut seen: [Option<(usize, usize)>; MAX_NUMBER as usize + 1] =
        [None; MAX_NUMBER as usize + 1];

    for (index, spin) in spins.iter().enumerate() {
        // Numbers outside the wheel have no slot
        let Some(slot) = seen.get_mut(spin.number as usize) else {
            continue;
        };
        match slot {
            Some((count, _)) => *count += 1,
            None => *slot = Some((1, index)),
        }
    }

    let mut ranked: Vec<(u8, usize, usize)> = seen
        .iter()
        .enumerate()
        .filter_map(|(number, slot)| slot.map(|(count, first)| (number as u8, count, first)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked
        .into_iter()
        .take(top_k)
        .map(|(number, count, _)| NumberFrequency {
            number,
            count,
            percent: percent(count, spins.len()),
        })
        .collect()
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total spins: {}", self.total)?;
        writeln!(f, "Colors:")?;
        for (name, share) in [("red", self.red), ("black", self.black), ("green", self.green)] {
            writeln!(f, "  {:<5} {:>4} ({:.1}%)", name, share.count, share.percent)?;
        }
        writeln!(
            f,
            "Streaks: current red {} / black {}, max red {} / black {}",
            self.streaks.current_red,
            self.streaks.current_black,
            self.streaks.max_red,
            self.streaks.max_black
        )?;
        writeln!(f, "Top numbers:")?;
        for (rank, entry) in self.top_numbers.iter().enumerate() {
            let color = Color::of(entry.number).map(|c| c.to_string()).unwrap_or_default();
            writeln!(
                f,
                "  {}. {:>2} {:<5} {} times ({:.1}%)",
                rank + 1,
                entry.number,
                color,
                entry.count,
                entry.percent
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn spins(numbers: &[u8]) -> Vec<Spin> {
        numbers
            .iter()
            .map(|n| Spin::new(*n, Utc::now(), "c", "t").unwrap())
            .collect()
    }

    #[test]
    fn test_empty_list() {
        let summary = summarize(&[], DEFAULT_TOP_K);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.red, ColorShare::default());
        assert_eq!(summary.green.percent, 0.0);
        assert_eq!(summary.streaks, Streaks::default());
        assert!(summary.top_numbers.is_empty());
        // Display must not divide by zero either
        assert!(summary.to_string().contains("Total spins: 0"));
    }

    #[test]
    fn test_color_counts_and_percentages() {
        // 0 green, 12 red, 5 red, 13 black
        let summary = summarize(&spins(&[0, 12, 5, 13]), DEFAULT_TOP_K);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.red.count, 2);
        assert_eq!(summary.black.count, 1);
        assert_eq!(summary.green.count, 1);
        assert_eq!(summary.red.percent, 50.0);
        assert_eq!(summary.green.percent, 25.0);
    }

    #[test]
    fn test_streaks_reset_on_green() {
        // newest first: R R B B B 0 R R R R
        let summary = summarize(&spins(&[1, 3, 2, 4, 6, 0, 5, 7, 9, 12]), DEFAULT_TOP_K);
        assert_eq!(summary.streaks.current_red, 2);
        assert_eq!(summary.streaks.current_black, 0);
        assert_eq!(summary.streaks.max_red, 4);
        assert_eq!(summary.streaks.max_black, 3);
    }

    #[test]
    fn test_current_streak_after_green_is_zero() {
        let summary = summarize(&spins(&[0, 1, 3]), DEFAULT_TOP_K);
        assert_eq!(summary.streaks.current_red, 0);
        assert_eq!(summary.streaks.max_red, 2);
    }

    #[test]
    fn test_top_numbers_ranked_with_first_seen_ties() {
        let summary = summarize(&spins(&[8, 17, 17, 8, 30, 2, 2, 2]), 3);
        let ranked: Vec<(u8, usize)> = summary
            .top_numbers
            .iter()
            .map(|e| (e.number, e.count))
            .collect();
        // 8 and 17 tie at two; 8 appears first
        assert_eq!(ranked, vec![(2, 3), (8, 2), (17, 2)]);
        assert_eq!(summary.top_numbers[0].percent, 37.5);
    }

    #[test]
    fn test_invalid_number_does_not_panic() {
        let mut list = spins(&[4, 4]);
        list.push(Spin {
            number: 40,
            color: Color::Red,
            timestamp: Utc::now(),
            casino: "c".to_string(),
            table: "t".to_string(),
        });

        let summary = summarize(&list, DEFAULT_TOP_K);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.top_numbers.len(), 1);
        assert_eq!(summary.top_numbers[0].number, 4);
    }

    #[test]
    fn test_summarize_is_deterministic() {
        let list = spins(&[4, 4, 19, 0, 33]);
        assert_eq!(summarize(&list, 5), summarize(&list, 5));
    }

    #[test]
    fn test_display_lists_top_numbers() {
        let text = summarize(&spins(&[32, 32, 15]), DEFAULT_TOP_K).to_string();
        assert!(text.contains("1. 32 red"));
        assert!(text.contains("2. 15 black"));
    }
}
