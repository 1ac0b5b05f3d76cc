//! The scoring rules, consumed by the validator as a pure function.

use dicelink_protocol::DICE_COUNT;

use crate::ScoreCategory;

/// Computes what a hand is worth in a category.
///
/// Implementations must be pure and total: any five values in 1..=6
/// produce a score, and the same input always produces the same score.
/// The validator compares a player's claim against this, so host and
/// players must agree on the rules.
pub trait Scorer: Send + Sync + 'static {
    fn score(&self, category: ScoreCategory, dice: &[u8; DICE_COUNT]) -> u32;
}

/// Scandinavian Yatzy rules.
///
/// | Category            | Score                          |
/// |---------------------|--------------------------------|
/// | Ones … Sixes        | sum of dice showing that face  |
/// | One Pair            | highest pair × 2               |
/// | Two Pairs           | two different pairs            |
/// | Three / Four of a Kind | face × 3 / × 4              |
/// | Small Straight      | 1-2-3-4-5 → 15                 |
/// | Large Straight      | 2-3-4-5-6 → 20                 |
/// | Full House          | exactly three + two → sum      |
/// | Chance              | sum                            |
/// | Yatzy               | five of a kind → 50            |
#[derive(Debug, Clone, Copy, Default)]
pub struct YatzyScorer;

impl YatzyScorer {
    /// How many dice show each face. Index 0 is unused.
    fn counts(dice: &[u8; DICE_COUNT]) -> [u32; 7] {
        let mut counts = [0u32; 7];
        for &value in dice {
            if (1..=6).contains(&value) {
                counts[usize::from(value)] += 1;
            }
        }
        counts
    }

    /// Highest face with at least `n` dice, scored as face × `n`.
    fn of_a_kind(counts: &[u32; 7], n: u32) -> u32 {
        (1..=6u32)
            .rev()
            .find(|&face| counts[face as usize] >= n)
            .map_or(0, |face| face * n)
    }

    fn straight(counts: &[u32; 7], faces: std::ops::RangeInclusive<usize>) -> bool {
        faces.into_iter().all(|face| counts[face] == 1)
    }
}

impl Scorer for YatzyScorer {
    fn score(&self, category: ScoreCategory, dice: &[u8; DICE_COUNT]) -> u32 {
        let counts = Self::counts(dice);
        let sum: u32 = (1..=6u32).map(|f| f * counts[f as usize]).sum();

        match category {
            ScoreCategory::Ones
            | ScoreCategory::Twos
            | ScoreCategory::Threes
            | ScoreCategory::Fours
            | ScoreCategory::Fives
            | ScoreCategory::Sixes => {
                let face = u32::from(category.face().unwrap_or(0));
                face * counts[face as usize]
            }
            ScoreCategory::OnePair => Self::of_a_kind(&counts, 2),
            ScoreCategory::TwoPairs => {
                let pairs: Vec<u32> = (1..=6u32)
                    .rev()
                    .filter(|&face| counts[face as usize] >= 2)
                    .collect();
                match pairs.as_slice() {
                    [high, low, ..] => (high + low) * 2,
                    _ => 0,
                }
            }
            ScoreCategory::ThreeOfAKind => Self::of_a_kind(&counts, 3),
            ScoreCategory::FourOfAKind => Self::of_a_kind(&counts, 4),
            ScoreCategory::SmallStraight => {
                if Self::straight(&counts, 1..=5) { 15 } else { 0 }
            }
            ScoreCategory::LargeStraight => {
                if Self::straight(&counts, 2..=6) { 20 } else { 0 }
            }
            ScoreCategory::FullHouse => {
                let three = counts.iter().any(|&c| c == 3);
                let two = counts.iter().any(|&c| c == 2);
                if three && two { sum } else { 0 }
            }
            ScoreCategory::Chance => sum,
            ScoreCategory::Yatzy => {
                if counts.iter().any(|&c| c == 5) { 50 } else { 0 }
            }
        }
    }
}
