use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Weekday;

use crate::{OutcomeRecord, MAX_NUMBER, NUMBER_SPACE};

const COMMON_LIST_LEN: usize = 10;
const COMMON_PAIR_LEN: usize = 5;

const WEEK_FROM_SUNDAY: [Weekday; 7] = [
    Weekday::Sunday,
    Weekday::Monday,
    Weekday::Tuesday,
    Weekday::Wednesday,
    Weekday::Thursday,
    Weekday::Friday,
    Weekday::Saturday,
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NumberCount {
    pub number: u8,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairCount {
    pub early: u8,
    pub late: u8,
    pub count: u32,
}

/// Frequencies across both rounds of complete result rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommonNumbers {
    /// Most frequent values, ties by ascending value.
    pub hot_numbers: Vec<NumberCount>,
    /// Least frequent observed values, ties by descending value.
    pub cold_numbers: Vec<NumberCount>,
    /// Most repeated `(early, late)` pairs, ties by ascending pair.
    pub common_pairs: Vec<PairCount>,
    pub total_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayProfile {
    pub day: String,
    pub count: usize,
    pub average_early: f64,
    /// `None` when no row for this weekday carries a late round.
    pub average_late: Option<f64>,
}

/// Combined early and late frequencies over rows where both rounds are known.
///
/// Partial rows are ignored entirely so that pair counts and number counts
/// describe the same set of days.
#[must_use]
pub fn common_numbers(outcomes: &[OutcomeRecord]) -> CommonNumbers {
    let mut frequency = vec![0_u32; usize::from(NUMBER_SPACE)];
    let mut pairs: BTreeMap<(u8, u8), u32> = BTreeMap::new();
    let mut total_results = 0;

    for outcome in outcomes {
        let (Some(early), Some(late)) = (outcome.early_round, outcome.late_round) else {
            continue;
        };
        if early > MAX_NUMBER || late > MAX_NUMBER {
            continue;
        }
        total_results += 1;
        frequency[usize::from(early)] += 1;
        frequency[usize::from(late)] += 1;
        *pairs.entry((early, late)).or_default() += 1;
    }

    let mut observed: Vec<NumberCount> = (0..NUMBER_SPACE)
        .filter(|value| frequency[usize::from(*value)] > 0)
        .map(|number| NumberCount {
            number,
            count: frequency[usize::from(number)],
        })
        .collect();
    observed.sort_by(|left, right| {
        right
            .count
            .cmp(&left.count)
            .then(left.number.cmp(&right.number))
    });

    let hot_numbers: Vec<NumberCount> = observed.iter().take(COMMON_LIST_LEN).copied().collect();
    let cold_numbers: Vec<NumberCount> = observed
        .iter()
        .rev()
        .take(COMMON_LIST_LEN)
        .copied()
        .collect();

    let mut common_pairs: Vec<PairCount> = pairs
        .into_iter()
        .map(|((early, late), count)| PairCount { early, late, count })
        .collect();
    common_pairs.sort_by(|left, right| right.count.cmp(&left.count));
    common_pairs.truncate(COMMON_PAIR_LEN);

    CommonNumbers {
        hot_numbers,
        cold_numbers,
        common_pairs,
        total_results,
    }
}

/// Result count and average rounds per weekday, Sunday first.
///
/// Only rows with a declared early round count; weekdays without such a row
/// are omitted. Averages are rounded to two decimals.
#[must_use]
pub fn day_profiles(outcomes: &[OutcomeRecord]) -> Vec<DayProfile> {
    #[derive(Default)]
    struct Tally {
        count: usize,
        early_sum: u32,
        late_count: usize,
        late_sum: u32,
    }

    let mut tallies: [Tally; 7] = Default::default();
    for outcome in outcomes {
        let Some(early) = outcome.early_round else {
            continue;
        };
        let tally = &mut tallies[usize::from(outcome.date.weekday().number_days_from_sunday())];
        tally.count += 1;
        tally.early_sum += u32::from(early);
        if let Some(late) = outcome.late_round {
            tally.late_count += 1;
            tally.late_sum += u32::from(late);
        }
    }

    WEEK_FROM_SUNDAY
        .iter()
        .zip(tallies)
        .filter(|(_, tally)| tally.count > 0)
        .map(|(weekday, tally)| DayProfile {
            day: weekday.to_string(),
            count: tally.count,
            average_early: average(tally.early_sum, tally.count).unwrap_or_default(),
            average_late: average(tally.late_sum, tally.late_count),
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn average(sum: u32, count: usize) -> Option<f64> {
    if count == 0 {
        return None;
    }
    let mean = f64::from(sum) / count as f64;
    Some((mean * 100.0).round() / 100.0)
}
