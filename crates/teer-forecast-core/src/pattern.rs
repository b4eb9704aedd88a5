use serde::{Deserialize, Serialize};

use crate::{ForecastPolicy, OutcomeRecord, Round, MAX_NUMBER, NUMBER_SPACE};

/// Frequency profile of one round across the analysis window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundPattern {
    pub round: Round,
    /// Observed values by descending frequency, ties broken by ascending value.
    pub hot_numbers: Vec<u8>,
    /// Values seen at most `cold_max_frequency` times, ascending.
    pub cold_numbers: Vec<u8>,
    pub hot_last_digits: Vec<u8>,
    /// Occurrence count per value, indexed by the value itself.
    pub frequency: Vec<u32>,
    pub sample_size: usize,
}

impl RoundPattern {
    #[must_use]
    pub fn frequency_of(&self, value: u8) -> u32 {
        self.frequency
            .get(usize::from(value))
            .copied()
            .unwrap_or_default()
    }

    /// Frequency of the most common value, if any value was observed.
    #[must_use]
    pub fn top_frequency(&self) -> Option<u32> {
        self.hot_numbers
            .first()
            .map(|value| self.frequency_of(*value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternSummary {
    pub early: RoundPattern,
    pub late: RoundPattern,
    /// Rows carrying at least one declared round.
    pub days: usize,
}

impl PatternSummary {
    #[must_use]
    pub fn round(&self, round: Round) -> &RoundPattern {
        match round {
            Round::Early => &self.early,
            Round::Late => &self.late,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Analysis {
    Ready(PatternSummary),
    InsufficientData {
        early_rows: usize,
        late_rows: usize,
        required: usize,
    },
}

impl Analysis {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub fn into_summary(self) -> Option<PatternSummary> {
        match self {
            Self::Ready(summary) => Some(summary),
            Self::InsufficientData { .. } => None,
        }
    }
}

/// Computes hot, cold and last-digit profiles for both rounds.
///
/// The window is whatever the caller passes in; rows with a missing round
/// contribute only to the round that was declared. Fewer than
/// `min_qualifying_rows` values in either round yields
/// [`Analysis::InsufficientData`].
#[must_use]
pub fn analyze(outcomes: &[OutcomeRecord], policy: &ForecastPolicy) -> Analysis {
    let early = round_values(outcomes, Round::Early);
    let late = round_values(outcomes, Round::Late);

    if early.len() < policy.min_qualifying_rows || late.len() < policy.min_qualifying_rows {
        return Analysis::InsufficientData {
            early_rows: early.len(),
            late_rows: late.len(),
            required: policy.min_qualifying_rows,
        };
    }

    let days = outcomes
        .iter()
        .filter(|outcome| outcome.early_round.is_some() || outcome.late_round.is_some())
        .count();

    Analysis::Ready(PatternSummary {
        early: round_pattern(Round::Early, &early, policy),
        late: round_pattern(Round::Late, &late, policy),
        days,
    })
}

fn round_values(outcomes: &[OutcomeRecord], round: Round) -> Vec<u8> {
    outcomes
        .iter()
        .filter_map(|outcome| round.value_of(outcome))
        .filter(|value| *value <= MAX_NUMBER)
        .collect()
}

fn round_pattern(round: Round, values: &[u8], policy: &ForecastPolicy) -> RoundPattern {
    let mut frequency = vec![0_u32; usize::from(NUMBER_SPACE)];
    let mut digit_frequency = [0_u32; 10];
    for &value in values {
        frequency[usize::from(value)] += 1;
        digit_frequency[usize::from(value % 10)] += 1;
    }

    let mut hot_numbers: Vec<u8> = (0..NUMBER_SPACE)
        .filter(|value| frequency[usize::from(*value)] > 0)
        .collect();
    hot_numbers.sort_by(|left, right| {
        frequency[usize::from(*right)]
            .cmp(&frequency[usize::from(*left)])
            .then(left.cmp(right))
    });
    hot_numbers.truncate(policy.hot_list_len);

    let cold_numbers: Vec<u8> = (0..NUMBER_SPACE)
        .filter(|value| frequency[usize::from(*value)] <= policy.cold_max_frequency)
        .take(policy.cold_list_len)
        .collect();

    let mut hot_last_digits: Vec<u8> = (0..10_u8)
        .filter(|digit| digit_frequency[usize::from(*digit)] > 0)
        .collect();
    hot_last_digits.sort_by(|left, right| {
        digit_frequency[usize::from(*right)]
            .cmp(&digit_frequency[usize::from(*left)])
            .then(left.cmp(right))
    });
    hot_last_digits.truncate(policy.hot_digit_count);

    RoundPattern {
        round,
        hot_numbers,
        cold_numbers,
        hot_last_digits,
        frequency,
        sample_size: values.len(),
    }
}
