use rand::seq::SliceRandom;
use rand::Rng;

use crate::{ForecastPolicy, RoundPattern, NUMBER_SPACE};

/// Ordered, duplicate-free pick list capped at the policy candidate count.
struct PickSet {
    picks: Vec<u8>,
    taken: [bool; NUMBER_SPACE as usize],
    capacity: usize,
}

impl PickSet {
    fn new(capacity: usize) -> Self {
        Self {
            picks: Vec::with_capacity(capacity),
            taken: [false; NUMBER_SPACE as usize],
            capacity,
        }
    }

    fn contains(&self, value: u8) -> bool {
        self.taken
            .get(usize::from(value))
            .copied()
            .unwrap_or(true)
    }

    fn is_full(&self) -> bool {
        self.picks.len() >= self.capacity
    }

    fn len(&self) -> usize {
        self.picks.len()
    }

    fn push(&mut self, value: u8) -> bool {
        if self.is_full() || self.contains(value) {
            return false;
        }
        self.taken[usize::from(value)] = true;
        self.picks.push(value);
        true
    }
}

/// Builds the candidate list for one round.
///
/// Layers, in order: the top hot numbers, one random value per hot last digit
/// until the digit target is reached, the least frequent cold numbers, picks
/// from the medium hot band, then uniform random fill. Every layer skips values
/// already chosen, so the result always holds `candidate_count` distinct values
/// in `0..=99`, in insertion order. The same pattern and RNG state always yield
/// the same list.
pub fn generate_candidates<R: Rng + ?Sized>(
    pattern: &RoundPattern,
    policy: &ForecastPolicy,
    rng: &mut R,
) -> Vec<u8> {
    let mut set = PickSet::new(policy.candidate_count.min(usize::from(NUMBER_SPACE)));

    for &value in pattern.hot_numbers.iter().take(policy.hot_seed_count) {
        set.push(value);
    }

    for &digit in pattern.hot_last_digits.iter().take(policy.hot_digit_count) {
        if set.len() >= policy.digit_layer_target {
            break;
        }
        let options: Vec<u8> = (0..10_u8)
            .map(|tens| tens * 10 + digit % 10)
            .filter(|value| !set.contains(*value))
            .collect();
        if let Some(&choice) = options.choose(rng) {
            set.push(choice);
        }
    }

    let mut cold = pattern.cold_numbers.clone();
    cold.sort_by_key(|value| (pattern.frequency_of(*value), *value));
    let mut cold_added = 0;
    for value in cold {
        if cold_added >= policy.cold_picks {
            break;
        }
        if set.push(value) {
            cold_added += 1;
        }
    }

    let band_len = policy
        .medium_band_last_rank
        .saturating_sub(policy.medium_band_first_rank)
        + 1;
    let mut medium_added = 0;
    for &value in pattern
        .hot_numbers
        .iter()
        .skip(policy.medium_band_first_rank.saturating_sub(1))
        .take(band_len)
    {
        if medium_added >= policy.medium_picks {
            break;
        }
        if set.push(value) {
            medium_added += 1;
        }
    }

    while !set.is_full() {
        set.push(rng.gen_range(0..NUMBER_SPACE));
    }

    set.picks
}
