use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{GameId, VerificationRecord};

/// Hit counts and rates over a set of verifications.
///
/// Rates are percentages rounded to one decimal place and are `None` when no
/// verification falls in the window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccuracyStats {
    pub total_verified: usize,
    pub early_hits: usize,
    pub late_hits: usize,
    pub both_hits: usize,
    pub either_hits: usize,
    pub early_hit_rate: Option<f64>,
    pub late_hit_rate: Option<f64>,
    pub both_hit_rate: Option<f64>,
    pub either_hit_rate: Option<f64>,
}

impl AccuracyStats {
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.total_verified > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrendPoint {
    pub game: GameId,
    #[serde(with = "crate::serde_date")]
    pub date: Date,
    pub early_hit: bool,
    pub late_hit: bool,
    pub confidence: u8,
}

impl From<&VerificationRecord> for TrendPoint {
    fn from(record: &VerificationRecord) -> Self {
        Self {
            game: record.game.clone(),
            date: record.date,
            early_hit: record.early_hit,
            late_hit: record.late_hit,
            confidence: record.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameAccuracy {
    pub game: GameId,
    pub stats: AccuracyStats,
}

#[must_use]
pub fn summarize_accuracy(records: &[VerificationRecord]) -> AccuracyStats {
    let total_verified = records.len();
    let early_hits = records.iter().filter(|record| record.early_hit).count();
    let late_hits = records.iter().filter(|record| record.late_hit).count();
    let both_hits = records.iter().filter(|record| record.both_hit()).count();
    let either_hits = records.iter().filter(|record| record.either_hit()).count();

    AccuracyStats {
        total_verified,
        early_hits,
        late_hits,
        both_hits,
        either_hits,
        early_hit_rate: percent(early_hits, total_verified),
        late_hit_rate: percent(late_hits, total_verified),
        both_hit_rate: percent(both_hits, total_verified),
        either_hit_rate: percent(either_hits, total_verified),
    }
}

/// Per-game accuracy for games with at least `min_verified` rows, best
/// either-round hit rate first. Ties keep game key order.
#[must_use]
pub fn rank_games(records: &[VerificationRecord], min_verified: usize) -> Vec<GameAccuracy> {
    let mut by_game: BTreeMap<&GameId, Vec<VerificationRecord>> = BTreeMap::new();
    for record in records {
        by_game.entry(&record.game).or_default().push(record.clone());
    }

    let mut ranked: Vec<GameAccuracy> = by_game
        .into_iter()
        .filter(|(_, rows)| rows.len() >= min_verified)
        .map(|(game, rows)| GameAccuracy {
            game: game.clone(),
            stats: summarize_accuracy(&rows),
        })
        .collect();

    ranked.sort_by(|left, right| {
        let left_rate = left.stats.either_hit_rate.unwrap_or_default();
        let right_rate = right.stats.either_hit_rate.unwrap_or_default();
        right_rate.total_cmp(&left_rate)
    });
    ranked
}

#[allow(clippy::cast_precision_loss)]
fn percent(hits: usize, total: usize) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let ratio = hits as f64 * 100.0 / total as f64;
    Some((ratio * 10.0).round() / 10.0)
}
