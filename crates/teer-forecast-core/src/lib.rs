//! Pure prediction engine for daily two-round Teer results.
//!
//! This crate owns the domain types shared by the store and the CLI, the
//! [`ForecastPolicy`] configuration, and the side-effect free components of the
//! pipeline:
//! - [`analyze`] turns a window of [`OutcomeRecord`]s into a [`PatternSummary`].
//! - [`generate_candidates`] layers hot, digit, cold, medium and random picks.
//! - [`score_confidence`] maps pattern strength and sample size to 60–95.
//! - [`summarize_accuracy`] folds verification rows into hit rates.
//! - [`common_numbers`], [`day_profiles`] and [`apply_formula`] mine result
//!   history for the analysis views.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

mod accuracy;
mod candidates;
mod confidence;
mod formula;
mod insight;
mod narrative;
mod pattern;

pub use accuracy::{rank_games, summarize_accuracy, AccuracyStats, GameAccuracy, TrendPoint};
pub use candidates::generate_candidates;
pub use confidence::score_confidence;
pub use formula::{
    apply_formula, digit_breakdown, CombinedDigits, DigitBreakdown, FormulaKind,
    FormulaPrediction, NumberDigits,
};
pub use insight::{common_numbers, day_profiles, CommonNumbers, DayProfile, NumberCount, PairCount};
pub use narrative::compose_narrative;
pub use pattern::{analyze, Analysis, PatternSummary, RoundPattern};

/// Number of distinct values a round can produce (`0..=99`).
pub const NUMBER_SPACE: u8 = 100;
pub const MAX_NUMBER: u8 = NUMBER_SPACE - 1;

const MAX_GAME_ID_LEN: usize = 50;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ForecastError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Identifier of one game, e.g. `shillong` or `khanapara-morning`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct GameId(String);

impl GameId {
    /// Parses a game identifier.
    ///
    /// Identifiers are 1–50 characters of lowercase ASCII letters, digits and
    /// inner dashes. Nothing is normalized: `Shillong` is rejected rather than
    /// lowercased.
    ///
    /// # Errors
    /// Returns [`ForecastError::InvalidKey`] for any other input.
    pub fn parse(raw: &str) -> Result<Self, ForecastError> {
        if raw.is_empty() {
            return Err(ForecastError::InvalidKey(
                "game identifier cannot be empty".to_string(),
            ));
        }

        if raw.len() > MAX_GAME_ID_LEN {
            return Err(ForecastError::InvalidKey(format!(
                "game identifier MUST be at most {MAX_GAME_ID_LEN} characters: {raw}"
            )));
        }

        if !raw
            .bytes()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-')
        {
            return Err(ForecastError::InvalidKey(format!(
                "game identifier MUST contain only [a-z0-9-]: {raw}"
            )));
        }

        if raw.starts_with('-') || raw.ends_with('-') {
            return Err(ForecastError::InvalidKey(format!(
                "game identifier cannot start or end with '-': {raw}"
            )));
        }

        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for GameId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GameId {
    type Error = ForecastError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GameId> for String {
    fn from(value: GameId) -> Self {
        value.0
    }
}

/// The two daily draws of a game ("FR" and "SR").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Round {
    Early,
    Late,
}

impl Round {
    pub const ALL: [Round; 2] = [Round::Early, Round::Late];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Early => "early",
            Self::Late => "late",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "early" => Some(Self::Early),
            "late" => Some(Self::Late),
            _ => None,
        }
    }

    #[must_use]
    pub fn value_of(self, outcome: &OutcomeRecord) -> Option<u8> {
        match self {
            Self::Early => outcome.early_round,
            Self::Late => outcome.late_round,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    Automatic,
    Manual,
}

impl OutcomeSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "automatic" => Some(Self::Automatic),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub game: GameId,
    #[serde(with = "serde_date")]
    pub date: Date,
    pub early_round: Option<u8>,
    pub late_round: Option<u8>,
    pub source: OutcomeSource,
    #[serde(with = "serde_rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl OutcomeRecord {
    /// Both rounds have been declared.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.early_round.is_some() && self.late_round.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutcomeInput {
    pub game: GameId,
    #[serde(with = "serde_date")]
    pub date: Date,
    pub early_round: Option<u8>,
    pub late_round: Option<u8>,
    pub source: OutcomeSource,
}

impl OutcomeInput {
    /// Validates round values before an upsert.
    ///
    /// # Errors
    /// Returns [`ForecastError::Validation`] when a round value is outside
    /// `0..=99`.
    pub fn validate(&self) -> Result<(), ForecastError> {
        for (round, value) in [
            (Round::Early, self.early_round),
            (Round::Late, self.late_round),
        ] {
            if let Some(number) = value {
                validate_number(round.as_str(), number)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PredictionInput {
    pub game: GameId,
    #[serde(with = "serde_date")]
    pub date: Date,
    pub early_candidates: Vec<u8>,
    pub late_candidates: Vec<u8>,
    pub narrative: String,
    pub confidence: u8,
}

impl PredictionInput {
    /// Validates a prediction before it replaces the stored row.
    ///
    /// # Errors
    /// Returns [`ForecastError::Validation`] when a candidate list is not
    /// exactly `candidate_count` distinct values in `0..=99`, the narrative is
    /// blank, or confidence is outside the policy bounds.
    pub fn validate(&self, policy: &ForecastPolicy) -> Result<(), ForecastError> {
        validate_candidates(
            "early_candidates",
            &self.early_candidates,
            policy.candidate_count,
        )?;
        validate_candidates(
            "late_candidates",
            &self.late_candidates,
            policy.candidate_count,
        )?;

        if self.narrative.trim().is_empty() {
            return Err(ForecastError::Validation(
                "narrative cannot be empty".to_string(),
            ));
        }

        if !(policy.confidence_min..=policy.confidence_max).contains(&self.confidence) {
            return Err(ForecastError::Validation(format!(
                "confidence MUST be in [{}, {}], got {}",
                policy.confidence_min, policy.confidence_max, self.confidence
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PredictionRecord {
    pub game: GameId,
    #[serde(with = "serde_date")]
    pub date: Date,
    pub early_candidates: Vec<u8>,
    pub late_candidates: Vec<u8>,
    pub narrative: String,
    pub confidence: u8,
    #[serde(with = "serde_rfc3339")]
    pub generated_at: OffsetDateTime,
}

impl PredictionRecord {
    #[must_use]
    pub fn candidates(&self, round: Round) -> &[u8] {
        match round {
            Round::Early => &self.early_candidates,
            Round::Late => &self.late_candidates,
        }
    }
}

/// Snapshot of a prediction joined with the declared result of its date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationRecord {
    pub game: GameId,
    #[serde(with = "serde_date")]
    pub date: Date,
    pub early_candidates: Vec<u8>,
    pub late_candidates: Vec<u8>,
    pub actual_early: u8,
    pub actual_late: u8,
    pub early_hit: bool,
    pub late_hit: bool,
    pub confidence: u8,
    #[serde(with = "serde_rfc3339")]
    pub verified_at: OffsetDateTime,
}

impl VerificationRecord {
    /// Compares the declared results against the prediction's candidate sets.
    ///
    /// # Errors
    /// Returns [`ForecastError::Validation`] when an actual value is outside
    /// `0..=99`.
    pub fn from_prediction(
        prediction: &PredictionRecord,
        actual_early: u8,
        actual_late: u8,
        verified_at: OffsetDateTime,
    ) -> Result<Self, ForecastError> {
        validate_number("actual_early", actual_early)?;
        validate_number("actual_late", actual_late)?;

        Ok(Self {
            game: prediction.game.clone(),
            date: prediction.date,
            early_candidates: prediction.early_candidates.clone(),
            late_candidates: prediction.late_candidates.clone(),
            actual_early,
            actual_late,
            early_hit: prediction.early_candidates.contains(&actual_early),
            late_hit: prediction.late_candidates.contains(&actual_late),
            confidence: prediction.confidence,
            verified_at,
        })
    }

    #[must_use]
    pub fn either_hit(&self) -> bool {
        self.early_hit || self.late_hit
    }

    #[must_use]
    pub fn both_hit(&self) -> bool {
        self.early_hit && self.late_hit
    }

    /// The snapshot no longer reflects the current prediction or result.
    #[must_use]
    pub fn is_stale_for(&self, prediction: &PredictionRecord, outcome: &OutcomeRecord) -> bool {
        self.early_candidates != prediction.early_candidates
            || self.late_candidates != prediction.late_candidates
            || self.confidence != prediction.confidence
            || Some(self.actual_early) != outcome.early_round
            || Some(self.actual_late) != outcome.late_round
    }
}

/// Tunables for analysis, generation, scoring, verification and retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForecastPolicy {
    pub policy_version: u32,
    pub history_window_days: u32,
    pub min_qualifying_rows: usize,
    pub hot_list_len: usize,
    pub cold_list_len: usize,
    pub cold_max_frequency: u32,
    pub hot_digit_count: usize,
    pub candidate_count: usize,
    pub hot_seed_count: usize,
    pub digit_layer_target: usize,
    pub cold_picks: usize,
    pub medium_band_first_rank: usize,
    pub medium_band_last_rank: usize,
    pub medium_picks: usize,
    pub confidence_base: u8,
    pub confidence_min: u8,
    pub confidence_max: u8,
    pub sample_days_strong: usize,
    pub sample_days_moderate: usize,
    pub sample_bonus_strong: u8,
    pub sample_bonus_moderate: u8,
    pub top_share_strong_percent: u32,
    pub top_share_moderate_percent: u32,
    pub top_share_bonus_strong: u8,
    pub top_share_bonus_moderate: u8,
    pub verification_window_days: u32,
    pub outcome_retention_days: u32,
    pub prediction_retention_days: u32,
    pub best_games_min_verified: usize,
}

impl ForecastPolicy {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            policy_version: 1,
            history_window_days: 30,
            min_qualifying_rows: 7,
            hot_list_len: 10,
            cold_list_len: 10,
            cold_max_frequency: 1,
            hot_digit_count: 3,
            candidate_count: 10,
            hot_seed_count: 3,
            digit_layer_target: 6,
            cold_picks: 2,
            medium_band_first_rank: 4,
            medium_band_last_rank: 7,
            medium_picks: 2,
            confidence_base: 60,
            confidence_min: 60,
            confidence_max: 95,
            sample_days_strong: 30,
            sample_days_moderate: 20,
            sample_bonus_strong: 10,
            sample_bonus_moderate: 5,
            top_share_strong_percent: 15,
            top_share_moderate_percent: 10,
            top_share_bonus_strong: 10,
            top_share_bonus_moderate: 5,
            verification_window_days: 30,
            outcome_retention_days: 90,
            prediction_retention_days: 30,
            best_games_min_verified: 5,
        }
    }

    /// Validates numeric bounds and layer ordering.
    ///
    /// # Errors
    /// Returns [`ForecastError::Configuration`] when one or more fields are
    /// outside allowed bounds.
    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.policy_version == 0 {
            return Err(ForecastError::Configuration(
                "policy_version MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            ("history_window_days", self.history_window_days),
            ("verification_window_days", self.verification_window_days),
            ("outcome_retention_days", self.outcome_retention_days),
            ("prediction_retention_days", self.prediction_retention_days),
        ] {
            if value == 0 {
                return Err(ForecastError::Configuration(format!(
                    "{name} MUST be >= 1"
                )));
            }
        }

        let space = usize::from(NUMBER_SPACE);
        if self.candidate_count == 0 || self.candidate_count > space {
            return Err(ForecastError::Configuration(format!(
                "candidate_count MUST be in [1, {space}]"
            )));
        }

        if self.min_qualifying_rows == 0 {
            return Err(ForecastError::Configuration(
                "min_qualifying_rows MUST be >= 1".to_string(),
            ));
        }

        if self.hot_list_len > space || self.cold_list_len > space {
            return Err(ForecastError::Configuration(format!(
                "hot_list_len and cold_list_len MUST be <= {space}"
            )));
        }

        if self.hot_digit_count > 10 {
            return Err(ForecastError::Configuration(
                "hot_digit_count MUST be <= 10".to_string(),
            ));
        }

        if self.digit_layer_target > self.candidate_count {
            return Err(ForecastError::Configuration(
                "digit_layer_target cannot exceed candidate_count".to_string(),
            ));
        }

        if self.medium_band_first_rank == 0
            || self.medium_band_first_rank > self.medium_band_last_rank
        {
            return Err(ForecastError::Configuration(
                "medium band ranks MUST satisfy 1 <= first <= last".to_string(),
            ));
        }

        if self.confidence_min > self.confidence_max || self.confidence_max > 100 {
            return Err(ForecastError::Configuration(
                "confidence bounds MUST satisfy min <= max <= 100".to_string(),
            ));
        }

        if !(self.confidence_min..=self.confidence_max).contains(&self.confidence_base) {
            return Err(ForecastError::Configuration(
                "confidence_base MUST lie within the confidence bounds".to_string(),
            ));
        }

        if self.sample_days_moderate > self.sample_days_strong {
            return Err(ForecastError::Configuration(
                "sample_days_moderate cannot exceed sample_days_strong".to_string(),
            ));
        }

        if self.top_share_moderate_percent > self.top_share_strong_percent
            || self.top_share_strong_percent > 100
        {
            return Err(ForecastError::Configuration(
                "top share thresholds MUST satisfy moderate <= strong <= 100".to_string(),
            ));
        }

        Ok(())
    }

    /// Decodes and validates a policy from JSON.
    ///
    /// # Errors
    /// Returns [`ForecastError::Configuration`] when JSON decoding fails
    /// or decoded values violate policy constraints.
    pub fn from_json(value: &Value) -> Result<Self, ForecastError> {
        let policy: Self = serde_json::from_value(value.clone()).map_err(|err| {
            ForecastError::Configuration(format!("invalid policy JSON payload: {err}"))
        })?;
        policy.validate()?;
        Ok(policy)
    }
}

impl Default for ForecastPolicy {
    fn default() -> Self {
        Self::v1()
    }
}

fn validate_number(field: &str, value: u8) -> Result<(), ForecastError> {
    if value > MAX_NUMBER {
        return Err(ForecastError::Validation(format!(
            "{field} MUST be in [0, {MAX_NUMBER}], got {value}"
        )));
    }
    Ok(())
}

fn validate_candidates(field: &str, values: &[u8], expected: usize) -> Result<(), ForecastError> {
    if values.len() != expected {
        return Err(ForecastError::Validation(format!(
            "{field} MUST contain exactly {expected} numbers, got {}",
            values.len()
        )));
    }

    let mut seen = [false; NUMBER_SPACE as usize];
    for &value in values {
        validate_number(field, value)?;
        let slot = &mut seen[usize::from(value)];
        if *slot {
            return Err(ForecastError::Validation(format!(
                "{field} contains duplicate number {value}"
            )));
        }
        *slot = true;
    }

    Ok(())
}

/// Parses a calendar date in `YYYY-MM-DD` form.
///
/// # Errors
/// Returns [`ForecastError::InvalidKey`] when the input is not a valid date.
pub fn parse_date(value: &str) -> Result<Date, ForecastError> {
    let invalid = || ForecastError::InvalidKey(format!("invalid date (expected YYYY-MM-DD): {value}"));

    if value.len() != 10 {
        return Err(invalid());
    }
    Date::parse(value, format_description!("[year]-[month]-[day]")).map_err(|_| invalid())
}

#[must_use]
pub fn format_date(value: Date) -> String {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| value.to_string())
}

/// Returns the date `days` calendar days before `date`.
///
/// # Errors
/// Returns [`ForecastError::Validation`] when the result falls outside the
/// supported calendar range.
pub fn days_before(date: Date, days: u32) -> Result<Date, ForecastError> {
    date.checked_sub(Duration::days(i64::from(days)))
        .ok_or_else(|| {
            ForecastError::Validation(format!(
                "date window underflows: {} - {days} days",
                format_date(date)
            ))
        })
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`ForecastError::Validation`] when parsing fails or an input
/// timestamp is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, ForecastError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| ForecastError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(ForecastError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`ForecastError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, ForecastError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            ForecastError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[must_use]
pub fn today_utc() -> Date {
    now_utc().date()
}

mod serde_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(value: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_date(&raw).map_err(serde::de::Error::custom)
    }
}

mod serde_rfc3339 {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(
        value: &OffsetDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let formatted = super::format_rfc3339(*value).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_rfc3339_utc(&raw).map_err(serde::de::Error::custom)
    }
}
