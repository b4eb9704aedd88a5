//! SQLite persistence for results, predictions and verifications.
//!
//! [`SqliteForecastStore`] owns the game registry, the result upsert with
//! null-preserving merge, the prediction generation pipeline built on
//! `teer-forecast-core`, verification against declared results, accuracy
//! queries and retention cleanup.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use rand::Rng;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use teer_forecast_core::{
    analyze, compose_narrative, days_before, format_date, format_rfc3339, generate_candidates,
    now_utc, parse_date, parse_rfc3339_utc, rank_games, score_confidence, summarize_accuracy,
    today_utc, AccuracyStats, Analysis, ForecastError, ForecastPolicy, GameAccuracy, GameId,
    OutcomeInput, OutcomeRecord, OutcomeSource, PredictionInput, PredictionRecord, TrendPoint,
    VerificationRecord, MAX_NUMBER,
};
use time::{Date, OffsetDateTime};
use ulid::Ulid;

const FORECAST_MIGRATION_VERSION: i64 = 1;
pub const DEFAULT_BUSY_TIMEOUT: StdDuration = StdDuration::from_millis(5000);

/// Games registered by `migrate`: key, display name, display order.
const DEFAULT_GAMES: [(&str, &str, i64); 6] = [
    ("shillong", "Shillong Teer", 1),
    ("khanapara", "Khanapara Teer", 2),
    ("juwai", "Juwai Teer", 3),
    ("shillong-morning", "Shillong Morning Teer", 4),
    ("juwai-morning", "Juwai Morning Teer", 5),
    ("khanapara-morning", "Khanapara Morning Teer", 6),
];

const SCHEMA_FORECAST_V1: &str = r"
CREATE TABLE IF NOT EXISTS games (
  name TEXT PRIMARY KEY,
  display_name TEXT NOT NULL,
  is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1)),
  display_order INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outcomes (
  game TEXT NOT NULL,
  date TEXT NOT NULL,
  early_round INTEGER CHECK (early_round IS NULL OR early_round BETWEEN 0 AND 99),
  late_round INTEGER CHECK (late_round IS NULL OR late_round BETWEEN 0 AND 99),
  source TEXT NOT NULL CHECK (source IN ('automatic', 'manual')),
  updated_at TEXT NOT NULL,
  PRIMARY KEY (game, date)
);

CREATE INDEX IF NOT EXISTS idx_outcomes_date ON outcomes(date DESC);

CREATE TABLE IF NOT EXISTS predictions (
  game TEXT NOT NULL,
  date TEXT NOT NULL,
  early_candidates TEXT NOT NULL,
  late_candidates TEXT NOT NULL,
  narrative TEXT NOT NULL,
  confidence INTEGER NOT NULL CHECK (confidence BETWEEN 0 AND 100),
  generated_at TEXT NOT NULL,
  PRIMARY KEY (game, date)
);

CREATE INDEX IF NOT EXISTS idx_predictions_date ON predictions(date DESC);

CREATE TABLE IF NOT EXISTS verifications (
  game TEXT NOT NULL,
  date TEXT NOT NULL,
  early_candidates TEXT NOT NULL,
  late_candidates TEXT NOT NULL,
  actual_early INTEGER NOT NULL CHECK (actual_early BETWEEN 0 AND 99),
  actual_late INTEGER NOT NULL CHECK (actual_late BETWEEN 0 AND 99),
  early_hit INTEGER NOT NULL CHECK (early_hit IN (0, 1)),
  late_hit INTEGER NOT NULL CHECK (late_hit IN (0, 1)),
  confidence INTEGER NOT NULL CHECK (confidence BETWEEN 0 AND 100),
  verified_at TEXT NOT NULL,
  PRIMARY KEY (game, date)
);

CREATE INDEX IF NOT EXISTS idx_verifications_date ON verifications(date DESC);
";

const OUTCOME_COLUMNS: &str = "game, date, early_round, late_round, source, updated_at";
const PREDICTION_COLUMNS: &str =
    "game, date, early_candidates, late_candidates, narrative, confidence, generated_at";
const VERIFICATION_COLUMNS: &str = "game, date, early_candidates, late_candidates, actual_early, actual_late, early_hit, late_hit, confidence, verified_at";

pub struct SqliteForecastStore {
    conn: Connection,
    policy: ForecastPolicy,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GameEntry {
    pub game: GameId,
    pub display_name: String,
    pub is_active: bool,
    pub display_order: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedGame {
    pub game: GameId,
    pub early_rows: usize,
    pub late_rows: usize,
    pub required: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GenerationReport {
    pub cycle_id: String,
    pub date: String,
    pub predictions: Vec<PredictionRecord>,
    pub skipped: Vec<SkippedGame>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub cycle_id: String,
    pub as_of: String,
    pub scanned: usize,
    pub verified: usize,
    pub unchanged: usize,
    pub skipped_no_prediction: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub as_of: String,
    pub outcomes_deleted: usize,
    pub predictions_deleted: usize,
}

enum GameForecast {
    Generated(PredictionRecord),
    Skipped(SkippedGame),
}

impl SqliteForecastStore {
    /// Opens a store with the default five second busy timeout.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or configured.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens a store whose writers wait at most `busy_timeout` for a lock.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or configured.
    pub fn open_with_timeout(path: &Path, busy_timeout: StdDuration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.busy_timeout(busy_timeout)
            .context("failed to configure sqlite busy timeout")?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self {
            conn,
            policy: ForecastPolicy::v1(),
        })
    }

    /// Replaces the active policy after validating it.
    ///
    /// # Errors
    /// Returns [`ForecastError::Configuration`] when the policy is invalid.
    pub fn with_policy(mut self, policy: ForecastPolicy) -> Result<Self> {
        policy.validate()?;
        self.policy = policy;
        Ok(self)
    }

    #[must_use]
    pub fn policy(&self) -> &ForecastPolicy {
        &self.policy
    }

    /// Creates tables and registers the default games. Safe to rerun.
    ///
    /// # Errors
    /// Returns an error when schema creation or seeding fails.
    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_FORECAST_V1)
            .context("failed to apply forecast schema")?;

        let now = format_rfc3339(now_utc())?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![FORECAST_MIGRATION_VERSION, now],
            )
            .context("failed to register forecast schema migration")?;

        for (name, display_name, display_order) in DEFAULT_GAMES {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO games(name, display_name, is_active, display_order, created_at)
                     VALUES (?1, ?2, 1, ?3, ?4)",
                    params![name, display_name, display_order, now],
                )
                .with_context(|| format!("failed to seed game {name}"))?;
        }

        Ok(())
    }

    /// Registers or renames a game.
    ///
    /// # Errors
    /// Returns an error when the display name is blank or the write fails.
    pub fn upsert_game(
        &self,
        game: &GameId,
        display_name: &str,
        display_order: i64,
        is_active: bool,
    ) -> Result<GameEntry> {
        if display_name.trim().is_empty() {
            return Err(
                ForecastError::Validation("display_name cannot be empty".to_string()).into(),
            );
        }

        let now = format_rfc3339(now_utc())?;
        self.conn
            .query_row(
                "INSERT INTO games(name, display_name, is_active, display_order, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                   display_name = excluded.display_name,
                   is_active = excluded.is_active,
                   display_order = excluded.display_order
                 RETURNING name, display_name, is_active, display_order",
                params![
                    game.as_str(),
                    display_name,
                    bool_to_sql(is_active),
                    display_order,
                    now
                ],
                parse_game_row,
            )
            .with_context(|| format!("failed to upsert game {game}"))
    }

    /// Toggles whether a game takes part in batch generation.
    ///
    /// # Errors
    /// Returns [`ForecastError::InvalidKey`] when the game is not registered.
    pub fn set_game_active(&self, game: &GameId, is_active: bool) -> Result<GameEntry> {
        self.conn
            .query_row(
                "UPDATE games SET is_active = ?2 WHERE name = ?1
                 RETURNING name, display_name, is_active, display_order",
                params![game.as_str(), bool_to_sql(is_active)],
                parse_game_row,
            )
            .optional()
            .with_context(|| format!("failed to update game {game}"))?
            .ok_or_else(|| ForecastError::InvalidKey(format!("unknown game: {game}")).into())
    }

    /// Lists games in display order.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn list_games(&self, include_inactive: bool) -> Result<Vec<GameEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, display_name, is_active, display_order
             FROM games
             WHERE ?1 OR is_active = 1
             ORDER BY display_order ASC, name ASC",
        )?;
        let rows = stmt.query_map(params![include_inactive], parse_game_row)?;
        collect_rows(rows)
    }

    /// Active game keys in display order.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn active_games(&self) -> Result<Vec<GameId>> {
        Ok(self
            .list_games(false)?
            .into_iter()
            .map(|entry| entry.game)
            .collect())
    }

    /// Inserts or merges a declared result.
    ///
    /// An absent round never overwrites a stored value, so partial updates
    /// accumulate into a complete row. An update carrying no round at all
    /// keeps the stored source.
    ///
    /// # Errors
    /// Returns [`ForecastError::Validation`] for out-of-range rounds and
    /// [`ForecastError::InvalidKey`] for unregistered games.
    pub fn record_outcome(&self, input: &OutcomeInput) -> Result<OutcomeRecord> {
        input.validate()?;
        self.ensure_game_registered(&input.game)?;

        let now = format_rfc3339(now_utc())?;
        let record = self
            .conn
            .query_row(
                &format!(
                    "INSERT INTO outcomes(game, date, early_round, late_round, source, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(game, date) DO UPDATE SET
                       early_round = COALESCE(excluded.early_round, outcomes.early_round),
                       late_round = COALESCE(excluded.late_round, outcomes.late_round),
                       source = CASE
                         WHEN excluded.early_round IS NULL AND excluded.late_round IS NULL
                           THEN outcomes.source
                         ELSE excluded.source
                       END,
                       updated_at = excluded.updated_at
                     RETURNING {OUTCOME_COLUMNS}"
                ),
                params![
                    input.game.as_str(),
                    format_date(input.date),
                    input.early_round,
                    input.late_round,
                    input.source.as_str(),
                    now
                ],
                parse_outcome_row,
            )
            .with_context(|| {
                format!(
                    "failed to record outcome for {} on {}",
                    input.game,
                    format_date(input.date)
                )
            })?;

        debug!(
            "recorded outcome game={} date={} early={:?} late={:?} source={}",
            record.game,
            format_date(record.date),
            record.early_round,
            record.late_round,
            record.source.as_str()
        );
        Ok(record)
    }

    /// Records a result and verifies the matching prediction once both
    /// rounds are known.
    ///
    /// # Errors
    /// Propagates errors from [`Self::record_outcome`] and [`Self::verify`].
    pub fn record_outcome_and_verify(
        &mut self,
        input: &OutcomeInput,
    ) -> Result<(OutcomeRecord, Option<VerificationRecord>)> {
        let outcome = self.record_outcome(input)?;
        let verification = self.verify(
            &outcome.game,
            outcome.date,
            outcome.early_round,
            outcome.late_round,
        )?;
        Ok((outcome, verification))
    }

    /// # Errors
    /// Returns an error when the query fails or a stored row is malformed.
    pub fn get_outcome(&self, game: &GameId, date: Date) -> Result<Option<OutcomeRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {OUTCOME_COLUMNS} FROM outcomes WHERE game = ?1 AND date = ?2"),
                params![game.as_str(), format_date(date)],
                parse_outcome_row,
            )
            .optional()
            .context("failed to load outcome")
    }

    /// Results with `before - days <= date < before`, most recent first.
    ///
    /// # Errors
    /// Returns an error when the window underflows or the query fails.
    pub fn outcome_history(
        &self,
        game: &GameId,
        days: u32,
        before: Date,
    ) -> Result<Vec<OutcomeRecord>> {
        let start = days_before(before, days)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OUTCOME_COLUMNS}
             FROM outcomes
             WHERE game = ?1 AND date >= ?2 AND date < ?3
             ORDER BY date DESC"
        ))?;
        let rows = stmt.query_map(
            params![game.as_str(), format_date(start), format_date(before)],
            parse_outcome_row,
        )?;
        collect_rows(rows)
    }

    /// Replaces the prediction for `(game, date)` in a single statement.
    ///
    /// # Errors
    /// Returns [`ForecastError::Validation`] when the input violates the
    /// policy and [`ForecastError::InvalidKey`] for unregistered games.
    pub fn upsert_prediction(&self, input: &PredictionInput) -> Result<PredictionRecord> {
        input.validate(&self.policy)?;
        self.ensure_game_registered(&input.game)?;

        let early = serde_json::to_string(&input.early_candidates)
            .context("failed to serialize early candidates")?;
        let late = serde_json::to_string(&input.late_candidates)
            .context("failed to serialize late candidates")?;
        let now = format_rfc3339(now_utc())?;

        let record = self
            .conn
            .query_row(
                &format!(
                    "INSERT INTO predictions(game, date, early_candidates, late_candidates, narrative, confidence, generated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(game, date) DO UPDATE SET
                       early_candidates = excluded.early_candidates,
                       late_candidates = excluded.late_candidates,
                       narrative = excluded.narrative,
                       confidence = excluded.confidence,
                       generated_at = excluded.generated_at
                     RETURNING {PREDICTION_COLUMNS}"
                ),
                params![
                    input.game.as_str(),
                    format_date(input.date),
                    early,
                    late,
                    input.narrative,
                    input.confidence,
                    now
                ],
                parse_prediction_row,
            )
            .with_context(|| {
                format!(
                    "failed to upsert prediction for {} on {}",
                    input.game,
                    format_date(input.date)
                )
            })?;

        debug!(
            "upserted prediction game={} date={} confidence={}",
            record.game,
            format_date(record.date),
            record.confidence
        );
        Ok(record)
    }

    /// Stores an operator-supplied prediction in place of the generated one.
    ///
    /// # Errors
    /// Same as [`Self::upsert_prediction`].
    pub fn override_prediction(&self, input: &PredictionInput) -> Result<PredictionRecord> {
        let record = self.upsert_prediction(input)?;
        warn!(
            "prediction overridden game={} date={} confidence={}",
            record.game,
            format_date(record.date),
            record.confidence
        );
        Ok(record)
    }

    /// # Errors
    /// Returns an error when the query fails or a stored row is malformed.
    pub fn get_prediction(&self, game: &GameId, date: Date) -> Result<Option<PredictionRecord>> {
        load_prediction(&self.conn, game, date)
    }

    /// Every stored prediction for one date, keyed by game.
    ///
    /// # Errors
    /// Returns an error when the query fails or a stored row is malformed.
    pub fn predictions_for_date(&self, date: Date) -> Result<BTreeMap<GameId, PredictionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE date = ?1 ORDER BY game ASC"
        ))?;
        let rows = stmt.query_map(params![format_date(date)], parse_prediction_row)?;
        Ok(collect_rows(rows)?
            .into_iter()
            .map(|record| (record.game.clone(), record))
            .collect())
    }

    /// # Errors
    /// Returns an error when the query fails or a stored row is malformed.
    pub fn today_predictions(&self) -> Result<BTreeMap<GameId, PredictionRecord>> {
        self.predictions_for_date(today_utc())
    }

    /// Predictions with `as_of - days <= date <= as_of`, most recent first.
    ///
    /// # Errors
    /// Returns an error when the window underflows or the query fails.
    pub fn prediction_history(
        &self,
        game: &GameId,
        days: u32,
        as_of: Date,
    ) -> Result<Vec<PredictionRecord>> {
        let start = days_before(as_of, days)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PREDICTION_COLUMNS}
             FROM predictions
             WHERE game = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date DESC"
        ))?;
        let rows = stmt.query_map(
            params![game.as_str(), format_date(start), format_date(as_of)],
            parse_prediction_row,
        )?;
        collect_rows(rows)
    }

    /// Analyzes the results preceding `date` and stores a fresh prediction.
    ///
    /// Returns `Ok(None)` when the history window holds too few results.
    ///
    /// # Errors
    /// Returns [`ForecastError::InvalidKey`] for unregistered games and
    /// propagates storage failures.
    pub fn generate_for_game<R: Rng + ?Sized>(
        &self,
        game: &GameId,
        date: Date,
        rng: &mut R,
    ) -> Result<Option<PredictionRecord>> {
        match self.forecast_game(game, date, rng)? {
            GameForecast::Generated(record) => Ok(Some(record)),
            GameForecast::Skipped(_) => Ok(None),
        }
    }

    /// Runs generation for every active game, in display order.
    ///
    /// Games with insufficient history are reported as skipped; storage
    /// failures abort the cycle.
    ///
    /// # Errors
    /// Propagates the first storage failure.
    pub fn generate_for_all_active_games<R: Rng + ?Sized>(
        &self,
        date: Date,
        rng: &mut R,
    ) -> Result<GenerationReport> {
        let cycle_id = Ulid::new().to_string();
        let games = self.active_games()?;
        info!(
            "generation cycle {cycle_id} started date={} games={}",
            format_date(date),
            games.len()
        );

        let mut predictions = Vec::new();
        let mut skipped = Vec::new();
        for game in &games {
            match self.forecast_game(game, date, rng)? {
                GameForecast::Generated(record) => predictions.push(record),
                GameForecast::Skipped(entry) => {
                    warn!(
                        "generation cycle {cycle_id} skipped game={} early_rows={} late_rows={} required={}",
                        entry.game, entry.early_rows, entry.late_rows, entry.required
                    );
                    skipped.push(entry);
                }
            }
        }

        info!(
            "generation cycle {cycle_id} finished generated={} skipped={}",
            predictions.len(),
            skipped.len()
        );
        Ok(GenerationReport {
            cycle_id,
            date: format_date(date),
            predictions,
            skipped,
        })
    }

    /// Verifies the prediction for `(game, date)` against declared results.
    ///
    /// Returns `Ok(None)` without writing when either round is missing or no
    /// prediction exists. The lookup and the upsert share one immediate
    /// transaction.
    ///
    /// # Errors
    /// Returns [`ForecastError::Validation`] for out-of-range values and
    /// propagates storage failures.
    pub fn verify(
        &mut self,
        game: &GameId,
        date: Date,
        actual_early: Option<u8>,
        actual_late: Option<u8>,
    ) -> Result<Option<VerificationRecord>> {
        for (field, value) in [("actual_early", actual_early), ("actual_late", actual_late)] {
            if let Some(number) = value {
                if number > MAX_NUMBER {
                    return Err(ForecastError::Validation(format!(
                        "{field} MUST be in [0, {MAX_NUMBER}], got {number}"
                    ))
                    .into());
                }
            }
        }

        let (Some(early), Some(late)) = (actual_early, actual_late) else {
            debug!(
                "verification deferred game={game} date={}: result incomplete",
                format_date(date)
            );
            return Ok(None);
        };

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin verification transaction")?;

        let Some(prediction) = load_prediction(&tx, game, date)? else {
            debug!(
                "verification skipped game={game} date={}: no prediction",
                format_date(date)
            );
            return Ok(None);
        };

        let record = VerificationRecord::from_prediction(&prediction, early, late, now_utc())?;
        let stored = upsert_verification(&tx, &record)?;
        tx.commit().context("failed to commit verification")?;

        info!(
            "verified game={} date={} early_hit={} late_hit={}",
            stored.game,
            format_date(stored.date),
            stored.early_hit,
            stored.late_hit
        );
        Ok(Some(stored))
    }

    /// # Errors
    /// Returns an error when the query fails or a stored row is malformed.
    pub fn get_verification(&self, game: &GameId, date: Date) -> Result<Option<VerificationRecord>> {
        load_verification(&self.conn, game, date)
    }

    /// Verifies every complete result within the verification window whose
    /// verification is missing or stale.
    ///
    /// # Errors
    /// Propagates storage failures; nothing from the pass is committed then.
    pub fn verify_all_pending(&mut self, as_of: Date) -> Result<ReconcileReport> {
        let cycle_id = Ulid::new().to_string();
        let start = days_before(as_of, self.policy.verification_window_days)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin reconciliation transaction")?;

        let outcomes = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {OUTCOME_COLUMNS}
                 FROM outcomes
                 WHERE date >= ?1 AND date <= ?2
                   AND early_round IS NOT NULL AND late_round IS NOT NULL
                 ORDER BY date ASC, game ASC"
            ))?;
            let rows = stmt.query_map(
                params![format_date(start), format_date(as_of)],
                parse_outcome_row,
            )?;
            collect_rows(rows)?
        };

        let mut report = ReconcileReport {
            cycle_id: cycle_id.clone(),
            as_of: format_date(as_of),
            scanned: 0,
            verified: 0,
            unchanged: 0,
            skipped_no_prediction: 0,
        };

        for outcome in &outcomes {
            let (Some(early), Some(late)) = (outcome.early_round, outcome.late_round) else {
                continue;
            };
            report.scanned += 1;

            let Some(prediction) = load_prediction(&tx, &outcome.game, outcome.date)? else {
                report.skipped_no_prediction += 1;
                continue;
            };

            if let Some(existing) = load_verification(&tx, &outcome.game, outcome.date)? {
                if !existing.is_stale_for(&prediction, outcome) {
                    report.unchanged += 1;
                    continue;
                }
                debug!(
                    "reconcile {cycle_id} refreshing stale verification game={} date={}",
                    outcome.game,
                    format_date(outcome.date)
                );
            }

            let record = VerificationRecord::from_prediction(&prediction, early, late, now_utc())?;
            upsert_verification(&tx, &record)?;
            report.verified += 1;
        }

        tx.commit().context("failed to commit reconciliation")?;
        info!(
            "reconcile {cycle_id} as_of={} scanned={} verified={} unchanged={} no_prediction={}",
            report.as_of, report.scanned, report.verified, report.unchanged, report.skipped_no_prediction
        );
        Ok(report)
    }

    /// Accuracy for one game over `as_of - days <= date <= as_of`.
    ///
    /// # Errors
    /// Returns an error when the window underflows or the query fails.
    pub fn accuracy_for_game(&self, game: &GameId, days: u32, as_of: Date) -> Result<AccuracyStats> {
        let start = days_before(as_of, days)?;
        let records = load_verifications(&self.conn, Some(game), Some(start), as_of, None)?;
        Ok(summarize_accuracy(&records))
    }

    /// Accuracy across all games over `as_of - days <= date <= as_of`.
    ///
    /// # Errors
    /// Returns an error when the window underflows or the query fails.
    pub fn overall_accuracy(&self, days: u32, as_of: Date) -> Result<AccuracyStats> {
        let start = days_before(as_of, days)?;
        let records = load_verifications(&self.conn, None, Some(start), as_of, None)?;
        Ok(summarize_accuracy(&records))
    }

    /// Per-date hit flags for one game, most recent first.
    ///
    /// # Errors
    /// Returns an error when the window underflows or the query fails.
    pub fn accuracy_trend(&self, game: &GameId, days: u32, as_of: Date) -> Result<Vec<TrendPoint>> {
        let start = days_before(as_of, days)?;
        let records = load_verifications(&self.conn, Some(game), Some(start), as_of, None)?;
        Ok(records.iter().map(TrendPoint::from).collect())
    }

    /// Games with at least `best_games_min_verified` verifications in the
    /// window, best either-round hit rate first.
    ///
    /// # Errors
    /// Returns an error when the window underflows or the query fails.
    pub fn best_games(&self, days: u32, as_of: Date) -> Result<Vec<GameAccuracy>> {
        let start = days_before(as_of, days)?;
        let records = load_verifications(&self.conn, None, Some(start), as_of, None)?;
        Ok(rank_games(&records, self.policy.best_games_min_verified))
    }

    /// Latest verifications, optionally for one game, most recent first.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn recent_verifications(
        &self,
        game: Option<&GameId>,
        limit: usize,
    ) -> Result<Vec<VerificationRecord>> {
        load_verifications(&self.conn, game, None, Date::MAX, Some(limit))
    }

    /// Deletes results dated before `as_of - days`.
    ///
    /// # Errors
    /// Returns an error when the window underflows or the delete fails.
    pub fn delete_outcomes_older_than(&self, days: u32, as_of: Date) -> Result<usize> {
        let cutoff = days_before(as_of, days)?;
        self.conn
            .execute(
                "DELETE FROM outcomes WHERE date < ?1",
                params![format_date(cutoff)],
            )
            .context("failed to delete expired outcomes")
    }

    /// Deletes predictions dated before `as_of - days`. Verifications are kept.
    ///
    /// # Errors
    /// Returns an error when the window underflows or the delete fails.
    pub fn delete_predictions_older_than(&self, days: u32, as_of: Date) -> Result<usize> {
        let cutoff = days_before(as_of, days)?;
        self.conn
            .execute(
                "DELETE FROM predictions WHERE date < ?1",
                params![format_date(cutoff)],
            )
            .context("failed to delete expired predictions")
    }

    /// Applies the policy retention windows.
    ///
    /// # Errors
    /// Propagates failures from the two delete operations.
    pub fn cleanup(&self, as_of: Date) -> Result<CleanupReport> {
        let outcomes_deleted =
            self.delete_outcomes_older_than(self.policy.outcome_retention_days, as_of)?;
        let predictions_deleted =
            self.delete_predictions_older_than(self.policy.prediction_retention_days, as_of)?;
        info!(
            "cleanup as_of={} outcomes_deleted={outcomes_deleted} predictions_deleted={predictions_deleted}",
            format_date(as_of)
        );
        Ok(CleanupReport {
            as_of: format_date(as_of),
            outcomes_deleted,
            predictions_deleted,
        })
    }

    fn forecast_game<R: Rng + ?Sized>(
        &self,
        game: &GameId,
        date: Date,
        rng: &mut R,
    ) -> Result<GameForecast> {
        self.ensure_game_registered(game)?;

        let history = self.outcome_history(game, self.policy.history_window_days, date)?;
        let summary = match analyze(&history, &self.policy) {
            Analysis::Ready(summary) => summary,
            Analysis::InsufficientData {
                early_rows,
                late_rows,
                required,
            } => {
                debug!(
                    "insufficient history game={game} date={} early_rows={early_rows} late_rows={late_rows}",
                    format_date(date)
                );
                return Ok(GameForecast::Skipped(SkippedGame {
                    game: game.clone(),
                    early_rows,
                    late_rows,
                    required,
                }));
            }
        };

        let early_candidates = generate_candidates(&summary.early, &self.policy, rng);
        let late_candidates = generate_candidates(&summary.late, &self.policy, rng);
        let input = PredictionInput {
            game: game.clone(),
            date,
            early_candidates,
            late_candidates,
            narrative: compose_narrative(game, &summary, &history),
            confidence: score_confidence(&summary, &self.policy),
        };

        let record = self.upsert_prediction(&input)?;
        info!(
            "generated prediction game={} date={} confidence={} window_days={}",
            record.game,
            format_date(record.date),
            record.confidence,
            summary.days
        );
        Ok(GameForecast::Generated(record))
    }

    fn ensure_game_registered(&self, game: &GameId) -> Result<()> {
        let known = self
            .conn
            .query_row(
                "SELECT 1 FROM games WHERE name = ?1",
                params![game.as_str()],
                |_| Ok(()),
            )
            .optional()
            .context("failed to look up game")?;
        if known.is_none() {
            return Err(ForecastError::InvalidKey(format!("unknown game: {game}")).into());
        }
        Ok(())
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn load_prediction(conn: &Connection, game: &GameId, date: Date) -> Result<Option<PredictionRecord>> {
    conn.query_row(
        &format!("SELECT {PREDICTION_COLUMNS} FROM predictions WHERE game = ?1 AND date = ?2"),
        params![game.as_str(), format_date(date)],
        parse_prediction_row,
    )
    .optional()
    .context("failed to load prediction")
}

fn load_verification(
    conn: &Connection,
    game: &GameId,
    date: Date,
) -> Result<Option<VerificationRecord>> {
    conn.query_row(
        &format!("SELECT {VERIFICATION_COLUMNS} FROM verifications WHERE game = ?1 AND date = ?2"),
        params![game.as_str(), format_date(date)],
        parse_verification_row,
    )
    .optional()
    .context("failed to load verification")
}

fn load_verifications(
    conn: &Connection,
    game: Option<&GameId>,
    start: Option<Date>,
    end: Date,
    limit: Option<usize>,
) -> Result<Vec<VerificationRecord>> {
    let limit = match limit {
        Some(value) => i64::try_from(value).context("limit exceeds i64 range")?,
        None => -1,
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {VERIFICATION_COLUMNS}
         FROM verifications
         WHERE (?1 IS NULL OR game = ?1)
           AND (?2 IS NULL OR date >= ?2)
           AND date <= ?3
         ORDER BY date DESC, game ASC
         LIMIT ?4"
    ))?;
    let rows = stmt.query_map(
        params![
            game.map(GameId::as_str),
            start.map(format_date),
            format_date(end),
            limit
        ],
        parse_verification_row,
    )?;
    collect_rows(rows)
}

fn upsert_verification(conn: &Connection, record: &VerificationRecord) -> Result<VerificationRecord> {
    let early = serde_json::to_string(&record.early_candidates)
        .context("failed to serialize early candidates")?;
    let late = serde_json::to_string(&record.late_candidates)
        .context("failed to serialize late candidates")?;

    conn.query_row(
        &format!(
            "INSERT INTO verifications(game, date, early_candidates, late_candidates, actual_early, actual_late, early_hit, late_hit, confidence, verified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(game, date) DO UPDATE SET
               early_candidates = excluded.early_candidates,
               late_candidates = excluded.late_candidates,
               actual_early = excluded.actual_early,
               actual_late = excluded.actual_late,
               early_hit = excluded.early_hit,
               late_hit = excluded.late_hit,
               confidence = excluded.confidence,
               verified_at = excluded.verified_at
             RETURNING {VERIFICATION_COLUMNS}"
        ),
        params![
            record.game.as_str(),
            format_date(record.date),
            early,
            late,
            record.actual_early,
            record.actual_late,
            bool_to_sql(record.early_hit),
            bool_to_sql(record.late_hit),
            record.confidence,
            format_rfc3339(record.verified_at)?
        ],
        parse_verification_row,
    )
    .with_context(|| {
        format!(
            "failed to upsert verification for {} on {}",
            record.game,
            format_date(record.date)
        )
    })
}

fn parse_game_row(row: &Row<'_>) -> rusqlite::Result<GameEntry> {
    Ok(GameEntry {
        game: column_game(row, 0)?,
        display_name: row.get(1)?,
        is_active: column_bool(row, 2)?,
        display_order: row.get(3)?,
    })
}

fn parse_outcome_row(row: &Row<'_>) -> rusqlite::Result<OutcomeRecord> {
    let source_raw: String = row.get(4)?;
    let source = OutcomeSource::parse(&source_raw)
        .ok_or_else(|| invalid_column(4, Type::Text, format!("unknown outcome source: {source_raw}")))?;

    Ok(OutcomeRecord {
        game: column_game(row, 0)?,
        date: column_date(row, 1)?,
        early_round: column_optional_number(row, 2)?,
        late_round: column_optional_number(row, 3)?,
        source,
        updated_at: column_timestamp(row, 5)?,
    })
}

fn parse_prediction_row(row: &Row<'_>) -> rusqlite::Result<PredictionRecord> {
    Ok(PredictionRecord {
        game: column_game(row, 0)?,
        date: column_date(row, 1)?,
        early_candidates: column_candidates(row, 2)?,
        late_candidates: column_candidates(row, 3)?,
        narrative: row.get(4)?,
        confidence: column_small_int(row, 5)?,
        generated_at: column_timestamp(row, 6)?,
    })
}

fn parse_verification_row(row: &Row<'_>) -> rusqlite::Result<VerificationRecord> {
    Ok(VerificationRecord {
        game: column_game(row, 0)?,
        date: column_date(row, 1)?,
        early_candidates: column_candidates(row, 2)?,
        late_candidates: column_candidates(row, 3)?,
        actual_early: column_number(row, 4)?,
        actual_late: column_number(row, 5)?,
        early_hit: column_bool(row, 6)?,
        late_hit: column_bool(row, 7)?,
        confidence: column_small_int(row, 8)?,
        verified_at: column_timestamp(row, 9)?,
    })
}

fn column_game(row: &Row<'_>, idx: usize) -> rusqlite::Result<GameId> {
    let raw: String = row.get(idx)?;
    GameId::parse(&raw).map_err(|err| invalid_column(idx, Type::Text, err.to_string()))
}

fn column_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Date> {
    let raw: String = row.get(idx)?;
    parse_date(&raw).map_err(|err| invalid_column(idx, Type::Text, err.to_string()))
}

fn column_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let raw: String = row.get(idx)?;
    parse_rfc3339_utc(&raw).map_err(|err| invalid_column(idx, Type::Text, err.to_string()))
}

fn column_small_int(row: &Row<'_>, idx: usize) -> rusqlite::Result<u8> {
    let raw: i64 = row.get(idx)?;
    u8::try_from(raw)
        .map_err(|_| invalid_column(idx, Type::Integer, format!("value out of range: {raw}")))
}

fn column_number(row: &Row<'_>, idx: usize) -> rusqlite::Result<u8> {
    let value = column_small_int(row, idx)?;
    if value > MAX_NUMBER {
        return Err(invalid_column(
            idx,
            Type::Integer,
            format!("round value out of range: {value}"),
        ));
    }
    Ok(value)
}

fn column_optional_number(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u8>> {
    let raw: Option<i64> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(value) => match u8::try_from(value) {
            Ok(number) if number <= MAX_NUMBER => Ok(Some(number)),
            _ => Err(invalid_column(
                idx,
                Type::Integer,
                format!("round value out of range: {value}"),
            )),
        },
    }
}

fn column_candidates(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<u8>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|err| invalid_column(idx, Type::Text, format!("invalid candidate list: {err}")))
}

fn column_bool(row: &Row<'_>, idx: usize) -> rusqlite::Result<bool> {
    let raw: i64 = row.get(idx)?;
    match raw {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(invalid_column(
            idx,
            Type::Integer,
            format!("invalid boolean flag: {other}"),
        )),
    }
}

fn invalid_column(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        ty,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row.map_err(|err| anyhow!("failed to decode row: {err}"))?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err:#}"),
        }
    }

    fn fixture_store() -> SqliteForecastStore {
        let store = must(SqliteForecastStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn temp_db_path(label: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("teer-{label}-{}.sqlite3", Ulid::new()))
    }

    fn game(raw: &str) -> GameId {
        must(GameId::parse(raw).map_err(anyhow::Error::from))
    }

    fn date(raw: &str) -> Date {
        must(parse_date(raw).map_err(anyhow::Error::from))
    }

    fn day_offset(base: Date, days: u32) -> Date {
        must(days_before(base, days).map_err(anyhow::Error::from))
    }

    fn outcome(game_key: &str, day: Date, early: Option<u8>, late: Option<u8>) -> OutcomeInput {
        OutcomeInput {
            game: game(game_key),
            date: day,
            early_round: early,
            late_round: late,
            source: OutcomeSource::Automatic,
        }
    }

    fn prediction_input(game_key: &str, day: &str) -> PredictionInput {
        PredictionInput {
            game: game(game_key),
            date: date(day),
            early_candidates: (1..=10).collect(),
            late_candidates: (11..=20).collect(),
            narrative: "operator picks".to_string(),
            confidence: 75,
        }
    }

    /// Seeds `days` consecutive complete results ending the day before `before`.
    fn seed_history(store: &SqliteForecastStore, game_key: &str, before: Date, days: u32) {
        let mut rng = ChaCha8Rng::seed_from_u64(u64::from(days) * 31);
        for offset in 1..=days {
            let early = rng.gen_range(0..100_u8);
            let late = rng.gen_range(0..100_u8);
            let _ = must(store.record_outcome(&outcome(
                game_key,
                day_offset(before, offset),
                Some(early),
                Some(late),
            )));
        }
    }

    fn count_rows(store: &SqliteForecastStore, table: &str) -> i64 {
        must(
            store
                .connection()
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(anyhow::Error::from),
        )
    }

    fn forecast_error(err: &anyhow::Error) -> Option<&ForecastError> {
        err.downcast_ref::<ForecastError>()
    }

    #[test]
    fn migrate_is_idempotent_and_seeds_default_games() {
        let store = fixture_store();
        must(store.migrate());

        let games = must(store.list_games(true));
        let keys: Vec<&str> = games.iter().map(|entry| entry.game.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "shillong",
                "khanapara",
                "juwai",
                "shillong-morning",
                "juwai-morning",
                "khanapara-morning"
            ]
        );
        assert_eq!(count_rows(&store, "schema_migrations"), 1);
    }

    #[test]
    fn deactivated_games_leave_the_active_list() {
        let store = fixture_store();
        let entry = must(store.set_game_active(&game("juwai-morning"), false));
        assert!(!entry.is_active);

        let active = must(store.active_games());
        assert_eq!(active.len(), 5);
        assert!(!active.contains(&game("juwai-morning")));
        assert_eq!(must(store.list_games(true)).len(), 6);
    }

    #[test]
    fn unknown_game_is_rejected_with_invalid_key() {
        let store = fixture_store();
        let Err(err) = store.set_game_active(&game("bhutan"), true) else {
            panic!("expected unknown game error");
        };
        assert!(matches!(forecast_error(&err), Some(ForecastError::InvalidKey(_))));

        let Err(err) = store.record_outcome(&outcome("bhutan", date("2026-02-07"), Some(1), None))
        else {
            panic!("expected unknown game error");
        };
        assert!(matches!(forecast_error(&err), Some(ForecastError::InvalidKey(_))));
    }

    #[test]
    fn upserted_game_takes_part_in_generation_order() {
        let store = fixture_store();
        let entry = must(store.upsert_game(&game("night-teer"), "Night Teer", 0, true));
        assert_eq!(entry.display_name, "Night Teer");
        assert_eq!(must(store.active_games())[0], game("night-teer"));

        let renamed = must(store.upsert_game(&game("night-teer"), "Night Teer Deluxe", 9, false));
        assert_eq!(renamed.display_order, 9);
        assert!(!renamed.is_active);
        assert!(store
            .upsert_game(&game("night-teer"), "  ", 9, false)
            .is_err());
    }

    #[test]
    fn record_outcome_is_idempotent() {
        let store = fixture_store();
        let input = outcome("shillong", date("2026-02-07"), Some(23), Some(45));
        let first = must(store.record_outcome(&input));
        let second = must(store.record_outcome(&input));

        assert_eq!(first.early_round, second.early_round);
        assert_eq!(first.late_round, second.late_round);
        assert_eq!(count_rows(&store, "outcomes"), 1);
    }

    #[test]
    fn partial_outcomes_merge_without_erasing_values() {
        let store = fixture_store();
        let day = date("2026-02-07");

        let partial = must(store.record_outcome(&outcome("shillong", day, Some(23), None)));
        assert_eq!(partial.early_round, Some(23));
        assert_eq!(partial.late_round, None);
        assert!(!partial.is_complete());

        let merged = must(store.record_outcome(&outcome("shillong", day, None, Some(45))));
        assert_eq!(merged.early_round, Some(23));
        assert_eq!(merged.late_round, Some(45));

        let untouched = must(store.record_outcome(&outcome("shillong", day, None, None)));
        assert_eq!(untouched.early_round, Some(23));
        assert_eq!(untouched.late_round, Some(45));

        let mut correction = outcome("shillong", day, Some(24), None);
        correction.source = OutcomeSource::Manual;
        let corrected = must(store.record_outcome(&correction));
        assert_eq!(corrected.early_round, Some(24));
        assert_eq!(corrected.late_round, Some(45));
        assert_eq!(corrected.source, OutcomeSource::Manual);
    }

    #[test]
    fn empty_automatic_update_keeps_manual_source() {
        let store = fixture_store();
        let day = date("2026-02-07");

        let mut manual = outcome("shillong", day, Some(23), Some(45));
        manual.source = OutcomeSource::Manual;
        let _ = must(store.record_outcome(&manual));

        let tick = must(store.record_outcome(&outcome("shillong", day, None, None)));
        assert_eq!(tick.source, OutcomeSource::Manual);
        assert_eq!(tick.early_round, Some(23));
        assert_eq!(tick.late_round, Some(45));

        let relabeled = must(store.record_outcome(&outcome("shillong", day, None, Some(46))));
        assert_eq!(relabeled.source, OutcomeSource::Automatic);
        assert_eq!(relabeled.late_round, Some(46));
    }

    #[test]
    fn out_of_range_outcome_is_validation_error() {
        let store = fixture_store();
        let Err(err) = store.record_outcome(&outcome("shillong", date("2026-02-07"), Some(100), None))
        else {
            panic!("expected validation error");
        };
        assert!(matches!(forecast_error(&err), Some(ForecastError::Validation(_))));
        assert_eq!(count_rows(&store, "outcomes"), 0);
    }

    #[test]
    fn outcome_history_excludes_target_date_and_orders_newest_first() {
        let store = fixture_store();
        let target = date("2026-02-11");
        seed_history(&store, "shillong", target, 35);
        let _ = must(store.record_outcome(&outcome("shillong", target, Some(1), Some(2))));
        seed_history(&store, "juwai", target, 10);

        let history = must(store.outcome_history(&game("shillong"), 30, target));
        assert_eq!(history.len(), 30);
        assert_eq!(history[0].date, date("2026-02-10"));
        assert_eq!(history[29].date, date("2026-01-12"));
        assert!(history.iter().all(|row| row.game == game("shillong")));
    }

    #[test]
    fn generate_for_game_with_sixty_days_of_history() {
        let store = fixture_store();
        let target = date("2026-02-11");
        seed_history(&store, "shillong", target, 60);

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let Some(prediction) = must(store.generate_for_game(&game("shillong"), target, &mut rng))
        else {
            panic!("expected a prediction");
        };

        for candidates in [&prediction.early_candidates, &prediction.late_candidates] {
            assert_eq!(candidates.len(), 10);
            let mut sorted = candidates.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), 10);
            assert!(candidates.iter().all(|value| *value <= 99));
        }
        assert!((60..=95).contains(&prediction.confidence));
        assert!(prediction.narrative.contains("past 30 days"));

        let stored = must(store.get_prediction(&game("shillong"), target));
        assert_eq!(stored, Some(prediction));
    }

    #[test]
    fn generation_is_reproducible_for_a_seed() {
        let store = fixture_store();
        let target = date("2026-02-11");
        seed_history(&store, "khanapara", target, 30);

        let first = must(store.generate_for_game(
            &game("khanapara"),
            target,
            &mut ChaCha8Rng::seed_from_u64(9),
        ));
        let second = must(store.generate_for_game(
            &game("khanapara"),
            target,
            &mut ChaCha8Rng::seed_from_u64(9),
        ));
        let (Some(first), Some(second)) = (first, second) else {
            panic!("expected predictions");
        };
        assert_eq!(first.early_candidates, second.early_candidates);
        assert_eq!(first.late_candidates, second.late_candidates);
        assert_eq!(count_rows(&store, "predictions"), 1);
    }

    #[test]
    fn insufficient_history_writes_nothing() {
        let store = fixture_store();
        let target = date("2026-02-11");
        seed_history(&store, "juwai", target, 6);

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let result = must(store.generate_for_game(&game("juwai"), target, &mut rng));
        assert!(result.is_none());
        assert_eq!(count_rows(&store, "predictions"), 0);
    }

    #[test]
    fn batch_generation_reports_skipped_games() {
        let store = fixture_store();
        let target = date("2026-02-11");
        seed_history(&store, "shillong", target, 30);
        seed_history(&store, "khanapara", target, 12);
        seed_history(&store, "juwai", target, 3);
        must(store.set_game_active(&game("khanapara"), false).map(|_| ()));

        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let report = must(store.generate_for_all_active_games(target, &mut rng));

        let generated: Vec<&str> = report
            .predictions
            .iter()
            .map(|record| record.game.as_str())
            .collect();
        assert_eq!(generated, vec!["shillong"]);
        assert_eq!(report.skipped.len(), 4);
        assert_eq!(report.skipped[0].game, game("juwai"));
        assert_eq!(report.skipped[0].early_rows, 3);
        assert_eq!(report.date, "2026-02-11");

        let today = must(store.predictions_for_date(target));
        assert_eq!(today.len(), 1);
        assert!(today.contains_key(&game("shillong")));
    }

    #[test]
    fn identical_prediction_upserts_store_one_row() {
        let store = fixture_store();
        let input = prediction_input("shillong", "2026-02-11");
        let _ = must(store.upsert_prediction(&input));
        let second = must(store.upsert_prediction(&input));

        assert_eq!(count_rows(&store, "predictions"), 1);
        assert_eq!(second.game, input.game);
        assert_eq!(second.date, input.date);
        assert_eq!(second.early_candidates, input.early_candidates);
        assert_eq!(second.late_candidates, input.late_candidates);
        assert_eq!(second.narrative, input.narrative);
        assert_eq!(second.confidence, input.confidence);
    }

    #[test]
    fn upsert_prediction_validates_and_replaces() {
        let store = fixture_store();
        let input = prediction_input("shillong", "2026-02-11");
        let first = must(store.upsert_prediction(&input));
        assert_eq!(first.early_candidates, input.early_candidates);

        let mut replacement = input.clone();
        replacement.early_candidates = (50..60).collect();
        replacement.confidence = 90;
        let replaced = must(store.override_prediction(&replacement));
        assert_eq!(replaced.early_candidates, (50..60).collect::<Vec<u8>>());
        assert_eq!(replaced.confidence, 90);
        assert_eq!(count_rows(&store, "predictions"), 1);

        let mut invalid = input;
        invalid.late_candidates = vec![1, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let Err(err) = store.upsert_prediction(&invalid) else {
            panic!("expected validation error");
        };
        assert!(matches!(forecast_error(&err), Some(ForecastError::Validation(_))));
    }

    #[test]
    fn prediction_history_is_windowed_and_newest_first() {
        let store = fixture_store();
        for day in ["2026-01-01", "2026-02-01", "2026-02-05", "2026-02-12"] {
            let _ = must(store.upsert_prediction(&prediction_input("juwai", day)));
        }
        let history = must(store.prediction_history(&game("juwai"), 30, date("2026-02-11")));
        let dates: Vec<Date> = history.iter().map(|record| record.date).collect();
        assert_eq!(dates, vec![date("2026-02-05"), date("2026-02-01")]);
    }

    #[test]
    fn verify_marks_hits_against_candidate_sets() {
        let mut store = fixture_store();
        let prediction = must(store.upsert_prediction(&prediction_input("shillong", "2026-02-11")));

        let Some(record) = must(store.verify(&prediction.game, prediction.date, Some(5), Some(42)))
        else {
            panic!("expected verification");
        };
        assert!(record.early_hit);
        assert!(!record.late_hit);
        assert_eq!(record.actual_early, 5);
        assert_eq!(record.actual_late, 42);
        assert_eq!(record.early_candidates, prediction.early_candidates);
        assert_eq!(record.confidence, 75);

        let again = must(store.verify(&prediction.game, prediction.date, Some(5), Some(42)));
        assert_eq!(again.map(|value| value.early_hit), Some(true));
        assert_eq!(count_rows(&store, "verifications"), 1);
    }

    #[test]
    fn verify_is_noop_for_partial_results_or_missing_prediction() {
        let mut store = fixture_store();
        let _ = must(store.upsert_prediction(&prediction_input("shillong", "2026-02-11")));

        let partial = must(store.verify(&game("shillong"), date("2026-02-11"), Some(5), None));
        assert!(partial.is_none());

        let missing = must(store.verify(&game("juwai"), date("2026-02-11"), Some(5), Some(6)));
        assert!(missing.is_none());
        assert_eq!(count_rows(&store, "verifications"), 0);

        let Err(err) = store.verify(&game("shillong"), date("2026-02-11"), Some(120), Some(6))
        else {
            panic!("expected validation error");
        };
        assert!(matches!(forecast_error(&err), Some(ForecastError::Validation(_))));
    }

    #[test]
    fn record_outcome_and_verify_completes_on_second_round() {
        let mut store = fixture_store();
        let day = date("2026-02-11");
        let _ = must(store.upsert_prediction(&prediction_input("shillong", "2026-02-11")));

        let (first, verification) =
            must(store.record_outcome_and_verify(&outcome("shillong", day, Some(3), None)));
        assert_eq!(first.early_round, Some(3));
        assert!(verification.is_none());

        let (_, verification) =
            must(store.record_outcome_and_verify(&outcome("shillong", day, None, Some(15))));
        let Some(verification) = verification else {
            panic!("expected verification once both rounds are known");
        };
        assert!(verification.early_hit);
        assert!(verification.late_hit);
        assert!(verification.both_hit());
    }

    #[test]
    fn verify_all_pending_is_idempotent_and_refreshes_stale_rows() {
        let mut store = fixture_store();
        let as_of = date("2026-02-11");
        for day in ["2026-02-09", "2026-02-10"] {
            let _ = must(store.upsert_prediction(&prediction_input("shillong", day)));
        }
        let _ = must(store.record_outcome(&outcome("shillong", date("2026-02-09"), Some(1), Some(99))));
        let _ = must(store.record_outcome(&outcome("shillong", date("2026-02-10"), Some(50), Some(12))));
        let _ = must(store.record_outcome(&outcome("juwai", date("2026-02-10"), Some(7), Some(8))));
        let _ = must(store.record_outcome(&outcome("khanapara", date("2026-02-10"), Some(7), None)));

        let report = must(store.verify_all_pending(as_of));
        assert_eq!(report.scanned, 3);
        assert_eq!(report.verified, 2);
        assert_eq!(report.skipped_no_prediction, 1);
        assert_eq!(report.unchanged, 0);

        let rerun = must(store.verify_all_pending(as_of));
        assert_eq!(rerun.verified, 0);
        assert_eq!(rerun.unchanged, 2);
        assert_eq!(count_rows(&store, "verifications"), 2);

        let _ = must(store.record_outcome(&outcome("shillong", date("2026-02-10"), Some(5), None)));
        let refreshed = must(store.verify_all_pending(as_of));
        assert_eq!(refreshed.verified, 1);
        let Some(row) = must(store.get_verification(&game("shillong"), date("2026-02-10"))) else {
            panic!("expected refreshed verification");
        };
        assert_eq!(row.actual_early, 5);
        assert!(row.early_hit);
        assert!(row.late_hit);
    }

    #[test]
    fn accuracy_without_verifications_has_no_rates() {
        let store = fixture_store();
        let stats = must(store.accuracy_for_game(&game("shillong"), 30, date("2026-02-11")));
        assert!(!stats.has_data());
        assert_eq!(stats.total_verified, 0);
        assert_eq!(stats.early_hit_rate, None);
        assert!(must(store.accuracy_trend(&game("shillong"), 30, date("2026-02-11"))).is_empty());
    }

    #[test]
    fn accuracy_queries_cover_window_ranking_and_recent_lists() {
        let mut store = fixture_store();
        let as_of = date("2026-02-11");
        for offset in 0..6_u32 {
            let day = day_offset(as_of, offset);
            for game_key in ["shillong", "juwai"] {
                let mut input = prediction_input(game_key, "2026-02-11");
                input.date = day;
                let _ = must(store.upsert_prediction(&input));
            }
            // shillong hits the early round every day, juwai only on even offsets.
            let _ = must(store.verify(&game("shillong"), day, Some(2), Some(90)));
            let juwai_early = if offset % 2 == 0 { 2 } else { 90 };
            let _ = must(store.verify(&game("juwai"), day, Some(juwai_early), Some(90)));
        }
        let _ = must(store.upsert_prediction(&prediction_input("khanapara", "2026-02-11")));
        let _ = must(store.verify(&game("khanapara"), as_of, Some(1), Some(11)));

        let shillong = must(store.accuracy_for_game(&game("shillong"), 30, as_of));
        assert_eq!(shillong.total_verified, 6);
        assert_eq!(shillong.early_hit_rate, Some(100.0));
        assert_eq!(shillong.late_hit_rate, Some(0.0));

        let narrow = must(store.accuracy_for_game(&game("juwai"), 2, as_of));
        assert_eq!(narrow.total_verified, 3);
        assert_eq!(narrow.early_hits, 2);
        assert_eq!(narrow.early_hit_rate, Some(66.7));

        let overall = must(store.overall_accuracy(30, as_of));
        assert_eq!(overall.total_verified, 13);
        assert_eq!(overall.both_hits, 1);

        let best = must(store.best_games(30, as_of));
        let order: Vec<&str> = best.iter().map(|entry| entry.game.as_str()).collect();
        assert_eq!(order, vec!["shillong", "juwai"]);

        let trend = must(store.accuracy_trend(&game("juwai"), 30, as_of));
        assert_eq!(trend.len(), 6);
        assert_eq!(trend[0].date, as_of);
        assert!(trend[0].early_hit);
        assert!(!trend[1].early_hit);

        let recent = must(store.recent_verifications(None, 3));
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|row| row.date == as_of));
        let recent_juwai = must(store.recent_verifications(Some(&game("juwai")), 10));
        assert_eq!(recent_juwai.len(), 6);
    }

    #[test]
    fn cleanup_applies_retention_windows() {
        let store = fixture_store();
        let as_of = date("2026-06-01");
        let _ = must(store.record_outcome(&outcome("shillong", day_offset(as_of, 91), Some(1), Some(2))));
        let _ = must(store.record_outcome(&outcome("shillong", day_offset(as_of, 90), Some(1), Some(2))));
        for offset in [31_u32, 30] {
            let mut input = prediction_input("shillong", "2026-06-01");
            input.date = day_offset(as_of, offset);
            let _ = must(store.upsert_prediction(&input));
        }

        let report = must(store.cleanup(as_of));
        assert_eq!(report.outcomes_deleted, 1);
        assert_eq!(report.predictions_deleted, 1);
        assert_eq!(count_rows(&store, "outcomes"), 1);
        assert_eq!(count_rows(&store, "predictions"), 1);
    }

    #[test]
    fn end_to_end_prediction_then_verification() {
        let mut store = fixture_store();
        let target = date("2026-02-11");
        let fr: [u8; 10] = [23, 23, 23, 45, 67, 12, 89, 23, 45, 12];
        let sr: [u8; 10] = [7, 7, 34, 56, 7, 78, 90, 11, 22, 33];
        for (index, (early, late)) in fr.iter().zip(sr.iter()).enumerate() {
            let offset = u32::try_from(10 - index).unwrap_or(u32::MAX);
            let _ = must(store.record_outcome(&outcome(
                "shillong",
                day_offset(target, offset),
                Some(*early),
                Some(*late),
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(2026);
        let Some(prediction) = must(store.generate_for_game(&game("shillong"), target, &mut rng))
        else {
            panic!("expected prediction from ten days of history");
        };
        assert!(prediction.early_candidates.contains(&23));
        assert!(prediction.late_candidates.contains(&7));

        let _ = must(store.record_outcome(&outcome("shillong", target, Some(23), Some(50))));
        let report = must(store.verify_all_pending(target));
        assert_eq!(report.verified, 1);

        let Some(verification) = must(store.get_verification(&game("shillong"), target)) else {
            panic!("expected verification");
        };
        assert!(verification.early_hit);
        assert_eq!(
            verification.late_hit,
            prediction.late_candidates.contains(&50)
        );

        let stats = must(store.accuracy_for_game(&game("shillong"), 30, target));
        assert_eq!(stats.total_verified, 1);
        assert_eq!(stats.early_hit_rate, Some(100.0));
    }

    #[test]
    fn custom_policy_changes_candidate_count() {
        let mut policy = ForecastPolicy::v1();
        policy.candidate_count = 8;
        policy.digit_layer_target = 6;
        let store = must(
            SqliteForecastStore::open(Path::new(":memory:"))
                .and_then(|store| store.with_policy(policy)),
        );
        must(store.migrate());
        let target = date("2026-02-11");
        seed_history(&store, "shillong", target, 20);

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let Some(prediction) = must(store.generate_for_game(&game("shillong"), target, &mut rng))
        else {
            panic!("expected prediction");
        };
        assert_eq!(prediction.early_candidates.len(), 8);

        let mut broken = ForecastPolicy::v1();
        broken.confidence_min = 99;
        let Err(err) = SqliteForecastStore::open(Path::new(":memory:"))
            .and_then(|store| store.with_policy(broken))
        else {
            panic!("expected configuration error");
        };
        assert!(matches!(forecast_error(&err), Some(ForecastError::Configuration(_))));
    }

    #[test]
    fn concurrent_outcome_writers_converge_on_one_row() {
        let db_path = temp_db_path("race");
        let setup = must(SqliteForecastStore::open(&db_path));
        must(setup.migrate());
        drop(setup);

        let handles: Vec<_> = [(Some(23_u8), None), (None, Some(45_u8))]
            .into_iter()
            .map(|(early, late)| {
                let path = db_path.clone();
                std::thread::spawn(move || {
                    let store = SqliteForecastStore::open(&path)?;
                    store.record_outcome(&OutcomeInput {
                        game: GameId::parse("shillong")?,
                        date: parse_date("2026-02-07")?,
                        early_round: early,
                        late_round: late,
                        source: OutcomeSource::Automatic,
                    })
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(result) => {
                    let _ = must(result);
                }
                Err(err) => panic!("writer thread panicked: {err:?}"),
            }
        }

        let store = must(SqliteForecastStore::open(&db_path));
        let Some(merged) = must(store.get_outcome(&game("shillong"), date("2026-02-07"))) else {
            panic!("expected merged outcome");
        };
        assert_eq!(merged.early_round, Some(23));
        assert_eq!(merged.late_round, Some(45));
        assert_eq!(count_rows(&store, "outcomes"), 1);

        drop(store);
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn busy_timeout_bounds_lock_waits() {
        let db_path = temp_db_path("lock");
        let setup = must(SqliteForecastStore::open(&db_path));
        must(setup.migrate());
        drop(setup);

        let lock_conn = match Connection::open(&db_path) {
            Ok(value) => value,
            Err(err) => panic!("failed to open lock connection: {err}"),
        };
        if let Err(err) = lock_conn.execute_batch("BEGIN IMMEDIATE;") {
            panic!("failed to acquire write lock: {err}");
        }

        let impatient = must(SqliteForecastStore::open_with_timeout(
            &db_path,
            StdDuration::from_millis(50),
        ));
        let blocked = impatient.record_outcome(&outcome("shillong", date("2026-02-07"), Some(1), None));
        assert!(blocked.is_err(), "write should fail while the lock is held");

        let write_path = db_path.clone();
        let patient = std::thread::spawn(move || {
            let store = SqliteForecastStore::open(&write_path)?;
            store.record_outcome(&OutcomeInput {
                game: GameId::parse("shillong")?,
                date: parse_date("2026-02-07")?,
                early_round: Some(1),
                late_round: None,
                source: OutcomeSource::Manual,
            })
        });

        std::thread::sleep(StdDuration::from_millis(150));
        if let Err(err) = lock_conn.execute_batch("COMMIT;") {
            panic!("failed to release write lock: {err}");
        }

        let result = match patient.join() {
            Ok(result) => result,
            Err(err) => panic!("writer thread panicked: {err:?}"),
        };
        assert!(result.is_ok(), "write should succeed after lock release: {:?}", result.err());

        drop(impatient);
        let _ = std::fs::remove_file(&db_path);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn merged_outcome_keeps_latest_present_values(
            updates in prop::collection::vec(
                (prop::option::of(0_u8..100), prop::option::of(0_u8..100)),
                1..8,
            ),
        ) {
            let store = fixture_store();
            let day = date("2026-02-07");
            let mut expected_early = None;
            let mut expected_late = None;
            for (early, late) in &updates {
                let _ = must(store.record_outcome(&outcome("juwai", day, *early, *late)));
                expected_early = early.or(expected_early);
                expected_late = late.or(expected_late);
            }

            let stored = must(store.get_outcome(&game("juwai"), day));
            prop_assert!(stored.is_some());
            let stored = stored.unwrap_or_else(|| unreachable!());
            prop_assert_eq!(stored.early_round, expected_early);
            prop_assert_eq!(stored.late_round, expected_late);
        }
    }
}
