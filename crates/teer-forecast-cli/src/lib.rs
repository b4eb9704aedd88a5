//! Command surface for the Teer forecast store.
//!
//! - [`run_cli`] executes a fully parsed [`Cli`].
//! - [`run_forecast_with_db`] executes a [`Command`] against a DB path with
//!   the default policy.
//! - [`run_forecast`] executes a [`Command`] against an open store.
//!
//! Every command prints JSON to stdout unless `--format table` is offered and
//! chosen. Logs go to stderr.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::Value;
use teer_forecast_core::{
    apply_formula, common_numbers, day_profiles, digit_breakdown, format_date, parse_date,
    today_utc, FormulaKind, ForecastPolicy, GameAccuracy, GameId, OutcomeInput, OutcomeRecord,
    OutcomeSource, PredictionInput, PredictionRecord, VerificationRecord,
};
use teer_forecast_store_sqlite::SqliteForecastStore;
use time::Date;

#[derive(Debug, Parser)]
#[command(name = "teer")]
#[command(about = "Teer result prediction and accuracy tracking")]
pub struct Cli {
    #[arg(long, default_value = "./teer_forecast.sqlite3")]
    db: PathBuf,

    /// JSON file overriding the built-in forecast policy.
    #[arg(long)]
    policy: Option<PathBuf>,

    #[arg(long, default_value_t = 5000)]
    busy_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Outcome {
        #[command(subcommand)]
        command: Box<OutcomeCommand>,
    },
    Predict {
        #[command(subcommand)]
        command: Box<PredictCommand>,
    },
    Verify {
        #[command(subcommand)]
        command: Box<VerifyCommand>,
    },
    Accuracy {
        #[command(subcommand)]
        command: Box<AccuracyCommand>,
    },
    Games {
        #[command(subcommand)]
        command: Box<GamesCommand>,
    },
    Analysis {
        #[command(subcommand)]
        command: Box<AnalysisCommand>,
    },
    Maintenance {
        #[command(subcommand)]
        command: Box<MaintenanceCommand>,
    },
}

#[derive(Debug, Subcommand)]
pub enum OutcomeCommand {
    Record(RecordOutcomeArgs),
    Show(GameDateArgs),
    History(OutcomeHistoryArgs),
}

#[derive(Debug, Subcommand)]
pub enum PredictCommand {
    Generate(GenerateArgs),
    Override(OverrideArgs),
    Show(GameDateArgs),
    Today(FormatArgs),
    History(WindowArgs),
}

#[derive(Debug, Subcommand)]
pub enum VerifyCommand {
    One(GameDateArgs),
    Pending(AsOfArgs),
}

#[derive(Debug, Subcommand)]
pub enum AccuracyCommand {
    Game(WindowArgs),
    Overall(OverallArgs),
    Trend(WindowArgs),
    Best(BestArgs),
    Recent(RecentArgs),
}

#[derive(Debug, Subcommand)]
pub enum GamesCommand {
    List(ListGamesArgs),
    Add(AddGameArgs),
    Activate(GameArgs),
    Deactivate(GameArgs),
}

#[derive(Debug, Subcommand)]
pub enum AnalysisCommand {
    Common(WindowArgs),
    Daywise(WindowArgs),
    Formula(FormulaArgs),
    Digits(DigitsArgs),
}

#[derive(Debug, Subcommand)]
pub enum MaintenanceCommand {
    Cleanup(AsOfArgs),
}

#[derive(Debug, Args)]
pub struct RecordOutcomeArgs {
    #[arg(long)]
    game: String,
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    early: Option<u8>,
    #[arg(long)]
    late: Option<u8>,
    #[arg(long, value_enum, default_value_t = SourceArg::Manual)]
    source: SourceArg,
    /// Skip the immediate verification attempt.
    #[arg(long)]
    no_verify: bool,
}

#[derive(Debug, Args)]
pub struct GameDateArgs {
    #[arg(long)]
    game: String,
    #[arg(long)]
    date: Option<String>,
}

#[derive(Debug, Args)]
pub struct OutcomeHistoryArgs {
    #[arg(long)]
    game: String,
    #[arg(long, default_value_t = 30)]
    days: u32,
    /// Last date included in the listing.
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("target").required(true).args(["game", "all"])))]
pub struct GenerateArgs {
    #[arg(long)]
    game: Option<String>,
    #[arg(long)]
    all: bool,
    #[arg(long)]
    date: Option<String>,
    /// Seed for reproducible candidate sets.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
pub struct OverrideArgs {
    #[arg(long)]
    game: String,
    #[arg(long)]
    date: Option<String>,
    #[arg(long, value_delimiter = ',', required = true)]
    early: Vec<u8>,
    #[arg(long, value_delimiter = ',', required = true)]
    late: Vec<u8>,
    #[arg(long)]
    confidence: u8,
    #[arg(long, default_value = "Manual override by operator.")]
    narrative: String,
}

#[derive(Debug, Args)]
pub struct FormatArgs {
    #[arg(long)]
    date: Option<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct WindowArgs {
    #[arg(long)]
    game: String,
    #[arg(long, default_value_t = 30)]
    days: u32,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
pub struct FormulaArgs {
    #[arg(long)]
    game: String,
    #[arg(long, value_enum)]
    kind: FormulaArg,
    #[arg(long, default_value_t = 30)]
    days: u32,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("rounds").required(true).multiple(true).args(["early", "late"])))]
pub struct DigitsArgs {
    #[arg(long)]
    early: Option<u8>,
    #[arg(long)]
    late: Option<u8>,
}

#[derive(Debug, Args)]
pub struct OverallArgs {
    #[arg(long, default_value_t = 30)]
    days: u32,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
pub struct BestArgs {
    #[arg(long, default_value_t = 30)]
    days: u32,
    #[arg(long)]
    as_of: Option<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct RecentArgs {
    #[arg(long)]
    game: Option<String>,
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Args)]
pub struct AsOfArgs {
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListGamesArgs {
    /// Include deactivated games.
    #[arg(long)]
    all: bool,
}

#[derive(Debug, Args)]
pub struct AddGameArgs {
    #[arg(long)]
    game: String,
    #[arg(long)]
    name: String,
    #[arg(long, default_value_t = 0)]
    order: i64,
    #[arg(long)]
    inactive: bool,
}

#[derive(Debug, Args)]
pub struct GameArgs {
    #[arg(long)]
    game: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SourceArg {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormulaArg {
    House,
    Ending,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Serialize)]
struct RecordedOutcome {
    outcome: OutcomeRecord,
    verification: Option<VerificationRecord>,
}

#[derive(Debug, Serialize)]
struct GeneratedPrediction {
    game: GameId,
    date: String,
    seed: u64,
    prediction: Option<PredictionRecord>,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when the policy file is invalid, the store cannot be
/// opened or migrated, or command execution fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let policy = match &cli.policy {
        Some(path) => load_policy(path)?,
        None => ForecastPolicy::v1(),
    };
    let mut store = SqliteForecastStore::open_with_timeout(
        &cli.db,
        Duration::from_millis(cli.busy_timeout_ms),
    )?
    .with_policy(policy)?;
    store.migrate()?;
    run_forecast(cli.command, &mut store)
}

/// Executes a parsed command using the provided `SQLite` DB path.
///
/// # Errors
/// Returns an error when store open/migrate fails or the requested command fails.
pub fn run_forecast_with_db(db_path: &Path, command: Command) -> Result<()> {
    let mut store = SqliteForecastStore::open(db_path)?;
    store.migrate()?;
    run_forecast(command, &mut store)
}

/// Executes a parsed command against an existing store handle.
///
/// # Errors
/// Returns an error when argument validation, persistence or retrieval fails.
pub fn run_forecast(command: Command, store: &mut SqliteForecastStore) -> Result<()> {
    match command {
        Command::Outcome { command } => run_outcome(*command, store),
        Command::Predict { command } => run_predict(*command, store),
        Command::Verify { command } => run_verify(*command, store),
        Command::Accuracy { command } => run_accuracy(*command, store),
        Command::Games { command } => run_games(*command, store),
        Command::Analysis { command } => run_analysis(*command, store),
        Command::Maintenance { command } => match *command {
            MaintenanceCommand::Cleanup(args) => {
                let report = store.cleanup(parse_optional_date(args.as_of.as_deref())?)?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
        },
    }
}

fn run_outcome(command: OutcomeCommand, store: &mut SqliteForecastStore) -> Result<()> {
    match command {
        OutcomeCommand::Record(args) => {
            let input = OutcomeInput {
                game: parse_game(&args.game)?,
                date: parse_optional_date(args.date.as_deref())?,
                early_round: args.early,
                late_round: args.late,
                source: map_source(args.source),
            };
            let recorded = if args.no_verify {
                RecordedOutcome {
                    outcome: store.record_outcome(&input)?,
                    verification: None,
                }
            } else {
                let (outcome, verification) = store.record_outcome_and_verify(&input)?;
                RecordedOutcome {
                    outcome,
                    verification,
                }
            };
            println!("{}", serde_json::to_string_pretty(&recorded)?);
            Ok(())
        }
        OutcomeCommand::Show(args) => {
            let outcome = store.get_outcome(
                &parse_game(&args.game)?,
                parse_optional_date(args.date.as_deref())?,
            )?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        OutcomeCommand::History(args) => {
            let history = history_through(store, &args.game, args.days, args.as_of.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&history)?);
            Ok(())
        }
    }
}

fn run_predict(command: PredictCommand, store: &mut SqliteForecastStore) -> Result<()> {
    match command {
        PredictCommand::Generate(args) => {
            let date = parse_optional_date(args.date.as_deref())?;
            let seed = args.seed.unwrap_or_else(rand::random);
            info!("generating predictions for {} with seed {seed}", format_date(date));
            let mut rng = ChaCha8Rng::seed_from_u64(seed);

            match args.game {
                Some(raw) => {
                    let game = parse_game(&raw)?;
                    let prediction = store.generate_for_game(&game, date, &mut rng)?;
                    let generated = GeneratedPrediction {
                        game,
                        date: format_date(date),
                        seed,
                        prediction,
                    };
                    println!("{}", serde_json::to_string_pretty(&generated)?);
                }
                None => {
                    let report = store.generate_for_all_active_games(date, &mut rng)?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            Ok(())
        }
        PredictCommand::Override(args) => {
            let input = PredictionInput {
                game: parse_game(&args.game)?,
                date: parse_optional_date(args.date.as_deref())?,
                early_candidates: args.early,
                late_candidates: args.late,
                narrative: args.narrative,
                confidence: args.confidence,
            };
            let record = store.override_prediction(&input)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        PredictCommand::Show(args) => {
            let record = store.get_prediction(
                &parse_game(&args.game)?,
                parse_optional_date(args.date.as_deref())?,
            )?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        PredictCommand::Today(args) => {
            let predictions = match args.date.as_deref() {
                Some(raw) => store.predictions_for_date(parse_cli_date(raw)?)?,
                None => store.today_predictions()?,
            };
            match args.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&predictions)?);
                }
                OutputFormat::Table => print_prediction_table(&predictions),
            }
            Ok(())
        }
        PredictCommand::History(args) => {
            let history = store.prediction_history(
                &parse_game(&args.game)?,
                args.days,
                parse_optional_date(args.as_of.as_deref())?,
            )?;
            println!("{}", serde_json::to_string_pretty(&history)?);
            Ok(())
        }
    }
}

fn run_verify(command: VerifyCommand, store: &mut SqliteForecastStore) -> Result<()> {
    match command {
        VerifyCommand::One(args) => {
            let game = parse_game(&args.game)?;
            let date = parse_optional_date(args.date.as_deref())?;
            let verification = match store.get_outcome(&game, date)? {
                Some(outcome) => {
                    store.verify(&game, date, outcome.early_round, outcome.late_round)?
                }
                None => None,
            };
            println!("{}", serde_json::to_string_pretty(&verification)?);
            Ok(())
        }
        VerifyCommand::Pending(args) => {
            let report = store.verify_all_pending(parse_optional_date(args.as_of.as_deref())?)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn run_accuracy(command: AccuracyCommand, store: &SqliteForecastStore) -> Result<()> {
    match command {
        AccuracyCommand::Game(args) => {
            let stats = store.accuracy_for_game(
                &parse_game(&args.game)?,
                args.days,
                parse_optional_date(args.as_of.as_deref())?,
            )?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        AccuracyCommand::Overall(args) => {
            let stats =
                store.overall_accuracy(args.days, parse_optional_date(args.as_of.as_deref())?)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        AccuracyCommand::Trend(args) => {
            let trend = store.accuracy_trend(
                &parse_game(&args.game)?,
                args.days,
                parse_optional_date(args.as_of.as_deref())?,
            )?;
            println!("{}", serde_json::to_string_pretty(&trend)?);
            Ok(())
        }
        AccuracyCommand::Best(args) => {
            let ranked =
                store.best_games(args.days, parse_optional_date(args.as_of.as_deref())?)?;
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ranked)?),
                OutputFormat::Table => print_best_games_table(&ranked),
            }
            Ok(())
        }
        AccuracyCommand::Recent(args) => {
            let game = args.game.as_deref().map(parse_game).transpose()?;
            let recent = store.recent_verifications(game.as_ref(), args.limit)?;
            println!("{}", serde_json::to_string_pretty(&recent)?);
            Ok(())
        }
    }
}

fn run_games(command: GamesCommand, store: &SqliteForecastStore) -> Result<()> {
    let entry = match command {
        GamesCommand::List(args) => {
            let games = store.list_games(args.all)?;
            println!("{}", serde_json::to_string_pretty(&games)?);
            return Ok(());
        }
        GamesCommand::Add(args) => {
            store.upsert_game(&parse_game(&args.game)?, &args.name, args.order, !args.inactive)?
        }
        GamesCommand::Activate(args) => store.set_game_active(&parse_game(&args.game)?, true)?,
        GamesCommand::Deactivate(args) => store.set_game_active(&parse_game(&args.game)?, false)?,
    };
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

fn run_analysis(command: AnalysisCommand, store: &SqliteForecastStore) -> Result<()> {
    match command {
        AnalysisCommand::Common(args) => {
            let history = history_through(store, &args.game, args.days, args.as_of.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&common_numbers(&history))?);
        }
        AnalysisCommand::Daywise(args) => {
            let history = history_through(store, &args.game, args.days, args.as_of.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&day_profiles(&history))?);
        }
        AnalysisCommand::Formula(args) => {
            let history = history_through(store, &args.game, args.days, args.as_of.as_deref())?;
            let prediction = apply_formula(map_formula(args.kind), &history)?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
        AnalysisCommand::Digits(args) => {
            let breakdown = digit_breakdown(args.early, args.late)?;
            println!("{}", serde_json::to_string_pretty(&breakdown)?);
        }
    }
    Ok(())
}

/// Results for the `days` days ending on `as_of` inclusive, most recent first.
fn history_through(
    store: &SqliteForecastStore,
    game: &str,
    days: u32,
    as_of: Option<&str>,
) -> Result<Vec<OutcomeRecord>> {
    let as_of = parse_optional_date(as_of)?;
    let before = as_of
        .next_day()
        .ok_or_else(|| anyhow!("date out of range: {}", format_date(as_of)))?;
    store.outcome_history(&parse_game(game)?, days, before)
}

fn load_policy(path: &Path) -> Result<ForecastPolicy> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read policy file {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("policy file must be valid JSON: {}", path.display()))?;
    Ok(ForecastPolicy::from_json(&value)?)
}

fn parse_game(raw: &str) -> Result<GameId> {
    Ok(GameId::parse(raw)?)
}

fn parse_cli_date(raw: &str) -> Result<Date> {
    Ok(parse_date(raw)?)
}

fn parse_optional_date(raw: Option<&str>) -> Result<Date> {
    match raw {
        Some(value) => parse_cli_date(value),
        None => Ok(today_utc()),
    }
}

fn map_source(value: SourceArg) -> OutcomeSource {
    match value {
        SourceArg::Automatic => OutcomeSource::Automatic,
        SourceArg::Manual => OutcomeSource::Manual,
    }
}

fn map_formula(value: FormulaArg) -> FormulaKind {
    match value {
        FormulaArg::House => FormulaKind::House,
        FormulaArg::Ending => FormulaKind::Ending,
        FormulaArg::Sum => FormulaKind::Sum,
    }
}

fn join_numbers(values: &[u8]) -> String {
    values
        .iter()
        .map(|value| format!("{value:02}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn print_prediction_table(predictions: &BTreeMap<GameId, PredictionRecord>) {
    println!(
        "{:<20} {:<10} {:<10} {:<30} late",
        "game", "date", "confidence", "early"
    );
    println!("{}", "-".repeat(100));

    for record in predictions.values() {
        println!(
            "{:<20} {:<10} {:<10} {:<30} {}",
            record.game.as_str(),
            format_date(record.date),
            record.confidence,
            join_numbers(&record.early_candidates),
            join_numbers(&record.late_candidates)
        );
    }
}

fn print_best_games_table(ranked: &[GameAccuracy]) {
    println!(
        "{:<20} {:<8} {:<8} {:<8} either",
        "game", "verified", "early", "late"
    );
    println!("{}", "-".repeat(60));

    for entry in ranked {
        let rate = |value: Option<f64>| value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}%"));
        println!(
            "{:<20} {:<8} {:<8} {:<8} {}",
            entry.game.as_str(),
            entry.stats.total_verified,
            rate(entry.stats.early_hit_rate),
            rate(entry.stats.late_hit_rate),
            rate(entry.stats.either_hit_rate)
        );
    }
}
