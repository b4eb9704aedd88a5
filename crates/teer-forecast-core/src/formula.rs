use serde::{Deserialize, Serialize};

use crate::{validate_number, ForecastError, OutcomeRecord, NUMBER_SPACE};

const FORMULA_PICKS: u8 = 6;
const ENDING_WINDOW: u16 = 3;
const SUM_OFFSETS: [i16; 6] = [0, 5, 10, -5, 15, -10];

/// Arithmetic shortcuts players apply to recent results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FormulaKind {
    /// Digit sum of the latest early round, mod 10, as a shared last digit.
    House,
    /// Rounded mean of the last digits of the three latest early rounds.
    Ending,
    /// Latest early plus late round, mod 100, with a spread around it.
    Sum,
}

impl FormulaKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::House => "house",
            Self::Ending => "ending",
            Self::Sum => "sum",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "house" => Some(Self::House),
            "ending" => Some(Self::Ending),
            "sum" => Some(Self::Sum),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormulaPrediction {
    pub kind: FormulaKind,
    pub numbers: Vec<u8>,
    pub calculation: String,
    pub explanation: String,
}

/// Per-number digit facts for one declared round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NumberDigits {
    pub value: u8,
    pub tens: u8,
    pub ones: u8,
    pub digit_sum: u8,
    pub is_even: bool,
}

impl NumberDigits {
    fn of(value: u8) -> Self {
        Self {
            value,
            tens: value / 10,
            ones: value % 10,
            digit_sum: value / 10 + value % 10,
            is_even: value % 2 == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CombinedDigits {
    pub sum: u16,
    pub difference: u8,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigitBreakdown {
    /// Repeated digit sum of the early round, always a single digit.
    pub house: Option<u8>,
    /// Last digit of the late round.
    pub ending: Option<u8>,
    pub early: Option<NumberDigits>,
    pub late: Option<NumberDigits>,
    pub combined: Option<CombinedDigits>,
}

/// Applies `kind` to results ordered most recent first.
///
/// Rows missing the rounds a formula reads are skipped rather than treated
/// as zero.
///
/// # Errors
/// Returns [`ForecastError::Validation`] when the history lacks the rounds the
/// formula needs.
pub fn apply_formula(
    kind: FormulaKind,
    recent: &[OutcomeRecord],
) -> Result<FormulaPrediction, ForecastError> {
    match kind {
        FormulaKind::House => house_formula(recent),
        FormulaKind::Ending => ending_formula(recent),
        FormulaKind::Sum => sum_formula(recent),
    }
}

fn house_formula(recent: &[OutcomeRecord]) -> Result<FormulaPrediction, ForecastError> {
    let early = recent
        .iter()
        .find_map(|outcome| outcome.early_round)
        .ok_or_else(|| {
            ForecastError::Validation("house formula needs a declared early round".to_string())
        })?;
    validate_number("early round", early)?;

    let digits = NumberDigits::of(early);
    let house = digits.digit_sum % 10;
    Ok(FormulaPrediction {
        kind: FormulaKind::House,
        numbers: same_ending(house),
        calculation: format!(
            "House of {early:02} = {} + {} = {}, house {house}",
            digits.tens, digits.ones, digits.digit_sum
        ),
        explanation: format!("Numbers ending in {house} under the house formula."),
    })
}

fn ending_formula(recent: &[OutcomeRecord]) -> Result<FormulaPrediction, ForecastError> {
    let endings: Vec<u8> = recent
        .iter()
        .filter_map(|outcome| outcome.early_round)
        .take(usize::from(ENDING_WINDOW))
        .map(|value| value % 10)
        .collect();
    if endings.len() < usize::from(ENDING_WINDOW) {
        return Err(ForecastError::Validation(format!(
            "ending formula needs {ENDING_WINDOW} declared early rounds, got {}",
            endings.len()
        )));
    }

    let total: u16 = endings.iter().map(|digit| u16::from(*digit)).sum();
    // Half-up rounding of the mean; a mean of digits stays below 10.
    let ending = u8::try_from((2 * total + ENDING_WINDOW) / (2 * ENDING_WINDOW)).unwrap_or(9);

    let rendered: Vec<String> = endings.iter().map(ToString::to_string).collect();
    Ok(FormulaPrediction {
        kind: FormulaKind::Ending,
        numbers: same_ending(ending),
        calculation: format!(
            "Last {ENDING_WINDOW} endings: {}, average {ending}",
            rendered.join(", ")
        ),
        explanation: format!("Numbers ending in {ending} from the recent ending pattern."),
    })
}

fn sum_formula(recent: &[OutcomeRecord]) -> Result<FormulaPrediction, ForecastError> {
    let (early, late) = recent
        .iter()
        .find_map(|outcome| outcome.early_round.zip(outcome.late_round))
        .ok_or_else(|| {
            ForecastError::Validation("sum formula needs a result with both rounds".to_string())
        })?;
    validate_number("early round", early)?;
    validate_number("late round", late)?;

    let sum = u16::from(early) + u16::from(late);
    let space = i16::from(NUMBER_SPACE);
    let base = i16::try_from(sum).unwrap_or_default() % space;
    let numbers = SUM_OFFSETS
        .iter()
        .filter_map(|offset| u8::try_from((base + offset).rem_euclid(space)).ok())
        .collect();

    Ok(FormulaPrediction {
        kind: FormulaKind::Sum,
        numbers,
        calculation: format!("Early {early:02} + late {late:02} = {sum}, mod 100 = {base:02}"),
        explanation: format!("Numbers around {base:02} from the early plus late sum."),
    })
}

fn same_ending(digit: u8) -> Vec<u8> {
    (0..FORMULA_PICKS).map(|tens| tens * 10 + digit).collect()
}

/// Digit facts for a pair of declared rounds.
///
/// # Errors
/// Returns [`ForecastError::Validation`] when neither round is given or a
/// round is outside `0..=99`.
pub fn digit_breakdown(
    early: Option<u8>,
    late: Option<u8>,
) -> Result<DigitBreakdown, ForecastError> {
    if early.is_none() && late.is_none() {
        return Err(ForecastError::Validation(
            "at least one of early or late round is required".to_string(),
        ));
    }
    if let Some(value) = early {
        validate_number("early round", value)?;
    }
    if let Some(value) = late {
        validate_number("late round", value)?;
    }

    let early_digits = early.map(NumberDigits::of);
    let late_digits = late.map(NumberDigits::of);
    let combined = early.zip(late).map(|(early, late)| CombinedDigits {
        sum: u16::from(early) + u16::from(late),
        difference: early.abs_diff(late),
        average: (f64::from(early) + f64::from(late)) / 2.0,
    });

    Ok(DigitBreakdown {
        house: early_digits.map(|digits| digit_root(digits.digit_sum)),
        ending: late_digits.map(|digits| digits.ones),
        early: early_digits,
        late: late_digits,
        combined,
    })
}

fn digit_root(value: u8) -> u8 {
    if value >= 10 {
        value / 10 + value % 10
    } else {
        value
    }
}
