use crate::{ForecastPolicy, PatternSummary};

/// Scores a prediction from sample size and early-round pattern strength.
///
/// Starts at `confidence_base`, adds a bonus when the window holds enough days
/// and another when the most frequent early-round value dominates the sample,
/// then clamps into `[confidence_min, confidence_max]`.
#[must_use]
pub fn score_confidence(summary: &PatternSummary, policy: &ForecastPolicy) -> u8 {
    let mut score = u32::from(policy.confidence_base);

    if summary.days >= policy.sample_days_strong {
        score += u32::from(policy.sample_bonus_strong);
    } else if summary.days >= policy.sample_days_moderate {
        score += u32::from(policy.sample_bonus_moderate);
    }

    if let Some(top) = summary.early.top_frequency() {
        let sample = u64::try_from(summary.early.sample_size).unwrap_or(u64::MAX);
        let scaled_top = u64::from(top) * 100;
        if scaled_top > u64::from(policy.top_share_strong_percent) * sample {
            score += u32::from(policy.top_share_bonus_strong);
        } else if scaled_top > u64::from(policy.top_share_moderate_percent) * sample {
            score += u32::from(policy.top_share_bonus_moderate);
        }
    }

    let clamped = score.clamp(
        u32::from(policy.confidence_min),
        u32::from(policy.confidence_max),
    );
    u8::try_from(clamped).unwrap_or(policy.confidence_max)
}
