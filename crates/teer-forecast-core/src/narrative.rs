use crate::{GameId, OutcomeRecord, PatternSummary, Round};

const HIGHLIGHT_COUNT: usize = 3;
const RECENT_COUNT: usize = 5;

/// Renders the human-readable analysis stored alongside a prediction.
///
/// `recent` is expected most recent first, as returned by a history query.
#[must_use]
pub fn compose_narrative(game: &GameId, summary: &PatternSummary, recent: &[OutcomeRecord]) -> String {
    let mut text = format!(
        "Based on analysis of the past {} days of {} Teer results.\n\n",
        summary.days,
        display_name(game)
    );

    text.push_str(&round_line("Hot early round numbers", &summary.early.hot_numbers));
    text.push_str(&round_line("Hot late round numbers", &summary.late.hot_numbers));
    text.push_str(&round_line("Hot early round last digits", &summary.early.hot_last_digits));
    text.push_str(&round_line("Hot late round last digits", &summary.late.hot_last_digits));

    for round in Round::ALL {
        let values: Vec<String> = recent
            .iter()
            .filter_map(|outcome| round.value_of(outcome))
            .take(RECENT_COUNT)
            .map(|value| format!("{value:02}"))
            .collect();
        if !values.is_empty() {
            text.push_str(&format!(
                "Recent {} round results: {}\n",
                round.as_str(),
                values.join(", ")
            ));
        }
    }

    text.push_str(
        "\nStrategy: candidates blend the most frequent numbers, numbers sharing hot last digits, \
         rarely drawn numbers due for a return, and a few random picks for coverage.\n\n",
    );
    text.push_str(
        "Disclaimer: Teer is a game of chance. These predictions are based on historical \
         frequencies and carry no guarantee. Play responsibly.",
    );
    text
}

fn round_line(label: &str, values: &[u8]) -> String {
    if values.is_empty() {
        return format!("{label}: none\n");
    }
    let rendered: Vec<String> = values
        .iter()
        .take(HIGHLIGHT_COUNT)
        .map(|value| format!("{value:02}"))
        .collect();
    format!("{label}: {}\n", rendered.join(", "))
}

fn display_name(game: &GameId) -> String {
    game.as_str()
        .split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
