//! Info-kind inference and summary-sufficiency gating (spec.md §4.11).
//!
//! Classifies the user's instruction into a coarse category so
//! [`super::agent_loop::AgentLoop`] can reject a `Done` whose summary
//! doesn't look like an answer yet (e.g. "search results are displayed"
//! is a milestone, not an answer to "what's the weather").

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    Weather,
    Flights,
    Price,
    Time,
    None,
}

/// Classifies a lowercased instruction by substring presence. Order
/// matters only in that each category is checked independently; an
/// instruction matching none falls back to `None` (always-sufficient).
pub fn infer(instruction: &str) -> InfoKind {
    let lower = instruction.to_lowercase();
    if ["weather", "temperature", "forecast"].iter().any(|p| lower.contains(p)) {
        InfoKind::Weather
    } else if ["flight", "flights"].iter().any(|p| lower.contains(p)) {
        InfoKind::Flights
    } else if ["price", "cost", "how much"].iter().any(|p| lower.contains(p)) {
        InfoKind::Price
    } else if ["time", "clock", "o'clock"].iter().any(|p| lower.contains(p)) {
        InfoKind::Time
    } else {
        InfoKind::None
    }
}

fn temperature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d{1,2}\s*°\s*[cCfF]").unwrap())
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([01]?\d|2[0-3]):[0-5]\d\b").unwrap())
}

fn money_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b\d[\d\s.,]{1,8}\s*(pln|zl|usd|eur|gbp)\b|[€$£]\s*\d[\d\s.,]{1,8}")
            .unwrap()
    })
}

const CURRENCY_TOKENS: &[&str] = &["usd", "eur", "pln", "gbp", "€", "$", "£"];

/// "Search results displayed" (or close variants) never counts as a
/// sufficient answer, regardless of `kind` — it's a milestone.
fn is_milestone_only(summary: &str) -> bool {
    let lower = summary.to_lowercase();
    lower.contains("search results") || lower.contains("results are displayed")
}

/// Whether `summary` satisfies `kind`'s sufficiency pattern (spec.md
/// §4.11 "Summary sufficiency").
pub fn is_sufficient(kind: InfoKind, summary: &str) -> bool {
    if is_milestone_only(summary) {
        return false;
    }
    match kind {
        InfoKind::Weather => temperature_re().is_match(summary),
        InfoKind::Flights => money_re().is_match(summary) || time_re().is_match(summary),
        InfoKind::Price => {
            money_re().is_match(summary)
                || CURRENCY_TOKENS.iter().any(|t| summary.to_lowercase().contains(t))
        }
        InfoKind::Time => time_re().is_match(summary),
        InfoKind::None => !summary.trim().is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_weather_instruction() {
        assert_eq!(infer("what is the weather in Warsaw"), InfoKind::Weather);
        assert_eq!(infer("give me the temperature outside"), InfoKind::Weather);
    }

    #[test]
    fn classifies_flights_price_time() {
        assert_eq!(infer("find flights to berlin"), InfoKind::Flights);
        assert_eq!(infer("what's the price of eggs"), InfoKind::Price);
        assert_eq!(infer("what time is it"), InfoKind::Time);
    }

    #[test]
    fn unclassified_instruction_is_none() {
        assert_eq!(infer("open the calculator"), InfoKind::None);
    }

    #[test]
    fn weather_sufficiency_requires_temperature_pattern() {
        assert!(is_sufficient(InfoKind::Weather, "Warsaw: 2°C, cloudy"));
        assert!(is_sufficient(InfoKind::Weather, "-5°F and windy"));
        assert!(!is_sufficient(InfoKind::Weather, "it's sunny today"));
    }

    #[test]
    fn search_results_always_insufficient_regardless_of_kind() {
        assert!(!is_sufficient(InfoKind::Weather, "Search results displayed: 20°C"));
        assert!(!is_sufficient(InfoKind::None, "The results are displayed on screen"));
    }

    #[test]
    fn price_matches_money_or_currency_token() {
        assert!(is_sufficient(InfoKind::Price, "It costs $19.99"));
        assert!(is_sufficient(InfoKind::Price, "45 usd total"));
        assert!(is_sufficient(InfoKind::Price, "costs about 10 eur"));
        assert!(!is_sufficient(InfoKind::Price, "it is expensive"));
    }

    #[test]
    fn flights_matches_money_or_time() {
        assert!(is_sufficient(InfoKind::Flights, "Departs at 14:30"));
        assert!(is_sufficient(InfoKind::Flights, "Cheapest fare: 230 EUR"));
        assert!(!is_sufficient(InfoKind::Flights, "several options available"));
    }

    #[test]
    fn time_requires_hhmm_pattern() {
        assert!(is_sufficient(InfoKind::Time, "It is currently 09:41"));
        assert!(!is_sufficient(InfoKind::Time, "it is morning"));
    }

    #[test]
    fn none_kind_accepts_any_nonempty_summary() {
        assert!(is_sufficient(InfoKind::None, "Calculator is open"));
        assert!(!is_sufficient(InfoKind::None, "   "));
    }
}
