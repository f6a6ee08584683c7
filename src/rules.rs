//! Declarative scoring rules.
//!
//! Every analyzer expresses its additive heuristics as a static table of
//! [`Rule`]s evaluated against an analyzer-specific context. A fired rule
//! becomes a [`RuleHit`] carrying the signal name, its delta and a
//! human-readable message, so the rule set of each analyzer can be listed and
//! tested on its own.

use serde::{Deserialize, Serialize};

/// One additive check: when `predicate` holds for the context, `delta` is
/// applied to the score and `message` is reported.
pub struct Rule<C: ?Sized> {
    pub signal: &'static str,
    pub delta: i32,
    pub predicate: fn(&C) -> bool,
    pub message: &'static str,
}

/// A rule that fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleHit {
    pub signal: String,
    pub delta: i32,
    pub message: String,
}

impl RuleHit {
    pub fn new(signal: impl Into<String>, delta: i32, message: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            delta,
            message: message.into(),
        }
    }
}

/// Evaluate a rule table in order.
pub fn evaluate<C: ?Sized>(rules: &[Rule<C>], ctx: &C) -> Vec<RuleHit> {
    rules
        .iter()
        .filter(|rule| (rule.predicate)(ctx))
        .map(|rule| RuleHit::new(rule.signal, rule.delta, rule.message))
        .collect()
}

/// Running score for one analyzer.
#[derive(Debug, Clone)]
pub struct ScoreSheet {
    base: i32,
    hits: Vec<RuleHit>,
}

impl ScoreSheet {
    pub fn new(base: i32) -> Self {
        Self { base, hits: vec![] }
    }

    /// Apply a whole rule table.
    pub fn apply<C: ?Sized>(&mut self, rules: &[Rule<C>], ctx: &C) -> &mut Self {
        self.hits.extend(evaluate(rules, ctx));
        self
    }

    pub fn push(&mut self, hit: RuleHit) -> &mut Self {
        self.hits.push(hit);
        self
    }

    pub fn fired(&self, signal: &str) -> bool {
        self.hits.iter().any(|h| h.signal == signal)
    }

    /// Sum of base and deltas, before clamping.
    pub fn raw_total(&self) -> i32 {
        self.base + self.hits.iter().map(|h| h.delta).sum::<i32>()
    }

    /// Total clamped to 0-100.
    pub fn score(&self) -> u8 {
        clamp_score(self.raw_total())
    }

    pub fn hits(&self) -> &[RuleHit] {
        &self.hits
    }

    /// Messages of the rules that lowered the score.
    pub fn anomalies(&self) -> Vec<String> {
        self.hits
            .iter()
            .filter(|h| h.delta < 0)
            .map(|h| h.message.clone())
            .collect()
    }

    pub fn into_hits(self) -> Vec<RuleHit> {
        self.hits
    }
}

/// Clamp an additive total into the 0-100 score range.
pub fn clamp_score(total: i32) -> u8 {
    total.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx {
        value: i32,
    }

    static RULES: &[Rule<Ctx>] = &[
        Rule {
            signal: "positive",
            delta: 20,
            predicate: |c| c.value > 0,
            message: "value is positive",
        },
        Rule {
            signal: "large",
            delta: 90,
            predicate: |c| c.value > 100,
            message: "value is large",
        },
        Rule {
            signal: "negative",
            delta: -70,
            predicate: |c| c.value < 0,
            message: "value is negative",
        },
    ];

    #[test]
    fn test_evaluate_in_order() {
        let hits = evaluate(RULES, &Ctx { value: 500 });
        let signals: Vec<_> = hits.iter().map(|h| h.signal.as_str()).collect();
        assert_eq!(signals, vec!["positive", "large"]);
    }

    #[test]
    fn test_score_sheet_clamps() {
        let mut sheet = ScoreSheet::new(50);
        sheet.apply(RULES, &Ctx { value: 500 });
        assert_eq!(sheet.raw_total(), 160);
        assert_eq!(sheet.score(), 100);

        let mut sheet = ScoreSheet::new(50);
        sheet.apply(RULES, &Ctx { value: -1 });
        assert_eq!(sheet.score(), 0);
        assert_eq!(sheet.anomalies(), vec!["value is negative".to_string()]);
        assert!(sheet.fired("negative"));
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(-5), 0);
        assert_eq!(clamp_score(42), 42);
        assert_eq!(clamp_score(250), 100);
    }
}
