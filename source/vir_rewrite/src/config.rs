use crate::messages::{no_span, Reporter};
use serde::Deserialize;

/// Which declarations the induction pass looks at
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum InductionMode {
    /// no induction attributes at all, not even explicit ones
    Never,
    /// only explicit `{:induction ...}` attributes
    ExplicitOnly,
    /// heuristics for quantifiers; lemmas only with explicit attributes
    QuantifiersOnly,
    LemmasAndQuantifiers,
}

impl InductionMode {
    pub fn honors_explicit(&self) -> bool {
        *self != InductionMode::Never
    }

    pub fn infer_for_lemmas(&self) -> bool {
        *self == InductionMode::LemmasAndQuantifiers
    }

    pub fn infer_for_quantifiers(&self) -> bool {
        matches!(self, InductionMode::QuantifiersOnly | InductionMode::LemmasAndQuantifiers)
    }
}

pub const MAX_INDUCTION_HEURISTIC: u8 = 6;
/// seconds, used by `{:timeLimitMultiplier}` when no limit is configured
pub const DEFAULT_TIME_LIMIT: u32 = 10;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RewriteOptions {
    pub induction: InductionMode,
    pub induction_heuristic: u8,
    /// seconds; 0 means unset
    pub time_limit: u32,
    /// 0 means unset
    pub resource_limit: u32,
    /// quantifier splitting and trigger selection
    pub auto_triggers: bool,
    pub auto_req: bool,
    /// emit `Info` messages describing synthesized code
    pub report_hover_text: bool,
    /// dump the resolved program as s-expressions to this file
    pub log_ast: Option<String>,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        RewriteOptions {
            induction: InductionMode::LemmasAndQuantifiers,
            induction_heuristic: MAX_INDUCTION_HEURISTIC,
            time_limit: 0,
            resource_limit: 0,
            auto_triggers: true,
            auto_req: true,
            report_hover_text: true,
            log_ast: None,
        }
    }
}

impl RewriteOptions {
    /// Clamp out-of-range settings, warning about each one
    pub fn validate(&mut self, reporter: &mut Reporter) {
        if self.induction_heuristic > MAX_INDUCTION_HEURISTIC {
            reporter.warning(
                &no_span(),
                format!(
                    "induction heuristic {} is out of range; using {}",
                    self.induction_heuristic, MAX_INDUCTION_HEURISTIC
                ),
            );
            self.induction_heuristic = MAX_INDUCTION_HEURISTIC;
        }
    }

    /// The limit `{:timeLimitMultiplier}` multiplies, and the attribute it produces
    pub fn time_limit_base(&self) -> (&'static str, u32) {
        if self.resource_limit > 0 {
            (crate::attributes::RLIMIT_INTERNAL, self.resource_limit)
        } else if self.time_limit > 0 {
            (crate::attributes::TIME_LIMIT, self.time_limit)
        } else {
            (crate::attributes::TIME_LIMIT, DEFAULT_TIME_LIMIT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{CollectedDiagnostics, MessageLevel};

    #[test]
    fn heuristic_is_clamped() {
        let mut options = RewriteOptions { induction_heuristic: 9, ..Default::default() };
        let mut diags = CollectedDiagnostics::new();
        options.validate(&mut Reporter::new(&mut diags, "config"));
        assert_eq!(options.induction_heuristic, 6);
        assert_eq!(diags.count(MessageLevel::Warning), 1);
    }

    #[test]
    fn resource_limit_wins_over_time_limit() {
        let options = RewriteOptions { time_limit: 20, resource_limit: 500, ..Default::default() };
        assert_eq!(options.time_limit_base(), ("_rlimit", 500));
        let options = RewriteOptions { time_limit: 20, ..Default::default() };
        assert_eq!(options.time_limit_base(), ("timeLimit", 20));
        assert_eq!(RewriteOptions::default().time_limit_base(), ("timeLimit", 10));
    }
}
