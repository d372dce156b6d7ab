//! Transition Resolver
//!
//! Maps an agent response to the rule of a movement it selects. Pure
//! functions only; the judged phase is driven by the engine, which feeds
//! the judgment text back through [`resolve_judgment`].
//!
//! Precedence for a response:
//! 1. aggregate rules over parallel sub-movement outcomes
//! 2. structured output (`step` or `condition` field) when a schema was requested
//! 3. the last `[MOVEMENT:N]` tag in the response text
//!
//! Within each phase the first eligible rule in declaration order wins.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::models::{
    AgentResponse, AggregateMode, MatchMethod, Movement, Rule, RuleCondition, RuleMatch,
};

/// `[<movement>:<n>]`. Movement names may contain spaces and colons; the
/// last `:<digits>]` closes the tag.
static STATUS_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]+):(\d+)\]").expect("valid tag regex"));

/// Evaluation context for one response.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext {
    pub interactive: bool,
    /// The movement asked the agent for structured output
    pub schema_requested: bool,
}

impl TransitionContext {
    pub fn for_movement(movement: &Movement, interactive: bool) -> Self {
        Self {
            interactive,
            schema_requested: movement.output_schema.is_some(),
        }
    }
}

fn is_eligible(rule: &Rule, ctx: TransitionContext) -> bool {
    !rule.interactive_only || ctx.interactive
}

fn same_condition(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Match a response against the movement's rules without judging.
///
/// `sub_outcomes` carries the matched condition of each parallel
/// sub-movement (`None` for a sub-movement that matched nothing); it is
/// empty for ordinary movements. Returns `None` when only a judged status
/// can decide.
pub fn resolve(
    movement: &Movement,
    response: &AgentResponse,
    sub_outcomes: &[Option<String>],
    ctx: TransitionContext,
) -> Option<RuleMatch> {
    if !sub_outcomes.is_empty() {
        if let Some(index) = match_aggregate(&movement.rules, sub_outcomes, ctx) {
            return Some(RuleMatch::new(index, MatchMethod::Aggregate));
        }
    }

    if ctx.schema_requested {
        if let Some(index) = match_structured(&movement.rules, response, ctx) {
            return Some(RuleMatch::new(index, MatchMethod::StructuredOutput));
        }
    }

    match_tag(&movement.rules, &movement.tag_name(), &response.content, ctx)
        .map(|index| RuleMatch::new(index, MatchMethod::Phase1Tag))
}

/// Match the text of a status judgment: a tag first, then keywords.
pub fn resolve_judgment(
    movement: &Movement,
    judgment: &str,
    ctx: TransitionContext,
) -> Option<RuleMatch> {
    if let Some(index) = match_tag(&movement.rules, &movement.tag_name(), judgment, ctx) {
        return Some(RuleMatch::new(index, MatchMethod::Phase3Tag));
    }
    match_keyword(&movement.rules, judgment, ctx)
        .map(|index| RuleMatch::new(index, MatchMethod::AiJudgeFallback))
}

/// Select a rule by the `step` (1-based) or `condition` field of the
/// response's structured output.
pub fn match_structured(
    rules: &[Rule],
    response: &AgentResponse,
    ctx: TransitionContext,
) -> Option<usize> {
    let output = response.structured_output.as_ref()?;

    if let Some(step) = output.get("step").and_then(serde_json::Value::as_u64) {
        let index = usize::try_from(step).ok()?.checked_sub(1)?;
        return rules
            .get(index)
            .filter(|rule| !rule.condition.is_aggregate() && is_eligible(rule, ctx))
            .map(|_| index);
    }

    let condition = output.get("condition").and_then(serde_json::Value::as_str)?;
    rules.iter().position(|rule| {
        !rule.condition.is_aggregate()
            && is_eligible(rule, ctx)
            && same_condition(rule.condition.text(), condition)
    })
}

/// Select a rule by the last valid `[TAG:N]` in `text`.
///
/// Tags for other movements, out-of-range indices, aggregate rules and
/// skipped interactive-only rules are ignored.
pub fn match_tag(rules: &[Rule], tag_name: &str, text: &str, ctx: TransitionContext) -> Option<usize> {
    let captures: Vec<_> = STATUS_TAG.captures_iter(text).collect();
    captures.iter().rev().find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(tag_name) {
            return None;
        }
        let index = caps[2].parse::<usize>().ok()?.checked_sub(1)?;
        let rule = rules.get(index)?;
        (!rule.condition.is_aggregate() && is_eligible(rule, ctx)).then_some(index)
    })
}

/// Case-insensitive containment of a rule's condition text in `text`.
pub fn match_keyword(rules: &[Rule], text: &str, ctx: TransitionContext) -> Option<usize> {
    let haystack = text.to_lowercase();
    rules.iter().position(|rule| {
        let needle = rule.condition.text().trim().to_lowercase();
        !rule.condition.is_aggregate()
            && is_eligible(rule, ctx)
            && !needle.is_empty()
            && haystack.contains(&needle)
    })
}

/// Evaluate `all(..)` / `any(..)` rules over sub-movement outcomes.
pub fn match_aggregate(
    rules: &[Rule],
    sub_outcomes: &[Option<String>],
    ctx: TransitionContext,
) -> Option<usize> {
    rules.iter().position(|rule| {
        let RuleCondition::Aggregate { mode, condition } = &rule.condition else {
            return false;
        };
        if !is_eligible(rule, ctx) {
            return false;
        }
        let hit = |outcome: &Option<String>| {
            outcome
                .as_deref()
                .is_some_and(|matched| same_condition(matched, condition))
        };
        match mode {
            AggregateMode::All => sub_outcomes.iter().all(hit),
            AggregateMode::Any => sub_outcomes.iter().any(hit),
        }
    })
}
