//! Piece domain model.
//!
//! A piece is the workflow definition that drives one task: an ordered list
//! of movements, each bound to a persona and a set of transition rules.
//! Pieces are immutable once loaded.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use super::provider::{PermissionMode, ProviderKind};
use crate::domain::errors::{DomainError, DomainResult};

/// Sentinel that ends a run successfully.
pub const COMPLETE: &str = "COMPLETE";
/// Sentinel that ends a run with failure.
pub const ABORT: &str = "ABORT";

const fn default_max_movements() -> u32 {
    30
}

const fn default_true() -> bool {
    true
}

static FUNCTION_CONDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(ai|all|any)\(\s*"(.*)"\s*\)\s*$"#).expect("valid condition regex")
});

/// Target of a rule: another movement or one of the terminal sentinels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NextMovement {
    Movement(String),
    Complete,
    Abort,
}

impl NextMovement {
    pub fn movement(name: impl Into<String>) -> Self {
        Self::Movement(name.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Abort)
    }
}

impl From<String> for NextMovement {
    fn from(value: String) -> Self {
        match value.as_str() {
            COMPLETE => Self::Complete,
            ABORT => Self::Abort,
            _ => Self::Movement(value),
        }
    }
}

impl From<NextMovement> for String {
    fn from(value: NextMovement) -> Self {
        match value {
            NextMovement::Movement(name) => name,
            NextMovement::Complete => COMPLETE.to_string(),
            NextMovement::Abort => ABORT.to_string(),
        }
    }
}

impl fmt::Display for NextMovement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movement(name) => f.write_str(name),
            Self::Complete => f.write_str(COMPLETE),
            Self::Abort => f.write_str(ABORT),
        }
    }
}

/// How an aggregate rule combines the outcomes of parallel sub-movements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateMode {
    /// Every sub-movement matched the condition
    All,
    /// At least one sub-movement matched the condition
    Any,
}

/// Condition half of a rule, parsed from the YAML `condition` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleCondition {
    /// Plain condition, selected by a `[MOVEMENT:N]` tag
    Tag(String),
    /// `ai("...")`: only decidable by judging the response
    Ai(String),
    /// `all("...")` / `any("...")` over parallel sub-movement outcomes
    Aggregate { mode: AggregateMode, condition: String },
}

impl RuleCondition {
    pub fn tag(text: impl Into<String>) -> Self {
        Self::Tag(text.into())
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::Ai(text.into())
    }

    pub fn all(text: impl Into<String>) -> Self {
        Self::Aggregate {
            mode: AggregateMode::All,
            condition: text.into(),
        }
    }

    pub fn any(text: impl Into<String>) -> Self {
        Self::Aggregate {
            mode: AggregateMode::Any,
            condition: text.into(),
        }
    }

    /// The human-readable condition text.
    pub fn text(&self) -> &str {
        match self {
            Self::Tag(text) | Self::Ai(text) => text,
            Self::Aggregate { condition, .. } => condition,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate { .. })
    }
}

impl From<String> for RuleCondition {
    fn from(value: String) -> Self {
        let Some(caps) = FUNCTION_CONDITION.captures(&value) else {
            return Self::Tag(value.trim().to_string());
        };
        let inner = caps[2].to_string();
        match &caps[1] {
            "ai" => Self::Ai(inner),
            "all" => Self::all(inner),
            _ => Self::any(inner),
        }
    }
}

impl From<RuleCondition> for String {
    fn from(value: RuleCondition) -> Self {
        match value {
            RuleCondition::Tag(text) => text,
            RuleCondition::Ai(text) => format!("ai(\"{text}\")"),
            RuleCondition::Aggregate {
                mode: AggregateMode::All,
                condition,
            } => format!("all(\"{condition}\")"),
            RuleCondition::Aggregate {
                mode: AggregateMode::Any,
                condition,
            } => format!("any(\"{condition}\")"),
        }
    }
}

/// A condition-to-next-movement mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub condition: RuleCondition,

    /// Absent only on parallel sub-movement rules, whose match feeds the
    /// parent's aggregate rules instead of a transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextMovement>,

    /// Skip this rule when the run is not interactive.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interactive_only: bool,
}

impl Rule {
    pub fn new(condition: RuleCondition, next: NextMovement) -> Self {
        Self {
            condition,
            next: Some(next),
            interactive_only: false,
        }
    }

    /// A sub-movement rule with no transition of its own.
    pub fn outcome(condition: impl Into<String>) -> Self {
        Self {
            condition: RuleCondition::tag(condition),
            next: None,
            interactive_only: false,
        }
    }
}

/// One named phase of a piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub name: String,

    /// Empty only for parallel movements, whose sub-movements carry personas.
    #[serde(default)]
    pub persona: String,

    /// Instruction template rendered by the instruction builder
    #[serde(default)]
    pub instruction: String,

    #[serde(default)]
    pub rules: Vec<Rule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_permission_mode: Option<PermissionMode>,

    /// Whether the movement is expected to modify files
    #[serde(default)]
    pub edit: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,

    #[serde(default = "default_true")]
    pub pass_previous_response: bool,

    /// JSON schema requested from the agent; enables structured-output matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,

    /// Sub-movements executed concurrently
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel: Vec<Movement>,
}

impl Movement {
    pub fn new(name: impl Into<String>, persona: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona: persona.into(),
            instruction: String::new(),
            rules: vec![],
            provider: None,
            model: None,
            permission_mode: None,
            required_permission_mode: None,
            edit: false,
            allowed_tools: None,
            pass_previous_response: true,
            output_schema: None,
            parallel: vec![],
        }
    }

    /// A parallel parent movement over the given sub-movements.
    pub fn parallel(name: impl Into<String>, subs: Vec<Movement>) -> Self {
        Self {
            parallel: subs,
            ..Self::new(name, "")
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_rule(mut self, condition: RuleCondition, next: NextMovement) -> Self {
        self.rules.push(Rule::new(condition, next));
        self
    }

    pub fn with_outcome(mut self, condition: impl Into<String>) -> Self {
        self.rules.push(Rule::outcome(condition));
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind, model: Option<&str>) -> Self {
        self.provider = Some(provider);
        self.model = model.map(str::to_string);
        self
    }

    pub fn with_required_permission(mut self, mode: PermissionMode) -> Self {
        self.required_permission_mode = Some(mode);
        self
    }

    pub fn with_edit(mut self, edit: bool) -> Self {
        self.edit = edit;
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn is_parallel(&self) -> bool {
        !self.parallel.is_empty()
    }

    /// The tag prefix agents use for this movement, e.g. `PLAN` for `plan`.
    pub fn tag_name(&self) -> String {
        self.name.to_uppercase()
    }
}

/// Workflow definition driving one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub movements: Vec<Movement>,

    /// Defaults to the first movement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_movement: Option<String>,

    #[serde(default = "default_max_movements")]
    pub max_movements: u32,

    /// Overrides the configured loop detection threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_threshold: Option<usize>,
}

impl Piece {
    pub fn new(name: impl Into<String>, movements: Vec<Movement>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            movements,
            initial_movement: None,
            max_movements: default_max_movements(),
            loop_threshold: None,
        }
    }

    pub fn with_max_movements(mut self, max: u32) -> Self {
        self.max_movements = max;
        self
    }

    pub fn with_loop_threshold(mut self, threshold: usize) -> Self {
        self.loop_threshold = Some(threshold);
        self
    }

    /// Parse and validate a piece from YAML.
    pub fn from_yaml_str(yaml: &str) -> DomainResult<Self> {
        let piece: Piece = serde_yaml::from_str(yaml)
            .map_err(|e| DomainError::InvalidPiece(e.to_string()))?;
        piece.validate()?;
        Ok(piece)
    }

    pub fn initial_movement(&self) -> Option<&str> {
        self.initial_movement
            .as_deref()
            .or_else(|| self.movements.first().map(|m| m.name.as_str()))
    }

    pub fn movement(&self, name: &str) -> Option<&Movement> {
        self.movements.iter().find(|m| m.name == name)
    }

    pub fn has_movement(&self, name: &str) -> bool {
        self.movement(name).is_some()
    }

    /// Successor of a rule-less movement: the next one in declaration order,
    /// or `COMPLETE` after the last.
    pub fn implicit_successor(&self, name: &str) -> NextMovement {
        let position = self.movements.iter().position(|m| m.name == name);
        match position.and_then(|i| self.movements.get(i + 1)) {
            Some(next) => NextMovement::Movement(next.name.clone()),
            None => NextMovement::Complete,
        }
    }

    /// Check the structural invariants of the piece.
    ///
    /// Every `next` in every top-level rule must name a movement of this
    /// piece or one of the sentinels.
    pub fn validate(&self) -> DomainResult<()> {
        let invalid = |msg: String| Err(DomainError::InvalidPiece(format!("{}: {msg}", self.name)));

        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidPiece("piece name cannot be empty".to_string()));
        }
        if self.movements.is_empty() {
            return invalid("piece has no movements".to_string());
        }
        if self.max_movements == 0 {
            return invalid("max_movements must be at least 1".to_string());
        }
        if let Some(threshold) = self.loop_threshold {
            if threshold < 2 {
                return invalid(format!("loop_threshold must be at least 2, got {threshold}"));
            }
        }

        let mut names = HashSet::new();
        for movement in &self.movements {
            if movement.name.trim().is_empty() {
                return invalid("movement name cannot be empty".to_string());
            }
            if !names.insert(movement.name.as_str()) {
                return invalid(format!("duplicate movement '{}'", movement.name));
            }
            for name in std::iter::once(&movement.name).chain(movement.parallel.iter().map(|s| &s.name)) {
                if name.contains(['[', ']']) {
                    return invalid(format!("movement name '{name}' cannot contain brackets"));
                }
            }
        }

        if let Some(initial) = &self.initial_movement {
            if !names.contains(initial.as_str()) {
                return invalid(format!("initial movement '{initial}' does not exist"));
            }
        }

        for movement in &self.movements {
            if movement.is_parallel() {
                for sub in &movement.parallel {
                    if sub.persona.trim().is_empty() {
                        return invalid(format!(
                            "sub-movement '{}' of '{}' has no persona",
                            sub.name, movement.name
                        ));
                    }
                    if sub.rules.is_empty() {
                        return invalid(format!(
                            "sub-movement '{}' of '{}' has no rules",
                            sub.name, movement.name
                        ));
                    }
                }
            } else if movement.persona.trim().is_empty() {
                return invalid(format!("movement '{}' has no persona", movement.name));
            }

            for rule in &movement.rules {
                if rule.condition.is_aggregate() && !movement.is_parallel() {
                    return invalid(format!(
                        "aggregate rule '{}' in non-parallel movement '{}'",
                        String::from(rule.condition.clone()),
                        movement.name
                    ));
                }
                match &rule.next {
                    None => {
                        return invalid(format!(
                            "rule '{}' in movement '{}' has no next",
                            rule.condition.text(),
                            movement.name
                        ));
                    }
                    Some(NextMovement::Movement(target)) if !names.contains(target.as_str()) => {
                        return invalid(format!(
                            "rule '{}' in movement '{}' points to unknown movement '{target}'",
                            rule.condition.text(),
                            movement.name
                        ));
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIECE_YAML: &str = r#"
name: default
description: plan then implement
max_movements: 10
movements:
  - name: plan
    persona: planner
    instruction: "Plan: {task}"
    rules:
      - condition: Plan is ready
        next: implement
      - condition: ai("Requirements are unclear")
        next: ABORT
  - name: implement
    persona: coder
    edit: true
    provider: codex
    required_permission_mode: edit
  - name: review
    parallel:
      - name: arch-review
        persona: architect
        rules:
          - condition: approved
          - condition: needs_fix
      - name: qa-review
        persona: qa
        rules:
          - condition: approved
          - condition: needs_fix
    rules:
      - condition: all("approved")
        next: COMPLETE
      - condition: any("needs_fix")
        next: implement
"#;

    #[test]
    fn test_parse_piece_yaml() {
        let piece = Piece::from_yaml_str(PIECE_YAML).unwrap();

        assert_eq!(piece.name, "default");
        assert_eq!(piece.max_movements, 10);
        assert_eq!(piece.initial_movement(), Some("plan"));

        let plan = piece.movement("plan").unwrap();
        assert_eq!(plan.rules[0].condition, RuleCondition::tag("Plan is ready"));
        assert_eq!(plan.rules[0].next, Some(NextMovement::movement("implement")));
        assert_eq!(plan.rules[1].condition, RuleCondition::ai("Requirements are unclear"));
        assert_eq!(plan.rules[1].next, Some(NextMovement::Abort));

        let implement = piece.movement("implement").unwrap();
        assert!(implement.edit);
        assert_eq!(implement.provider, Some(ProviderKind::Codex));
        assert_eq!(implement.required_permission_mode, Some(PermissionMode::Edit));

        let review = piece.movement("review").unwrap();
        assert!(review.is_parallel());
        assert_eq!(review.rules[0].condition, RuleCondition::all("approved"));
        assert_eq!(review.rules[1].condition, RuleCondition::any("needs_fix"));
    }

    #[test]
    fn test_implicit_successor() {
        let piece = Piece::from_yaml_str(PIECE_YAML).unwrap();
        assert_eq!(
            piece.implicit_successor("implement"),
            NextMovement::movement("review")
        );
        assert_eq!(piece.implicit_successor("review"), NextMovement::Complete);
    }

    #[test]
    fn test_validate_rejects_unknown_next() {
        let piece = Piece::new(
            "broken",
            vec![Movement::new("plan", "planner")
                .with_rule(RuleCondition::tag("done"), NextMovement::movement("missing"))],
        );
        let err = piece.validate().unwrap_err();
        assert!(err.to_string().contains("unknown movement 'missing'"));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        let piece = Piece::new(
            "dup",
            vec![Movement::new("plan", "a"), Movement::new("plan", "b")],
        );
        assert!(piece.validate().is_err());

        let piece = Piece::new("empty", vec![]);
        assert!(piece.validate().is_err());

        let piece = Piece::new("zero", vec![Movement::new("plan", "a")]).with_max_movements(0);
        assert!(piece.validate().is_err());
    }

    #[test]
    fn test_validate_movement_names_must_be_taggable() {
        let piece = Piece::new("spaced", vec![Movement::new("ai review", "reviewer")]);
        assert!(piece.validate().is_ok());
        assert_eq!(piece.movements[0].tag_name(), "AI REVIEW");

        let piece = Piece::new("bracketed", vec![Movement::new("review[1]", "reviewer")]);
        let err = piece.validate().unwrap_err();
        assert!(err.to_string().contains("brackets"));
    }

    #[test]
    fn test_validate_rejects_aggregate_outside_parallel() {
        let piece = Piece::new(
            "agg",
            vec![Movement::new("plan", "planner")
                .with_rule(RuleCondition::all("approved"), NextMovement::Complete)],
        );
        assert!(piece.validate().is_err());
    }

    #[test]
    fn test_condition_round_trip_through_string() {
        let cond = RuleCondition::from("ai(\"needs work\")".to_string());
        assert_eq!(cond, RuleCondition::ai("needs work"));
        assert_eq!(String::from(cond), "ai(\"needs work\")");
        assert_eq!(
            RuleCondition::from("  plain text ".to_string()),
            RuleCondition::tag("plain text")
        );
    }
}
