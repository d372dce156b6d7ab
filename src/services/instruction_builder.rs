//! Default instruction builder: placeholder substitution plus the status
//! tag block for tag-matched rules.

use crate::domain::models::{Movement, Rule};
use crate::domain::ports::{InstructionBuilder, InstructionContext};

const DEFAULT_TEMPLATE: &str = "{task}";

/// Renders movement instructions from their `{placeholder}` templates.
///
/// Supported placeholders: `{task}`, `{previous_response}`,
/// `{user_inputs}`, `{iteration}`, `{max_movements}`,
/// `{movement_iteration}`, `{movement}`, `{retry_note}`, `{issue}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateInstructionBuilder;

impl TemplateInstructionBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl InstructionBuilder for TemplateInstructionBuilder {
    fn build(&self, ctx: &InstructionContext<'_>) -> String {
        let movement = ctx.movement;
        let template = if movement.instruction.trim().is_empty() {
            DEFAULT_TEMPLATE
        } else {
            movement.instruction.as_str()
        };

        let previous = if movement.pass_previous_response {
            ctx.state.last_response().map(|r| r.content.as_str()).unwrap_or_default()
        } else {
            ""
        };
        let user_inputs = ctx.state.user_inputs.iter().collect::<Vec<_>>().join("\n");
        let issue = ctx.issue.map(|n| format!("#{n}")).unwrap_or_default();

        let mut prompt = template
            .replace("{task}", ctx.task)
            .replace("{previous_response}", previous)
            .replace("{user_inputs}", &user_inputs)
            .replace("{iteration}", &(ctx.state.global_iteration + 1).to_string())
            .replace("{max_movements}", &ctx.max_movements.to_string())
            .replace("{movement_iteration}", &ctx.movement_iteration.to_string())
            .replace("{movement}", &movement.name)
            .replace("{retry_note}", ctx.retry_note.unwrap_or_default())
            .replace("{issue}", &issue);

        if !template.contains("{user_inputs}") && !ctx.state.user_inputs.is_empty() {
            prompt.push_str("\n\n## Additional input from the user\n");
            prompt.push_str(&user_inputs);
        }

        if let Some(block) = status_tag_block(movement, ctx.interactive) {
            prompt.push_str("\n\n");
            prompt.push_str(&block);
        }

        prompt
    }
}

fn taggable(rule: &Rule, interactive: bool) -> bool {
    !rule.condition.is_aggregate() && (interactive || !rule.interactive_only)
}

/// Lines telling the agent which tag to end its answer with.
pub fn status_tag_block(movement: &Movement, interactive: bool) -> Option<String> {
    let tag = movement.tag_name();
    let lines: Vec<String> = movement
        .rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| taggable(rule, interactive))
        .map(|(i, rule)| format!("- [{tag}:{}] {}", i + 1, rule.condition.text()))
        .collect();
    if lines.is_empty() {
        return None;
    }

    Some(format!(
        "## Status\nEnd your response with exactly one of these tags, the one that applies:\n{}",
        lines.join("\n")
    ))
}
