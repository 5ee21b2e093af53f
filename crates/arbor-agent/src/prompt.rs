//! Rendering of state into prompt context.

use arbor_core::state::{Plan, ToolInvocation, ToolResult};

use crate::graph::handoff::ToolOutput;

pub const DEFAULT_PLANNING_PROMPT: &str = "\
You are a planning module.
Produce a lightweight, actionable plan with 2-4 steps.
Each step should be concrete and align with the objective.
Each step should include a short tool hint when relevant.
Set every step status to \"pending\" when the plan is first created.";

pub const DEFAULT_TOOL_CALLER_PROMPT: &str = "\
You are a tool-calling agent.
Use available tools when they help accomplish the objective.
If no tool is needed, explain briefly why.";

pub const DEFAULT_STEP_EXECUTOR_PROMPT: &str = "\
You are the agent step executor.
You MUST call at least one tool.

- If a real tool is needed, call that tool.
- If no tool is needed, call \"route_decision\" with:
  { reason: string, action: \"plan\" | \"completed\" }
- If multiple tool calls are needed and do not depend on each other's outputs,
  include them all in a single response.
- If a tool call depends on a previous tool's output, use multiple steps.";

pub const DEFAULT_REASONING_PROMPT: &str = "\
You are the reasoning module.
Summarize what is known from the plan and tool outputs.
Explicitly state whether tool outputs are relevant to the objective.

If the objective can be answered with current information, choose \"completed\".
If more tool data is needed, choose \"tool_use\".
If no new information has been gathered since the last step, choose \"completed\".";

pub const DEFAULT_SUMMARY_PROMPT: &str = "\
You are the summary module.
Produce a comprehensive response grounded ONLY in the provided plan,
tool outputs, and reasoning. Do not invent facts or prices.";

/// Numbered plan steps with their status, or an empty string.
pub fn format_plan(plan: Option<&Plan>) -> String {
    let Some(plan) = plan else {
        return String::new();
    };
    let mut out = format!("Goal: {}", plan.goal);
    for (i, step) in plan.steps.iter().enumerate() {
        out.push_str(&format!("\n{}. {} (status: {})", i + 1, step.description, step.status));
        if let Some(hint) = &step.tool_hint {
            out.push_str(&format!(" [tool: {}]", hint));
        }
    }
    out
}

/// One line per invocation, or an empty string when no tool ran.
pub fn format_tool_history(history: &[ToolInvocation]) -> String {
    history
        .iter()
        .map(|inv| match &inv.result {
            ToolResult::Ok { data, .. } => format!("- {}: {}", inv.tool_name, data),
            ToolResult::Failed { code, message, .. } => {
                format!("- {}: ERROR {} {}", inv.tool_name, code, message)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Data of every successful invocation, in history order.
pub fn extract_tool_outputs(history: &[ToolInvocation]) -> Vec<ToolOutput> {
    history
        .iter()
        .filter_map(|inv| {
            inv.result.data().map(|data| ToolOutput {
                tool_name: inv.tool_name.clone(),
                data: data.clone(),
            })
        })
        .collect()
}

/// Join non-empty context blocks under a base prompt.
pub fn with_context(base: &str, blocks: &[String]) -> String {
    let blocks: Vec<&str> = blocks
        .iter()
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .collect();
    if blocks.is_empty() {
        base.to_string()
    } else {
        format!("{}\n\n{}", base.trim_end(), blocks.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::state::{Step, StepStatus};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_format_plan() {
        let plan = Plan {
            goal: "sum".into(),
            steps: vec![
                Step {
                    id: "step-1".into(),
                    description: "Add the numbers".into(),
                    status: StepStatus::Pending,
                    tool_hint: Some("add".into()),
                },
                Step {
                    id: "step-2".into(),
                    description: "Report".into(),
                    status: StepStatus::Done,
                    tool_hint: None,
                },
            ],
            updated_at: Utc::now(),
        };
        assert_eq!(
            format_plan(Some(&plan)),
            "Goal: sum\n1. Add the numbers (status: pending) [tool: add]\n2. Report (status: done)"
        );
        assert_eq!(format_plan(None), "");
    }

    #[test]
    fn test_format_tool_history() {
        let now = Utc::now();
        let history = vec![
            ToolInvocation {
                id: "c1".into(),
                tool_name: "add".into(),
                input: json!({"a": 2, "b": 2}),
                result: ToolResult::ok(json!(4)),
                started_at: now,
                finished_at: now,
            },
            ToolInvocation {
                id: "c2".into(),
                tool_name: "prod".into(),
                input: json!({}),
                result: ToolResult::failed("TOOL_INPUT_INVALID", "missing nums", false),
                started_at: now,
                finished_at: now,
            },
        ];
        assert_eq!(
            format_tool_history(&history),
            "- add: 4\n- prod: ERROR TOOL_INPUT_INVALID missing nums"
        );
        assert_eq!(extract_tool_outputs(&history).len(), 1);
    }

    #[test]
    fn test_with_context_skips_empty_blocks() {
        assert_eq!(with_context("base", &[String::new(), "  ".into()]), "base");
        assert_eq!(
            with_context("base\n", &["a".into(), String::new(), "b".into()]),
            "base\n\na\n\nb"
        );
    }
}
