//! Research → analysis → synthesis pipeline over two agent subgraphs.
//!
//! Stages never see each other's raw state. Each stage ends by condensing its
//! run into a `Handoff` plus `MetaStats`; the next stage is seeded from that
//! handoff alone.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use arbor_core::config::{ModelRole, WorkflowConfig};
use arbor_core::error::Result;
use arbor_core::event::{EventBus, TraceEvent};
use arbor_core::state::{AgentError, AgentState};
use arbor_core::types::{ChatMessage, ModelRequest, RunId};
use arbor_tools::builtin::{analysis_registry, research_registry};

use crate::graph::executor::{GraphEngine, DEFAULT_RECURSION_LIMIT};
use crate::graph::handoff::{Handoff, MetaStats};
use crate::graph::node::NodeId;
use crate::model::BoundModel;
use crate::nodes::model_error;
use crate::subgraph::{AgentGraphBuilder, Decider};

const RESEARCH_TOOL_CALLER_PROMPT: &str = "\
You are the research tool-caller for a shopping workflow.
Use tools to fetch the user profile and product catalog.
If the data is already available, do not call tools.";

const RESEARCH_REASONING_PROMPT: &str = "\
You are the research reasoning module.
Decide if you have enough data to summarize the user's preferences and available products.
If more data is needed, choose tool_use.";

const RESEARCH_SUMMARY_PROMPT: &str = "\
You are the research summarizer.
Provide a concise summary of user preferences and relevant products.
Use ONLY tool outputs for product names and prices. Do not invent items.";

const ANALYSIS_TOOL_CALLER_PROMPT: &str = "\
You are the analysis tool-caller for a shopping workflow.
Use tools to compute totals, shipping, and any math needed.
If no tools are needed, explain why.";

const ANALYSIS_REASONING_PROMPT: &str = "\
You are the analysis reasoning module.
Decide if you have enough data to provide totals and cost analysis.
If more data is needed, choose tool_use.";

const ANALYSIS_SUMMARY_PROMPT: &str = "\
You are the analysis summarizer.
Provide totals and a short recommendation with computed costs.
Use ONLY tool outputs for product names and prices. Do not invent items.";

pub const ANALYSIS_OBJECTIVE: &str =
    "Compute totals and provide cost analysis based on research summary.";

/// Outcome of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub handoff: Handoff,
    pub meta: MetaStats,
    #[serde(skip)]
    pub state: AgentState,
}

impl StageReport {
    fn from_state(name: &str, state: AgentState) -> Self {
        let mut handoff = Handoff::from_state(&state);
        if let Some(answer) = state.last_assistant_text() {
            if answer != handoff.summary {
                handoff = handoff.with_notes(answer);
            }
        }
        Self {
            name: name.to_string(),
            meta: MetaStats::from_state(&state),
            handoff,
            state,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    pub run_id: RunId,
    pub research: StageReport,
    pub analysis: StageReport,
    pub answer: String,
    pub errors: Vec<AgentError>,
    pub total_tokens: u64,
}

pub struct WorkflowBuilder {
    default_model: BoundModel,
    role_models: HashMap<ModelRole, BoundModel>,
    config: WorkflowConfig,
    recursion_limit: u32,
    event_bus: Option<Arc<EventBus>>,
}

impl WorkflowBuilder {
    pub fn with_role_model(mut self, role: ModelRole, model: BoundModel) -> Self {
        self.role_models.insert(role, model);
        self
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn stage(&self, name: &str) -> AgentGraphBuilder {
        let mut builder = AgentGraphBuilder::new(name)
            .with_model(self.default_model.clone())
            .with_decider(Decider::ToolCaller)
            .with_planner(true)
            .with_prefix(name)
            .with_agent_id(format!("{}-agent", name))
            .with_recursion_limit(self.recursion_limit);
        for (role, model) in &self.role_models {
            builder = builder.with_role_model(*role, model.clone());
        }
        if let Some(bus) = &self.event_bus {
            builder = builder.with_event_bus(Arc::clone(bus));
        }
        builder
    }

    pub fn build(self) -> Result<Workflow> {
        let research = self
            .stage("research")
            .with_tools(Arc::new(research_registry()))
            .with_system_prompt(NodeId::ToolCaller, RESEARCH_TOOL_CALLER_PROMPT)
            .with_system_prompt(NodeId::Reasoning, RESEARCH_REASONING_PROMPT)
            .with_system_prompt(NodeId::Summary, RESEARCH_SUMMARY_PROMPT)
            .build()?;
        let analysis = self
            .stage("analysis")
            .with_tools(Arc::new(analysis_registry()))
            .with_system_prompt(NodeId::ToolCaller, ANALYSIS_TOOL_CALLER_PROMPT)
            .with_system_prompt(NodeId::Reasoning, ANALYSIS_REASONING_PROMPT)
            .with_system_prompt(NodeId::Summary, ANALYSIS_SUMMARY_PROMPT)
            .build()?;
        let synthesis = self
            .role_models
            .get(&ModelRole::Answer)
            .cloned()
            .unwrap_or(self.default_model);

        Ok(Workflow {
            research,
            analysis,
            synthesis,
            config: self.config,
            event_bus: self.event_bus,
        })
    }
}

/// The fixed three-stage pipeline.
pub struct Workflow {
    research: GraphEngine,
    analysis: GraphEngine,
    synthesis: BoundModel,
    config: WorkflowConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl Workflow {
    pub fn builder(model: BoundModel) -> WorkflowBuilder {
        WorkflowBuilder {
            default_model: model,
            role_models: HashMap::new(),
            config: WorkflowConfig::default(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            event_bus: None,
        }
    }

    pub async fn run(&self, request: &str) -> Result<WorkflowOutcome> {
        self.run_with_id(request, RunId::new()).await
    }

    /// Run all stages under one run id, shared by every trace event.
    pub async fn run_with_id(&self, request: &str, run_id: RunId) -> Result<WorkflowOutcome> {
        info!(run_id = %run_id, "Workflow started");

        let state = self
            .research
            .initial_state(request, vec![], self.config.research_max_steps)
            .with_run_id(run_id.clone());
        let research = self.finish_stage("research", self.research.invoke(state).await?);

        let seed = format!(
            "User request: {}\nResearch summary: {}\nUse ONLY the data in the research summary.",
            request, research.handoff.summary
        );
        let state = self
            .analysis
            .initial_state(
                ANALYSIS_OBJECTIVE,
                vec![ChatMessage::human(seed)],
                self.config.analysis_max_steps,
            )
            .with_run_id(run_id.clone());
        let analysis = self.finish_stage("analysis", self.analysis.invoke(state).await?);

        let mut errors: Vec<AgentError> = research
            .state
            .errors
            .iter()
            .chain(analysis.state.errors.iter())
            .cloned()
            .collect();
        let mut total_tokens = research.meta.total_tokens + analysis.meta.total_tokens;

        let prompt = synthesis_prompt(request, &research, &analysis);
        let answer = match self
            .synthesis
            .invoke(ModelRequest::new("", vec![ChatMessage::human(prompt)]))
            .await
        {
            Ok(response) => {
                total_tokens += response.usage.total();
                response.content
            }
            Err(e) => {
                warn!(error = %e, "Final synthesis failed; falling back to analysis output");
                errors.push(model_error(&e));
                analysis
                    .handoff
                    .notes
                    .clone()
                    .unwrap_or_else(|| analysis.handoff.summary.clone())
            }
        };

        info!(run_id = %run_id, total_tokens, errors = errors.len(), "Workflow finished");
        Ok(WorkflowOutcome {
            run_id,
            research,
            analysis,
            answer,
            errors,
            total_tokens,
        })
    }

    fn finish_stage(&self, name: &str, state: AgentState) -> StageReport {
        let report = StageReport::from_state(name, state);
        info!(
            stage = name,
            steps = report.meta.steps,
            tool_calls = report.meta.tool_calls,
            total_tokens = report.meta.total_tokens,
            "Stage complete"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(TraceEvent::StageCompleted {
                run_id: report.state.run_id.clone(),
                stage: name.to_string(),
                steps: report.meta.steps,
                total_tokens: report.meta.total_tokens,
                tool_calls: report.meta.tool_calls,
            });
        }
        report
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn synthesis_prompt(request: &str, research: &StageReport, analysis: &StageReport) -> String {
    format!(
        "User request: {}\n\
         Research summary: {}\n\
         Analysis summary: {}\n\
         Research handoff: {}\n\
         Analysis handoff: {}\n\
         Research meta: {}\n\
         Analysis meta: {}\n\
         Use ONLY the data in the summaries. Do not invent products or prices.",
        request,
        research.handoff.summary,
        analysis.handoff.summary,
        research.handoff.to_json(),
        analysis.handoff.to_json(),
        to_json(&research.meta),
        to_json(&analysis.meta),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::bound;
    use arbor_core::state::AgentErrorKind;
    use arbor_test_utils::{call, plan_payload, reasoning_payload, ScriptedLlm};
    use serde_json::json;

    fn scripted_stages(llm: ScriptedLlm) -> ScriptedLlm {
        llm
            // research
            .structured(plan_payload(&["Fetch the catalog", "List what is in stock"]))
            .calls(vec![call("r1", "fetch_catalog", json!({}))])
            .structured(reasoning_payload("completed", "Catalog fetched."))
            .text("Lantern and tent are available.")
            // analysis
            .structured(plan_payload(&["Add prices", "Report the total"]))
            .calls(vec![call("a1", "add", json!({"a": 45, "b": 120}))])
            .structured(reasoning_payload("completed", "Total computed."))
            .text("Total is 165.")
    }

    #[tokio::test]
    async fn test_three_stage_pipeline() {
        let llm = scripted_stages(ScriptedLlm::new()).text("Buy both for 165.");
        let bus = Arc::new(EventBus::new(256));
        let mut rx = bus.subscribe();
        let workflow = Workflow::builder(bound(&llm))
            .with_event_bus(bus.clone())
            .build()
            .unwrap();

        let outcome = workflow.run("Find me camping gear").await.unwrap();

        assert_eq!(outcome.answer, "Buy both for 165.");
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.research.meta.tool_calls, 1);
        assert_eq!(outcome.research.meta.steps, 4);
        assert!(outcome.research.handoff.summary.starts_with("Tool outputs:\n- fetch_catalog:"));
        assert_eq!(
            outcome.research.handoff.notes.as_deref(),
            Some("Lantern and tent are available.")
        );
        assert_eq!(outcome.analysis.handoff.tool_outputs[0].data, json!(165));
        assert_eq!(outcome.analysis.state.agent_id, "analysis-agent");
        assert_eq!(outcome.analysis.state.objective, ANALYSIS_OBJECTIVE);
        assert_eq!(outcome.analysis.state.run_id, outcome.run_id);
        assert_eq!(llm.remaining(), 0);

        // The analysis stage is seeded from the research handoff only
        let requests = llm.requests();
        let analysis_seed = requests[4].messages[0].text();
        assert!(analysis_seed.starts_with("User request: Find me camping gear\nResearch summary: Tool outputs:"));

        let final_prompt = requests[8].messages[0].text();
        assert!(final_prompt.contains("Research meta: {\"steps\":4"));
        assert!(final_prompt.ends_with("Do not invent products or prices."));

        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TraceEvent::StageCompleted { stage, .. } = event {
                stages.push(stage);
            }
        }
        assert_eq!(stages, vec!["research", "analysis"]);
    }

    #[tokio::test]
    async fn test_synthesis_failure_falls_back() {
        let llm = scripted_stages(ScriptedLlm::new()).fail("HTTP 503 Service Unavailable: down");
        let workflow = Workflow::builder(bound(&llm)).build().unwrap();

        let outcome = workflow.run("Find me camping gear").await.unwrap();

        assert_eq!(outcome.answer, "Total is 165.");
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind, AgentErrorKind::Model);
    }
}
