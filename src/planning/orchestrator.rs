//! ChapterPlanner: bounded ReAct loop ahead of chapter writing
//!
//! A fixed prefetch runs first so baseline context exists whatever the model
//! decides. Each step then asks the model for one `{reasoning, action, args}`
//! decision, runs the named tool and records the observation. The loop ends
//! on WRITE, on an unknown tool (kept as a directive), on a model error, or
//! when the step budget runs out, in which case the outline and volume
//! blueprint are guaranteed to have been fetched.

use super::content::ContentSource;
use super::decision::{parse_decision, Decision};
use super::digest::{build_digest, estimate_tokens, truncate_to_tokens, GatheredContext};
use super::intent::{derive_intent, ChapterIntent, IntentSignals};
use super::recommend::RecommendationRules;
use super::tools::{tool_name, ToolRegistry};
use crate::config::PlanningSettings;
use crate::llm::{task_tag, ChatMessage, ModelClient, ModelConfig};
use crate::query::NarrativeRhythm;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Token allowance for one observation echoed into later prompts
const OBSERVATION_TOKENS: usize = 200;

/// Token allowance for a tool result sent to the reflection call
const REFLECTION_TOKENS: usize = 400;

/// Always prefetched
const BASE_PREFETCH: &[&str] = &[
    tool_name::GET_OUTLINE,
    tool_name::GET_VOLUME_BLUEPRINT,
    tool_name::GET_RECENT_CHAPTERS,
    tool_name::GET_RELEVANT_EVENTS,
    tool_name::GET_WORLD_RULES,
];

/// Prefetched once the story is past its early chapters
const LATE_PREFETCH: &[&str] = &[
    tool_name::GET_UNRESOLVED_FORESHADOWING,
    tool_name::GET_NARRATIVE_RHYTHM,
    tool_name::GET_PLOTLINE_STATUS,
    tool_name::GET_CONFLICT_ARC_STATUS,
    tool_name::GET_CHARACTER_ARC_STATUS,
    tool_name::GET_PERSPECTIVE_HISTORY,
];

/// Fetched by the forced fallback when the step budget runs out
const FALLBACK_TOOLS: &[&str] = &[tool_name::GET_OUTLINE, tool_name::GET_VOLUME_BLUEPRINT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Thinking,
    Acting,
    Observing,
    WriteReady,
    MaxStepsExceeded,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::WriteReady | Self::MaxStepsExceeded)
    }
}

/// Where a tool call came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOrigin {
    Prefetch,
    Step,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool: String,
    pub origin: CallOrigin,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningStep {
    pub step: usize,
    pub reasoning: String,
    pub action: String,
    pub args: Map<String, Value>,
    /// Truncated result text, or the error message
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningRequest {
    pub novel_id: String,
    pub chapter_number: u32,
    /// Free-text instruction from the author, may be empty
    #[serde(default)]
    pub instruction: String,
    pub model_config: ModelConfig,
}

impl PlanningRequest {
    pub fn new(novel_id: impl Into<String>, chapter_number: u32, model_config: ModelConfig) -> Self {
        Self {
            novel_id: novel_id.into(),
            chapter_number,
            instruction: String::new(),
            model_config,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }
}

/// Everything the downstream writing stage receives
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningOutcome {
    pub final_state: LoopState,
    pub steps: Vec<PlanningStep>,
    pub tool_calls: Vec<ToolCall>,
    /// Set when the model named something that is not a tool
    pub directive: Option<String>,
    pub context: GatheredContext,
    pub digest: String,
    pub intent: ChapterIntent,
}

impl PlanningOutcome {
    /// True if `tool` ran successfully at least once
    pub fn ran(&self, tool: &str) -> bool {
        self.tool_calls.iter().any(|c| c.tool == tool && c.succeeded)
    }
}

/// Mutable state of one planning run
struct LoopRun {
    state: LoopState,
    context: GatheredContext,
    steps: Vec<PlanningStep>,
    tool_calls: Vec<ToolCall>,
    succeeded: HashSet<String>,
    directive: Option<String>,
}

impl LoopRun {
    fn transition(&mut self, next: LoopState, request: &PlanningRequest) {
        debug!(
            novel_id = %request.novel_id,
            chapter = request.chapter_number,
            from = ?self.state,
            to = ?next,
            "planning state"
        );
        self.state = next;
    }
}

pub struct ChapterPlanner {
    registry: Arc<ToolRegistry>,
    client: Arc<dyn ModelClient>,
    content: Arc<dyn ContentSource>,
    rules: RecommendationRules,
    settings: PlanningSettings,
}

impl ChapterPlanner {
    pub fn new(
        registry: Arc<ToolRegistry>,
        client: Arc<dyn ModelClient>,
        content: Arc<dyn ContentSource>,
        settings: PlanningSettings,
    ) -> Self {
        Self {
            registry,
            client,
            content,
            rules: RecommendationRules::default(),
            settings,
        }
    }

    pub fn with_rules(mut self, rules: RecommendationRules) -> Self {
        self.rules = rules;
        self
    }

    fn is_early(&self, chapter: u32) -> bool {
        chapter <= self.settings.early_chapter_threshold
    }

    /// Step budget for a chapter
    pub fn step_budget(&self, chapter: u32) -> usize {
        if self.is_early(chapter) {
            self.settings.max_steps.min(self.settings.early_max_steps)
        } else {
            self.settings.max_steps
        }
    }

    /// Tools the prefetch runs for a chapter
    pub fn required_tools(&self, chapter: u32) -> Vec<&'static str> {
        let mut tools = BASE_PREFETCH.to_vec();
        if !self.is_early(chapter) {
            tools.extend_from_slice(LATE_PREFETCH);
        }
        tools
    }

    /// Plan one chapter. Never fails; problems degrade the gathered context.
    pub async fn plan(&self, request: &PlanningRequest) -> PlanningOutcome {
        let mut run = LoopRun {
            state: LoopState::Thinking,
            context: GatheredContext::default(),
            steps: Vec::new(),
            tool_calls: Vec::new(),
            succeeded: HashSet::new(),
            directive: None,
        };

        self.prefetch(request, &mut run).await;
        let budget = self.step_budget(request.chapter_number);
        let recommended = self.rules.recommend(&request.instruction);
        info!(
            novel_id = %request.novel_id,
            chapter = request.chapter_number,
            budget,
            prefetched = run.succeeded.len(),
            "planning loop starting"
        );

        for step in 1..=budget {
            run.transition(LoopState::Thinking, request);
            let messages = self.step_messages(request, &run, &recommended);
            let decision = match self
                .client
                .generate(&messages, task_tag::REACT_DECISION, &request.model_config)
                .await
            {
                Ok(text) => parse_decision(&text),
                Err(e) => {
                    warn!(
                        novel_id = %request.novel_id,
                        chapter = request.chapter_number,
                        step,
                        error = %e,
                        "decision call failed, proceeding to write"
                    );
                    run.transition(LoopState::WriteReady, request);
                    break;
                }
            };

            if decision.is_write() {
                debug!(step, reasoning = %decision.reasoning, "model chose to write");
                run.transition(LoopState::WriteReady, request);
                break;
            }

            run.transition(LoopState::Acting, request);
            if !self.registry.contains(decision.action.trim()) {
                info!(
                    novel_id = %request.novel_id,
                    step,
                    action = %decision.action,
                    "unknown tool, keeping it as a directive"
                );
                run.directive = Some(decision.action.trim().to_string());
                run.transition(LoopState::WriteReady, request);
                break;
            }

            let observation = self.act(request, &mut run, &decision).await;
            run.transition(LoopState::Observing, request);
            run.steps.push(PlanningStep {
                step,
                reasoning: decision.reasoning,
                action: decision.action,
                args: decision.args,
                observation,
            });
        }

        if !run.state.is_terminal() {
            run.transition(LoopState::MaxStepsExceeded, request);
            self.fallback(request, &mut run).await;
        }

        let digest = build_digest(&run.context, &self.settings.digest);
        let intent = self.intent(&run.context);
        info!(
            novel_id = %request.novel_id,
            chapter = request.chapter_number,
            state = ?run.state,
            steps = run.steps.len(),
            focus = ?intent.primary_focus,
            "planning complete"
        );

        PlanningOutcome {
            final_state: run.state,
            steps: run.steps,
            tool_calls: run.tool_calls,
            directive: run.directive,
            context: run.context,
            digest,
            intent,
        }
    }

    fn base_args(request: &PlanningRequest) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("novelId".to_string(), json!(request.novel_id));
        args.insert("chapterNumber".to_string(), json!(request.chapter_number));
        args
    }

    /// Run a tool and record the call; returns the result on success
    async fn call_tool(
        &self,
        request: &PlanningRequest,
        run: &mut LoopRun,
        tool: &str,
        args: Map<String, Value>,
        origin: CallOrigin,
    ) -> Result<Value, String> {
        let Some(handle) = self.registry.get(tool) else {
            let error = format!("tool '{}' is not registered", tool);
            debug!(tool, "skipping unregistered tool");
            run.tool_calls.push(ToolCall {
                tool: tool.to_string(),
                origin,
                succeeded: false,
                error: Some(error.clone()),
            });
            return Err(error);
        };

        match handle.execute(&Value::Object(args)).await {
            Ok(result) => {
                run.context.tool_results.insert(tool.to_string(), result.clone());
                run.succeeded.insert(tool.to_string());
                run.tool_calls.push(ToolCall {
                    tool: tool.to_string(),
                    origin,
                    succeeded: true,
                    error: None,
                });
                Ok(result)
            }
            Err(e) => {
                warn!(
                    novel_id = %request.novel_id,
                    chapter = request.chapter_number,
                    tool,
                    error = %e,
                    "planning tool failed"
                );
                run.tool_calls.push(ToolCall {
                    tool: tool.to_string(),
                    origin,
                    succeeded: false,
                    error: Some(e.to_string()),
                });
                Err(e.to_string())
            }
        }
    }

    async fn prefetch(&self, request: &PlanningRequest, run: &mut LoopRun) {
        for tool in self.required_tools(request.chapter_number) {
            let _ = self
                .call_tool(request, run, tool, Self::base_args(request), CallOrigin::Prefetch)
                .await;
        }

        match self.content.core_narrative(&request.novel_id).await {
            Ok(summary) => run.context.core_narrative = summary,
            Err(e) => warn!(novel_id = %request.novel_id, error = %e, "core narrative unavailable"),
        }
        match self.content.character_profiles(&request.novel_id).await {
            Ok(profiles) => run.context.character_profiles = profiles,
            Err(e) => warn!(novel_id = %request.novel_id, error = %e, "character profiles unavailable"),
        }
    }

    async fn act(&self, request: &PlanningRequest, run: &mut LoopRun, decision: &Decision) -> String {
        let tool = decision.action.trim();
        // Model args first; the novel is never overridden
        let mut args = Self::base_args(request);
        for (k, v) in &decision.args {
            if k != "novelId" {
                args.insert(k.clone(), v.clone());
            }
        }

        match self.call_tool(request, run, tool, args, CallOrigin::Step).await {
            Ok(result) => {
                self.reflect(request, tool, &result);
                truncate_to_tokens(&result.to_string(), OBSERVATION_TOKENS)
            }
            Err(error) => format!("error: {}", error),
        }
    }

    /// Ask the model to critique a result; the answer is only logged
    fn reflect(&self, request: &PlanningRequest, tool: &str, result: &Value) {
        let messages = vec![
            ChatMessage::system("You review tool results for a fiction planning agent. Answer in two sentences."),
            ChatMessage::user(format!(
                "Chapter {} is being planned. Tool {} returned:\n{}\nHow useful is this for the chapter, and what is missing?",
                request.chapter_number,
                tool,
                truncate_to_tokens(&result.to_string(), REFLECTION_TOKENS)
            )),
        ];
        let client = self.client.clone();
        let config = request.model_config.clone();
        let tool = tool.to_string();
        tokio::spawn(async move {
            match client.generate(&messages, task_tag::REACT_REFLECTION, &config).await {
                Ok(text) => debug!(tool = %tool, reflection = %text.trim(), "tool reflection"),
                Err(e) => debug!(tool = %tool, error = %e, "reflection call failed"),
            }
        });
    }

    async fn fallback(&self, request: &PlanningRequest, run: &mut LoopRun) {
        for tool in FALLBACK_TOOLS {
            if !run.succeeded.contains(*tool) {
                info!(novel_id = %request.novel_id, tool, "forced fallback fetch");
                let _ = self
                    .call_tool(request, run, tool, Self::base_args(request), CallOrigin::Fallback)
                    .await;
            }
        }
    }

    fn step_messages(&self, request: &PlanningRequest, run: &LoopRun, recommended: &[String]) -> Vec<ChatMessage> {
        let system = format!(
            "You plan chapter {} of a serialized novel by gathering context with tools. \
Reply with one JSON object: {{\"reasoning\": \"...\", \"action\": \"<tool name or WRITE>\", \"args\": {{}}}}. \
Choose WRITE once the context is sufficient.",
            request.chapter_number
        );

        let mut prompt = String::new();
        if !request.instruction.trim().is_empty() {
            prompt.push_str(&format!("# Author instruction\n{}\n\n", request.instruction.trim()));
        }

        let digest = build_digest(&run.context, &self.settings.digest);
        prompt.push_str("# Gathered context\n");
        prompt.push_str(if digest.is_empty() { "(nothing yet)" } else { &digest });
        prompt.push_str("\n\n# Tools\n");
        prompt.push_str(&self.registry.describe());
        prompt.push('\n');

        let pending: Vec<&str> = self
            .required_tools(request.chapter_number)
            .into_iter()
            .filter(|t| !run.succeeded.contains(*t) && self.registry.contains(t))
            .collect();
        if !pending.is_empty() {
            prompt.push_str(&format!("\n# Required tools not yet run\n{}\n", pending.join(", ")));
        }

        let suggested: Vec<&str> = recommended
            .iter()
            .map(String::as_str)
            .filter(|t| self.registry.contains(t))
            .collect();
        if !suggested.is_empty() {
            prompt.push_str(&format!("\n# Recommended for this instruction\n{}\n", suggested.join(", ")));
        }

        if !run.steps.is_empty() {
            prompt.push_str("\n# Previous steps\n");
            for s in &run.steps {
                prompt.push_str(&format!(
                    "Step {}: reasoning: {}\naction: {}\nobservation: {}\n",
                    s.step, s.reasoning, s.action, s.observation
                ));
            }
        }

        debug!(
            novel_id = %request.novel_id,
            step = run.steps.len() + 1,
            tokens = estimate_tokens(&prompt),
            "decision prompt built"
        );
        vec![ChatMessage::system(system), ChatMessage::user(prompt)]
    }

    fn intent(&self, context: &GatheredContext) -> ChapterIntent {
        let rhythm: Option<NarrativeRhythm> = context
            .result(tool_name::GET_NARRATIVE_RHYTHM)
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let conflict_arcs = context.entities(tool_name::GET_CONFLICT_ARC_STATUS, "arcs");
        let character_arcs = context.entities(tool_name::GET_CHARACTER_ARC_STATUS, "arcs");
        let perspective = context.entities(tool_name::GET_PERSPECTIVE_HISTORY, "history");
        derive_intent(IntentSignals {
            rhythm: rhythm.as_ref(),
            conflict_arcs: &conflict_arcs,
            character_arcs: &character_arcs,
            perspective: &perspective,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityData, GraphEntity};
    use crate::llm::{MockModelClient, ModelError};
    use crate::planning::content::InMemoryContentSource;
    use crate::planning::intent::PrimaryFocus;
    use crate::storage::MemoryBackend;
    use crate::store::NarrativeStore;

    const NOVEL: &str = "novel-1";

    fn config() -> ModelConfig {
        ModelConfig::new("mock", "planner")
    }

    fn planner(client: MockModelClient) -> (Arc<NarrativeStore>, Arc<MockModelClient>, ChapterPlanner) {
        let store = Arc::new(NarrativeStore::new(Arc::new(MemoryBackend::new())));
        let content: Arc<dyn ContentSource> = Arc::new(
            InMemoryContentSource::new()
                .with_outline(NOVEL, "Lin Chen rises through the Azure Sect.")
                .with_blueprint(NOVEL, json!({"volume": 1, "goal": "enter the sect"})),
        );
        let registry = Arc::new(ToolRegistry::with_builtin(
            store.clone(),
            content.clone(),
            PlanningSettings::default(),
        ));
        let client = Arc::new(client);
        let planner = ChapterPlanner::new(registry, client.clone(), content, PlanningSettings::default());
        (store, client, planner)
    }

    #[tokio::test]
    async fn write_sentinel_ends_loop() {
        let (_, client, planner) = planner(
            MockModelClient::new().with_response(task_tag::REACT_DECISION, r#"{"reasoning": "enough", "action": "WRITE"}"#),
        );
        let outcome = planner.plan(&PlanningRequest::new(NOVEL, 2, config())).await;
        assert_eq!(outcome.final_state, LoopState::WriteReady);
        assert!(outcome.steps.is_empty());
        assert_eq!(client.calls_for(task_tag::REACT_DECISION), 1);
        // Early chapter: base prefetch only
        assert!(outcome.ran(tool_name::GET_OUTLINE));
        assert!(!outcome.tool_calls.iter().any(|c| c.tool == tool_name::GET_NARRATIVE_RHYTHM));
    }

    #[tokio::test]
    async fn late_chapters_prefetch_signal_tools() {
        let (_, _, planner) = planner(MockModelClient::new().with_default_response("WRITE"));
        let outcome = planner.plan(&PlanningRequest::new(NOVEL, 10, config())).await;
        for tool in LATE_PREFETCH {
            assert!(outcome.ran(tool), "{} not prefetched", tool);
        }
        assert!(outcome
            .tool_calls
            .iter()
            .all(|c| c.origin == CallOrigin::Prefetch));
    }

    #[tokio::test]
    async fn early_chapters_get_reduced_budget() {
        let decision = r#"{"reasoning": "check rules", "action": "getWorldRules"}"#;
        let (_, client, planner) = planner(MockModelClient::new().with_default_response(decision));
        let outcome = planner.plan(&PlanningRequest::new(NOVEL, 1, config())).await;
        assert_eq!(outcome.final_state, LoopState::MaxStepsExceeded);
        assert_eq!(outcome.steps.len(), 3);
        assert_eq!(client.calls_for(task_tag::REACT_DECISION), 3);
        assert_eq!(planner.step_budget(10), 6);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_directive() {
        let (_, _, planner) = planner(
            MockModelClient::new()
                .with_response(task_tag::REACT_DECISION, r#"{"action": "make the duel bloodier"}"#)
                .with_default_response("ok"),
        );
        let outcome = planner.plan(&PlanningRequest::new(NOVEL, 5, config())).await;
        assert_eq!(outcome.final_state, LoopState::WriteReady);
        assert_eq!(outcome.directive.as_deref(), Some("make the duel bloodier"));
    }

    #[tokio::test]
    async fn model_error_ends_loop_gracefully() {
        let (_, _, planner) = planner(
            MockModelClient::new().with_failure(task_tag::REACT_DECISION, ModelError::Request("timeout".to_string())),
        );
        let outcome = planner.plan(&PlanningRequest::new(NOVEL, 5, config())).await;
        assert_eq!(outcome.final_state, LoopState::WriteReady);
        assert!(outcome.ran(tool_name::GET_OUTLINE));
    }

    #[tokio::test]
    async fn step_args_are_merged_and_results_recorded() {
        let (store, client, planner) = planner(
            MockModelClient::new()
                .with_response(
                    task_tag::REACT_DECISION,
                    r#"{"reasoning": "combat", "action": "getCharacterStates", "args": {"novelId": "other"}}"#,
                )
                .with_response(task_tag::REACT_DECISION, "action: WRITE")
                .with_default_response("ok"),
        );
        store
            .upsert_character_state(
                NOVEL,
                4,
                &crate::graph::CharacterStateDelta::for_character("Lin Chen").with_location("Sect Gate"),
            )
            .unwrap();

        let outcome = planner
            .plan(&PlanningRequest::new(NOVEL, 5, config()).with_instruction("写一场战斗"))
            .await;
        assert_eq!(outcome.steps.len(), 1);
        let states = outcome.context.result(tool_name::GET_CHARACTER_STATES).unwrap();
        assert_eq!(states["characters"][0]["character_name"], "Lin Chen");

        let decisions: Vec<_> = client
            .calls()
            .into_iter()
            .filter(|c| c.task_tag == task_tag::REACT_DECISION)
            .collect();
        assert_eq!(decisions.len(), 2);
        let second_prompt = &decisions[1].messages[1].content;
        assert!(second_prompt.contains("# Recommended for this instruction"));
        assert!(second_prompt.contains("Step 1: reasoning: combat"));
    }

    #[tokio::test]
    async fn active_conflict_arc_drives_intent() {
        let (store, _, planner) = planner(MockModelClient::new().with_default_response("WRITE"));
        store
            .add_entity(&GraphEntity::new(
                "ca-war",
                NOVEL,
                6,
                EntityData::ConflictArc {
                    name: "sect war".to_string(),
                    stage: "rising".to_string(),
                    progress: 1,
                    total_beats: 5,
                    urgency: 0.9,
                    next_action: Some("the envoy is ambushed".to_string()),
                    parties: vec![],
                },
            ))
            .unwrap();
        let outcome = planner.plan(&PlanningRequest::new(NOVEL, 8, config())).await;
        assert_eq!(outcome.intent.primary_focus, PrimaryFocus::ConflictEscalation);
        assert_eq!(outcome.intent.focus_notes[0], "sect war: the envoy is ambushed");
    }
}
