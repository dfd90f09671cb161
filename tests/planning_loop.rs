//! Planning loop runs against a scripted model, a flaky content source
//! and a host-registered tool

mod common;

use async_trait::async_trait;
use common::{memory_store, model_config, NOVEL};
use novelgraph::llm::task_tag;
use novelgraph::planning::{
    tool_name, CallOrigin, ChapterText, CharacterProfile, InMemoryContentSource, ToolError,
};
use novelgraph::{
    ChapterPlanner, ContentSource, LoopState, MockModelClient, PlanningRequest, PlanningSettings,
    PlanningTool, ToolRegistry,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const OUTLINE: &str = "Lin Chen rises from outer disciple to sect master.";

/// Content source whose first outline request fails
struct FlakyOutline {
    inner: InMemoryContentSource,
    outline_calls: AtomicUsize,
}

impl FlakyOutline {
    fn new() -> Self {
        let inner = InMemoryContentSource::new()
            .with_outline(NOVEL, OUTLINE)
            .with_blueprint(NOVEL, json!({"volume": 1, "goal": "Enter the inner sect"}))
            .with_chapter(NOVEL, ChapterText::new(1, "The Gate").with_summary("Lin Chen arrives."))
            .with_core_narrative(NOVEL, "An orphan seeks the truth about his clan.")
            .with_profile(
                NOVEL,
                CharacterProfile {
                    name: "Lin Chen".to_string(),
                    role: Some("protagonist".to_string()),
                    highlights: vec!["stubborn".to_string()],
                },
            );
        Self {
            inner,
            outline_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentSource for FlakyOutline {
    async fn outline(&self, novel_id: &str) -> Result<Option<String>, ToolError> {
        if self.outline_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ToolError::Unavailable("outline service warming up".to_string()));
        }
        self.inner.outline(novel_id).await
    }

    async fn volume_blueprint(&self, novel_id: &str, chapter_number: u32) -> Result<Option<Value>, ToolError> {
        self.inner.volume_blueprint(novel_id, chapter_number).await
    }

    async fn recent_chapters(
        &self,
        novel_id: &str,
        chapter_number: u32,
        window: usize,
    ) -> Result<Vec<ChapterText>, ToolError> {
        self.inner.recent_chapters(novel_id, chapter_number, window).await
    }

    async fn core_narrative(&self, novel_id: &str) -> Result<Option<String>, ToolError> {
        self.inner.core_narrative(novel_id).await
    }

    async fn character_profiles(&self, novel_id: &str) -> Result<Vec<CharacterProfile>, ToolError> {
        self.inner.character_profiles(novel_id).await
    }
}

/// Host tool that records the arguments it was called with
#[derive(Default)]
struct Timeline {
    seen: Mutex<Vec<Value>>,
}

#[async_trait]
impl PlanningTool for Timeline {
    fn name(&self) -> &str {
        "getTimeline"
    }

    fn description(&self) -> &str {
        "Dated timeline of the current volume"
    }

    async fn execute(&self, args: &Value) -> Result<Value, ToolError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(args.clone());
        }
        Ok(json!({"timeline": ["Year 1: Lin Chen joins the sect"]}))
    }
}

fn decision(action: &str, args: Value) -> String {
    json!({"reasoning": format!("checking {}", action), "action": action, "args": args}).to_string()
}

fn planner(client: Arc<MockModelClient>, timeline: Arc<Timeline>) -> ChapterPlanner {
    let content: Arc<dyn ContentSource> = Arc::new(FlakyOutline::new());
    let settings = PlanningSettings::default();
    let mut registry = ToolRegistry::with_builtin(memory_store(), content.clone(), settings.clone());
    registry.register(timeline);
    ChapterPlanner::new(Arc::new(registry), client, content, settings)
}

#[tokio::test]
async fn exhausted_budget_forces_the_outline_fetch() {
    let client = Arc::new(
        MockModelClient::new()
            .with_response(
                task_tag::REACT_DECISION,
                decision("getTimeline", json!({"span": "volume", "novelId": "someone-else"})),
            )
            .with_response(task_tag::REACT_DECISION, decision(tool_name::GET_WORLD_RULES, json!({})))
            .with_response(task_tag::REACT_DECISION, decision("getTimeline", json!({})))
            .with_default_response("Useful; nothing missing."),
    );
    let timeline = Arc::new(Timeline::default());
    let planner = planner(client.clone(), timeline.clone());

    // Chapter 2 is early, so the budget is the early cap
    assert_eq!(planner.step_budget(2), 3);
    let outcome = planner.plan(&PlanningRequest::new(NOVEL, 2, model_config())).await;

    assert_eq!(outcome.final_state, LoopState::MaxStepsExceeded);
    assert_eq!(outcome.steps.len(), 3);
    assert_eq!(outcome.directive, None);
    assert_eq!(client.calls_for(task_tag::REACT_DECISION), 3);

    let outline_calls: Vec<_> = outcome
        .tool_calls
        .iter()
        .filter(|c| c.tool == tool_name::GET_OUTLINE)
        .collect();
    assert_eq!(outline_calls.len(), 2);
    assert_eq!(outline_calls[0].origin, CallOrigin::Prefetch);
    assert!(!outline_calls[0].succeeded);
    assert_eq!(outline_calls[1].origin, CallOrigin::Fallback);
    assert!(outline_calls[1].succeeded);

    // The blueprint already succeeded during prefetch
    assert!(!outcome
        .tool_calls
        .iter()
        .any(|c| c.tool == tool_name::GET_VOLUME_BLUEPRINT && c.origin == CallOrigin::Fallback));
    assert!(outcome.ran(tool_name::GET_OUTLINE));
    assert!(outcome.digest.contains(OUTLINE));

    let seen = timeline.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0]["novelId"], NOVEL);
    assert_eq!(seen[0]["chapterNumber"], 2);
    assert_eq!(seen[0]["span"], "volume");
}

#[tokio::test]
async fn write_decision_skips_the_fallback() {
    let client = Arc::new(
        MockModelClient::new()
            .with_response(task_tag::REACT_DECISION, decision("WRITE", json!({})))
            .with_default_response("ok"),
    );
    let planner = planner(client, Arc::new(Timeline::default()));
    let outcome = planner.plan(&PlanningRequest::new(NOVEL, 2, model_config())).await;

    assert_eq!(outcome.final_state, LoopState::WriteReady);
    assert!(outcome.steps.is_empty());
    // The failed prefetch is not retried when the model chose to write
    assert!(!outcome.ran(tool_name::GET_OUTLINE));
    assert!(outcome
        .tool_calls
        .iter()
        .all(|c| c.origin == CallOrigin::Prefetch));
    assert!(outcome.ran(tool_name::GET_VOLUME_BLUEPRINT));
    assert_eq!(
        outcome.context.core_narrative.as_deref(),
        Some("An orphan seeks the truth about his clan.")
    );
    assert_eq!(outcome.context.character_profiles.len(), 1);
}

#[tokio::test]
async fn later_chapters_prefetch_story_signals() {
    let client = Arc::new(MockModelClient::new().with_default_response(decision("WRITE", json!({}))));
    let planner = planner(client, Arc::new(Timeline::default()));
    let request = PlanningRequest::new(NOVEL, 12, model_config()).with_instruction("一场大战");
    let outcome = planner.plan(&request).await;

    assert_eq!(outcome.final_state, LoopState::WriteReady);
    for tool in [
        tool_name::GET_UNRESOLVED_FORESHADOWING,
        tool_name::GET_NARRATIVE_RHYTHM,
        tool_name::GET_PLOTLINE_STATUS,
        tool_name::GET_CONFLICT_ARC_STATUS,
        tool_name::GET_CHARACTER_ARC_STATUS,
        tool_name::GET_PERSPECTIVE_HISTORY,
    ] {
        assert!(outcome.ran(tool), "{} should be prefetched", tool);
    }
    assert!(!outcome.ran("getTimeline"));
}
