//! Ranking policies over narrative entities
//!
//! Pure functions over already-loaded entities and relations, so both
//! storage backends rank identically.

mod arcs;
mod events;
mod foreshadow;
mod perspective;
mod plotline;
mod rhythm;

pub use arcs::{active_character_arcs, active_conflict_arcs, is_terminal_stage, next_action};
pub use events::{
    causal_neighborhood, graph_weight, rank_relevant_events, recency_score, GRAPH_RADIUS,
    IMPORTANCE_WEIGHT,
};
pub use foreshadow::rank_unresolved_foreshadowing;
pub use perspective::{perspective_history, DOMINANCE_RUN, RECOMMENDATION_SOURCE};
pub use plotline::{
    plotline_reports, stale_plotlines, PlotlineReport, MIN_SUPPORTING_EVENTS, STALE_IDLE_CHAPTERS,
};
pub use rhythm::{
    analyze_rhythm, classify_beat, BeatClass, BeatSample, NarrativeRhythm, FATIGUE_RUN,
    MIN_CHARACTER_RATIO, MIN_PLOT_RATIO,
};
