//! Relevant-event ranking
//!
//! score = 1/(current − chapter + 1) + graph weight + importance·20
//!
//! The graph weight rewards events within a bounded radius of an anchor
//! (an event from the current or immediately preceding chapter that has at
//! least one relation). Without an anchor, the most recent events win.

use crate::graph::{EntityKind, GraphEntity, GraphRelation};
use std::collections::{HashMap, HashSet, VecDeque};

/// Maximum hop distance from an anchor that still earns a graph weight
pub const GRAPH_RADIUS: usize = 3;

/// Weight multiplier applied to normalized importance
pub const IMPORTANCE_WEIGHT: f64 = 20.0;

/// Recency proximity term: 1 for the current chapter, decaying with distance
pub fn recency_score(current_chapter: u32, event_chapter: u32) -> f64 {
    let distance = current_chapter.saturating_sub(event_chapter) as f64;
    1.0 / (distance + 1.0)
}

/// Graph term for an event `hops` away from the nearest anchor
pub fn graph_weight(hops: Option<usize>) -> f64 {
    match hops {
        Some(d) if d <= GRAPH_RADIUS => 1.0 / (d as f64 + 1.0),
        _ => 0.0,
    }
}

/// Undirected adjacency over every relation, keyed by entity id
struct Adjacency<'a> {
    neighbors: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> Adjacency<'a> {
    fn build(relations: &'a [GraphRelation]) -> Self {
        let mut neighbors: HashMap<&'a str, Vec<&'a str>> = HashMap::new();
        for rel in relations {
            neighbors.entry(&rel.from_id).or_default().push(&rel.to_id);
            neighbors.entry(&rel.to_id).or_default().push(&rel.from_id);
        }
        Self { neighbors }
    }

    fn has_edges(&self, id: &str) -> bool {
        self.neighbors.get(id).is_some_and(|n| !n.is_empty())
    }

    /// Multi-source BFS bounded by `radius`
    fn distances_from(&self, anchors: &[&'a str], radius: usize) -> HashMap<&'a str, usize> {
        let mut dist: HashMap<&'a str, usize> = HashMap::new();
        let mut queue: VecDeque<&'a str> = VecDeque::new();
        for &anchor in anchors {
            if dist.insert(anchor, 0).is_none() {
                queue.push_back(anchor);
            }
        }

        while let Some(id) = queue.pop_front() {
            let d = dist[id];
            if d >= radius {
                continue;
            }
            let Some(next) = self.neighbors.get(id) else {
                continue;
            };
            for &neighbor in next {
                if !dist.contains_key(neighbor) {
                    dist.insert(neighbor, d + 1);
                    queue.push_back(neighbor);
                }
            }
        }
        dist
    }
}

/// Rank events for planning `current_chapter`.
///
/// Only events introduced at or before `current_chapter` are considered.
/// Every returned entity carries its `relevance_score`.
pub fn rank_relevant_events(
    events: &[GraphEntity],
    relations: &[GraphRelation],
    current_chapter: u32,
    limit: usize,
) -> Vec<GraphEntity> {
    let candidates: Vec<&GraphEntity> = events
        .iter()
        .filter(|e| e.kind() == EntityKind::Event && e.chapter_number <= current_chapter)
        .collect();

    let adjacency = Adjacency::build(relations);
    let anchor_floor = current_chapter.saturating_sub(1);
    let anchors: Vec<&str> = candidates
        .iter()
        .filter(|e| e.chapter_number >= anchor_floor && adjacency.has_edges(&e.id))
        .map(|e| e.id.as_str())
        .collect();

    let base_score =
        |e: &GraphEntity| recency_score(current_chapter, e.chapter_number) + e.importance() * IMPORTANCE_WEIGHT;

    if anchors.is_empty() {
        let mut recent: Vec<GraphEntity> = candidates
            .into_iter()
            .map(|e| e.clone().with_score(base_score(e)))
            .collect();
        recent.sort_by(|a, b| {
            b.chapter_number
                .cmp(&a.chapter_number)
                .then_with(|| b.importance().total_cmp(&a.importance()))
                .then_with(|| a.id.cmp(&b.id))
        });
        recent.truncate(limit);
        return recent;
    }

    let distances = adjacency.distances_from(&anchors, GRAPH_RADIUS);
    let mut scored: Vec<GraphEntity> = candidates
        .into_iter()
        .map(|e| {
            let hops = distances.get(e.id.as_str()).copied();
            e.clone().with_score(base_score(e) + graph_weight(hops))
        })
        .collect();

    scored.sort_by(|a, b| {
        let sa = a.relevance_score.unwrap_or_default();
        let sb = b.relevance_score.unwrap_or_default();
        sb.total_cmp(&sa)
            .then_with(|| b.chapter_number.cmp(&a.chapter_number))
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(limit);
    scored
}

/// Entities reachable from `origin` within `radius` hops, with their distance
pub fn causal_neighborhood<'a>(
    origin: &str,
    relations: &'a [GraphRelation],
    radius: usize,
) -> Vec<(&'a str, usize)> {
    let adjacency = Adjacency::build(relations);
    let Some((&origin, _)) = adjacency.neighbors.get_key_value(origin) else {
        return Vec::new();
    };
    let mut reached: Vec<(&'a str, usize)> = adjacency
        .distances_from(&[origin], radius)
        .into_iter()
        .filter(|(_, d)| *d > 0)
        .collect();
    reached.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    let mut seen = HashSet::new();
    reached.retain(|(id, _)| seen.insert(*id));
    reached
}
