//! Plotline status and staleness

use crate::graph::{EntityData, GraphEntity, PlotlineStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A plotline idle for more than this many chapters is stale
pub const STALE_IDLE_CHAPTERS: u32 = 5;

/// A plotline with fewer supporting events than this is stale
pub const MIN_SUPPORTING_EVENTS: usize = 3;

/// Derived status of a single plotline at a given chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotlineReport {
    pub plotline_id: String,
    pub name: String,
    pub priority: f64,
    pub status: PlotlineStatus,
    pub last_touched_chapter: u32,
    pub idle_chapters: u32,
    pub event_count: usize,
    pub stale: bool,
}

fn references(event_plotline: &str, id: &str, name: &str) -> bool {
    event_plotline == id || event_plotline.eq_ignore_ascii_case(name)
}

/// Build a report per plotline (latest record per name wins).
///
/// `last_touched_chapter` is the most recent chapter among the plotline's own
/// record and the events referencing it, restricted to `current_chapter`.
pub fn plotline_reports(
    plotlines: &[GraphEntity],
    events: &[GraphEntity],
    current_chapter: u32,
) -> Vec<PlotlineReport> {
    let mut latest: HashMap<String, &GraphEntity> = HashMap::new();
    for entity in plotlines {
        let EntityData::Plotline { name, .. } = &entity.data else {
            continue;
        };
        let key = name.to_lowercase();
        match latest.get(&key) {
            Some(existing) if existing.chapter_number > entity.chapter_number => {}
            _ => {
                latest.insert(key, entity);
            }
        }
    }

    let mut reports: Vec<PlotlineReport> = latest
        .into_values()
        .filter_map(|entity| {
            let EntityData::Plotline {
                name,
                priority,
                status,
                ..
            } = &entity.data
            else {
                return None;
            };

            let mut event_count = 0;
            let mut last_touched = entity.chapter_number.min(current_chapter);
            for event in events {
                let EntityData::Event {
                    plotline: Some(target),
                    ..
                } = &event.data
                else {
                    continue;
                };
                if event.chapter_number <= current_chapter && references(target, &entity.id, name) {
                    event_count += 1;
                    last_touched = last_touched.max(event.chapter_number);
                }
            }

            let idle = current_chapter.saturating_sub(last_touched);
            let stale = *status != PlotlineStatus::Resolved
                && (idle > STALE_IDLE_CHAPTERS || event_count < MIN_SUPPORTING_EVENTS);

            Some(PlotlineReport {
                plotline_id: entity.id.clone(),
                name: name.clone(),
                priority: *priority,
                status: *status,
                last_touched_chapter: last_touched,
                idle_chapters: idle,
                event_count,
                stale,
            })
        })
        .collect();

    reports.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then_with(|| b.idle_chapters.cmp(&a.idle_chapters))
            .then_with(|| a.name.cmp(&b.name))
    });
    reports
}

/// Stale plotlines only, priority desc then idle desc
pub fn stale_plotlines(
    plotlines: &[GraphEntity],
    events: &[GraphEntity],
    current_chapter: u32,
    limit: usize,
) -> Vec<PlotlineReport> {
    plotline_reports(plotlines, events, current_chapter)
        .into_iter()
        .filter(|r| r.stale)
        .take(limit)
        .collect()
}
