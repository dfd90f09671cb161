//! Unresolved foreshadowing

use crate::graph::{EntityData, ForeshadowStatus, GraphEntity};

/// Foreshadows still open when planning `current_chapter`, highest tier
/// first and oldest first within a tier.
///
/// `relevance_score` is set to the tier rank.
pub fn rank_unresolved_foreshadowing(
    items: &[GraphEntity],
    current_chapter: u32,
    limit: usize,
) -> Vec<GraphEntity> {
    let mut open: Vec<(u8, GraphEntity)> = items
        .iter()
        .filter(|e| e.chapter_number < current_chapter)
        .filter_map(|e| match &e.data {
            EntityData::Foreshadowing { tier, status, .. } if *status != ForeshadowStatus::Revealed => {
                Some((tier.rank(), e.clone().with_score(f64::from(tier.rank()))))
            }
            _ => None,
        })
        .collect();

    open.sort_by(|(ra, a), (rb, b)| {
        rb.cmp(ra)
            .then_with(|| a.chapter_number.cmp(&b.chapter_number))
            .then_with(|| a.id.cmp(&b.id))
    });
    open.into_iter().take(limit).map(|(_, e)| e).collect()
}
