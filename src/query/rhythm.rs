//! Narrative rhythm analysis over recent beats

use crate::graph::{EntityData, GraphEntity};
use serde::{Deserialize, Serialize};

/// Coarse classification of a narrative beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeatClass {
    Conflict,
    Climax,
    Plot,
    Character,
    Relief,
    Setup,
    Unknown,
}

impl BeatClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conflict => "CONFLICT",
            Self::Climax => "CLIMAX",
            Self::Plot => "PLOT",
            Self::Character => "CHARACTER",
            Self::Relief => "RELIEF",
            Self::Setup => "SETUP",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// High-tension classes that count toward conflict fatigue
    pub fn is_high_tension(&self) -> bool {
        matches!(self, Self::Conflict | Self::Climax)
    }
}

impl std::fmt::Display for BeatClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword table, checked in order; the first class with a hit wins
const KEYWORDS: &[(BeatClass, &[&str])] = &[
    (
        BeatClass::Climax,
        &["climax", "showdown", "finale", "高潮", "决战", "巅峰"],
    ),
    (
        BeatClass::Conflict,
        &[
            "conflict", "battle", "fight", "combat", "duel", "ambush", "confront", "冲突", "战斗",
            "对决", "交锋", "危机", "追杀", "争斗",
        ],
    ),
    (
        BeatClass::Plot,
        &[
            "plot", "reveal", "discover", "twist", "mystery", "investigat", "推进", "揭秘", "剧情",
            "转折", "发现", "线索",
        ],
    ),
    (
        BeatClass::Character,
        &[
            "character", "emotion", "growth", "bond", "romance", "introspect", "人物", "情感",
            "成长", "羁绊", "内心",
        ],
    ),
    (
        BeatClass::Relief,
        &[
            "relief", "respite", "daily", "humor", "comic", "breather", "舒缓", "日常", "轻松", "休整",
            "温馨",
        ],
    ),
    (
        BeatClass::Setup,
        &["setup", "set-up", "foreshadow", "prepar", "铺垫", "伏笔", "准备", "引入"],
    ),
];

fn match_keywords(text: &str) -> BeatClass {
    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(class, _)| *class)
        .unwrap_or(BeatClass::Unknown)
}

/// Classify a beat from its type and tags, falling back to its summary
pub fn classify_beat(beat_type: &str, tags: &[String], summary: Option<&str>) -> BeatClass {
    let mut labelled = String::from(beat_type);
    for tag in tags {
        labelled.push(' ');
        labelled.push_str(tag);
    }
    match match_keywords(&labelled) {
        BeatClass::Unknown => summary.map(match_keywords).unwrap_or(BeatClass::Unknown),
        class => class,
    }
}

/// One classified beat in the analysis window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatSample {
    pub chapter_number: u32,
    pub class: BeatClass,
}

/// Ratios and fatigue signal over the last `window` beats
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeRhythm {
    /// Oldest first
    pub beats: Vec<BeatSample>,
    pub conflict_ratio: f64,
    pub climax_ratio: f64,
    pub plot_ratio: f64,
    pub character_ratio: f64,
    pub relief_ratio: f64,
    pub setup_ratio: f64,
    /// Length of the trailing high-tension run, newest first
    pub consecutive_conflict: usize,
    pub conflict_fatigue: bool,
    pub recommendations: Vec<String>,
}

pub const FATIGUE_RUN: usize = 3;
pub const MIN_PLOT_RATIO: f64 = 0.3;
pub const MIN_CHARACTER_RATIO: f64 = 0.2;

impl NarrativeRhythm {
    /// Analyze already-classified beats, oldest first
    pub fn from_classes(samples: Vec<BeatSample>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let total = samples.len() as f64;
        let ratio = |class: BeatClass| samples.iter().filter(|s| s.class == class).count() as f64 / total;

        let consecutive_conflict = samples
            .iter()
            .rev()
            .take_while(|s| s.class.is_high_tension())
            .count();
        let conflict_fatigue = consecutive_conflict >= FATIGUE_RUN;

        let mut rhythm = Self {
            conflict_ratio: ratio(BeatClass::Conflict),
            climax_ratio: ratio(BeatClass::Climax),
            plot_ratio: ratio(BeatClass::Plot),
            character_ratio: ratio(BeatClass::Character),
            relief_ratio: ratio(BeatClass::Relief),
            setup_ratio: ratio(BeatClass::Setup),
            consecutive_conflict,
            conflict_fatigue,
            recommendations: Vec::new(),
            beats: samples,
        };

        if rhythm.plot_ratio < MIN_PLOT_RATIO {
            rhythm
                .recommendations
                .push("Plot progress is thin; advance a main plotline or reveal new information".to_string());
        }
        if rhythm.character_ratio < MIN_CHARACTER_RATIO {
            rhythm
                .recommendations
                .push("Character beats are scarce; give a character room for emotion or growth".to_string());
        }
        if rhythm.conflict_fatigue {
            rhythm.recommendations.push(format!(
                "{} consecutive high-tension beats; schedule a relief or character chapter",
                rhythm.consecutive_conflict
            ));
        }
        rhythm
    }

    /// Class of the newest beat, if any
    pub fn latest(&self) -> Option<BeatClass> {
        self.beats.last().map(|s| s.class)
    }
}

/// Analyze the last `window` narrative beats.
///
/// `beats` may arrive in any order; they are sorted by chapter first.
pub fn analyze_rhythm(beats: &[GraphEntity], window: usize) -> NarrativeRhythm {
    let mut ordered: Vec<&GraphEntity> = beats.iter().collect();
    ordered.sort_by(|a, b| a.chapter_number.cmp(&b.chapter_number).then_with(|| a.id.cmp(&b.id)));

    let samples: Vec<BeatSample> = ordered
        .into_iter()
        .filter_map(|e| match &e.data {
            EntityData::NarrativeBeat {
                beat_type,
                tags,
                summary,
                ..
            } => Some(BeatSample {
                chapter_number: e.chapter_number,
                class: classify_beat(beat_type, tags, summary.as_deref()),
            }),
            _ => None,
        })
        .collect();

    let skip = samples.len().saturating_sub(window);
    NarrativeRhythm::from_classes(samples.into_iter().skip(skip).collect())
}
