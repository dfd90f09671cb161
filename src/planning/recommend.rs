//! Keyword rule table mapping instruction text to likely-useful tools

use super::tools::tool_name;

#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRule {
    /// Matched case-insensitively as substrings
    pub keywords: Vec<String>,
    pub tools: Vec<String>,
}

/// Ordered rules; earlier rules contribute their tools first
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRules {
    rules: Vec<RecommendationRule>,
}

impl RecommendationRules {
    /// A table with no rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, keywords: &[&str], tools: &[&str]) -> Self {
        self.rules.push(RecommendationRule {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    pub fn rules(&self) -> &[RecommendationRule] {
        &self.rules
    }

    /// Tools suggested by `instruction`, deduplicated in rule order
    pub fn recommend(&self, instruction: &str) -> Vec<String> {
        let text = instruction.to_lowercase();
        let mut out: Vec<String> = Vec::new();
        for rule in &self.rules {
            if rule.keywords.iter().any(|k| text.contains(k.as_str())) {
                for tool in &rule.tools {
                    if !out.contains(tool) {
                        out.push(tool.clone());
                    }
                }
            }
        }
        out
    }
}

impl Default for RecommendationRules {
    fn default() -> Self {
        use tool_name::*;
        Self::empty()
            .with_rule(
                &["战斗", "打斗", "对决", "交手", "battle", "fight", "combat", "duel"],
                &[GET_CONFLICT_ARC_STATUS, GET_CHARACTER_STATES, GET_NARRATIVE_RHYTHM],
            )
            .with_rule(
                &["揭秘", "真相", "秘密", "揭露", "reveal", "secret", "mystery", "truth"],
                &[GET_UNRESOLVED_FORESHADOWING, GET_CAUSAL_CHAIN],
            )
            .with_rule(&["伏笔", "foreshadow"], &[GET_UNRESOLVED_FORESHADOWING])
            .with_rule(
                &["感情", "关系", "恋", "romance", "relationship", "friendship"],
                &[GET_CHARACTER_STATES, GET_CHARACTER_ARC_STATUS],
            )
            .with_rule(&["成长", "突破", "growth", "breakthrough"], &[GET_CHARACTER_ARC_STATUS])
            .with_rule(&["视角", "pov", "perspective", "viewpoint"], &[GET_PERSPECTIVE_HISTORY])
            .with_rule(&["节奏", "pacing", "rhythm"], &[GET_NARRATIVE_RHYTHM])
            .with_rule(&["主线", "支线", "plotline", "subplot"], &[GET_PLOTLINE_STATUS])
            .with_rule(&["设定", "规则", "world rule", "magic system"], &[GET_WORLD_RULES])
    }
}
