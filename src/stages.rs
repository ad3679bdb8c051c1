//! Conversation stages
//!
//! A stage is a scripted phase of the conversation with its own keyword
//! triggers and model instruction. Stage selection is a pure function of the
//! utterance, the stage table and the current stage number.

use serde::{Deserialize, Serialize};

/// A scripted phase of conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage number (1-based, not necessarily contiguous)
    pub stage_number: u32,

    /// Keywords that move the conversation into this stage
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Spoken confirmation when entering this stage
    #[serde(default)]
    pub transition_text: String,

    /// Instruction sent to the model while in this stage
    #[serde(default)]
    pub speech_prompt: String,
}

impl Stage {
    /// Whether any keyword occurs in the (already lower-cased) text
    fn matches(&self, lower_text: &str) -> bool {
        self.keywords.iter().any(|keyword| {
            let keyword = keyword.to_lowercase();
            if keyword.is_empty() {
                return false;
            }
            let hit = lower_text.contains(&keyword);
            if hit {
                tracing::trace!(keyword, stage = self.stage_number, "keyword matched");
            }
            hit
        })
    }
}

/// Find a stage by number
#[must_use]
pub fn find_stage(stages: &[Stage], stage_number: u32) -> Option<&Stage> {
    stages.iter().find(|s| s.stage_number == stage_number)
}

/// Pick the next stage for an utterance
///
/// Every stage with at least one keyword contained in the lower-cased text is
/// a candidate; the candidate with the highest stage number wins. With no
/// candidates the current stage is kept, falling back to the first stage in
/// the table when the current number is unknown. Returns `None` only for an
/// empty table.
#[must_use]
pub fn determine_stage<'a>(text: &str, stages: &'a [Stage], current_stage: u32) -> Option<&'a Stage> {
    let lower = text.to_lowercase();

    let best = stages
        .iter()
        .filter(|stage| stage.matches(&lower))
        .max_by_key(|stage| stage.stage_number);

    if let Some(stage) = best {
        tracing::debug!(stage = stage.stage_number, "stage selected by keywords");
        return Some(stage);
    }

    tracing::debug!(current_stage, "no keyword matched, keeping current stage");
    find_stage(stages, current_stage).or_else(|| stages.first())
}

/// Marker tokens recognised in a spoken "go to stage N" command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandMarkers {
    /// Stems meaning "transition" (any must occur in the utterance)
    pub transition: Vec<String>,

    /// Stems meaning "stage"; the numeral must follow one of them
    pub stage: Vec<String>,

    /// Highest stage number a command may request
    pub max_stage: u32,
}

impl Default for CommandMarkers {
    fn default() -> Self {
        Self {
            transition: vec![
                "переход".to_string(),
                "перейд".to_string(),
                "transition".to_string(),
            ],
            stage: vec!["этап".to_string(), "stage".to_string()],
            max_stage: 5,
        }
    }
}

/// Parse a forced stage jump out of an utterance
///
/// The utterance must contain a transition stem, and some word must be
/// exactly a stage stem followed, after whitespace only, by a word starting
/// with a digit in `1..=max_stage`. Only the leading digit is read, so
/// "этап 35" asks for 3 while "этапу 2" or "этап №3" are not commands.
#[must_use]
pub fn parse_stage_command(text: &str, markers: &CommandMarkers) -> Option<u32> {
    let lower = text.to_lowercase();

    let has_transition = markers
        .transition
        .iter()
        .any(|stem| !stem.is_empty() && lower.contains(&stem.to_lowercase()));
    if !has_transition {
        return None;
    }

    let words: Vec<&str> = lower.split_whitespace().collect();
    let requested = words.windows(2).find_map(|pair| {
        let word = pair[0].trim_start_matches(|c: char| !c.is_alphanumeric());
        let is_stage_word = markers
            .stage
            .iter()
            .any(|stem| !stem.is_empty() && word == stem.to_lowercase());
        if !is_stage_word {
            return None;
        }
        pair[1].chars().next()?.to_digit(10)
    })?;

    (1..=markers.max_stage).contains(&requested).then_some(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(n: u32, keywords: &[&str]) -> Stage {
        Stage {
            stage_number: n,
            keywords: keywords.iter().map(ToString::to_string).collect(),
            transition_text: format!("entering stage {n}"),
            speech_prompt: format!("prompt {n}"),
        }
    }

    fn table() -> Vec<Stage> {
        vec![
            stage(1, &["привет", "hello"]),
            stage(2, &["цена", "price"]),
            stage(3, &["доставка", "delivery"]),
            stage(5, &["спасибо", "bye"]),
        ]
    }

    #[test]
    fn test_highest_matching_stage_wins() {
        let stages = table();
        let picked = determine_stage("Hello, what is the price?", &stages, 1).unwrap();
        assert_eq!(picked.stage_number, 2);

        let picked = determine_stage("price and delivery please", &stages, 1).unwrap();
        assert_eq!(picked.stage_number, 3);
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let stages = table();
        let picked = determine_stage("КАКАЯ ЦЕНА?", &stages, 1).unwrap();
        assert_eq!(picked.stage_number, 2);

        let stages = vec![stage(1, &[]), stage(2, &["Delivery"])];
        let picked = determine_stage("delivery", &stages, 1).unwrap();
        assert_eq!(picked.stage_number, 2);
    }

    #[test]
    fn test_no_match_keeps_current_stage() {
        let stages = table();
        let picked = determine_stage("nothing relevant", &stages, 3).unwrap();
        assert_eq!(picked.stage_number, 3);
    }

    #[test]
    fn test_unknown_current_stage_falls_back_to_first() {
        let stages = table();
        let picked = determine_stage("nothing relevant", &stages, 4).unwrap();
        assert_eq!(picked.stage_number, 1);
    }

    #[test]
    fn test_empty_table_yields_none() {
        assert!(determine_stage("hello", &[], 1).is_none());
    }

    #[test]
    fn test_matched_stage_may_move_backwards() {
        let stages = table();
        let picked = determine_stage("hello again", &stages, 5).unwrap();
        assert_eq!(picked.stage_number, 1);
    }

    #[test]
    fn test_empty_keyword_never_matches() {
        let stages = vec![stage(1, &[]), stage(2, &[""])];
        let picked = determine_stage("anything", &stages, 1).unwrap();
        assert_eq!(picked.stage_number, 1);
    }

    #[test]
    fn test_stage_command_russian() {
        let markers = CommandMarkers::default();
        assert_eq!(parse_stage_command("давай перейдем на этап 3", &markers), Some(3));
        assert_eq!(parse_stage_command("Переход на ЭТАП 5", &markers), Some(5));
        assert_eq!(parse_stage_command("перейдем на этап   4.", &markers), Some(4));
    }

    #[test]
    fn test_stage_command_english() {
        let markers = CommandMarkers::default();
        assert_eq!(parse_stage_command("transition to stage 2", &markers), Some(2));
    }

    #[test]
    fn test_stage_command_requires_both_markers() {
        let markers = CommandMarkers::default();
        assert_eq!(parse_stage_command("этап 3", &markers), None);
        assert_eq!(parse_stage_command("переход 3", &markers), None);
    }

    #[test]
    fn test_stage_command_bounds() {
        let markers = CommandMarkers::default();
        assert_eq!(parse_stage_command("переход на этап 0", &markers), None);
        assert_eq!(parse_stage_command("переход на этап 7", &markers), None);
        assert_eq!(parse_stage_command("переход на этап 35", &markers), Some(3));
        assert_eq!(parse_stage_command("переход на этап три", &markers), None);
        assert_eq!(parse_stage_command("переходим к этапу 2", &markers), None);
        assert_eq!(parse_stage_command("переход на этап №3", &markers), None);
        assert_eq!(parse_stage_command("transition to stages 2", &markers), None);
        assert_eq!(parse_stage_command("переход на этап,3", &markers), None);
    }
}
