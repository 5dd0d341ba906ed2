use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuessError {
    #[error("Guess must not be empty")]
    Empty,
    #[error("Guess is longer than {max} characters")]
    TooLong { max: usize },
}

/// Trims the guess and collapses whitespace runs, so "pop  pop " and
/// "pop pop" land in the same group. Length is counted in characters.
pub fn normalize_guess(raw: &str, max_chars: usize) -> Result<String, GuessError> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(GuessError::Empty);
    }
    if normalized.chars().count() > max_chars {
        return Err(GuessError::TooLong { max: max_chars });
    }
    Ok(normalized)
}

/// All players who submitted exactly the same text this turn, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionGroup {
    pub text: String,
    pub contributors: Vec<Uuid>,
}

/// Client-facing form of a group, with contributor display names.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubmissionGroupView {
    pub text: String,
    pub contributors: Vec<String>,
}

/// Collects one turn's guesses. Each player contributes at most once.
#[derive(Debug, Default, Clone)]
pub struct SubmissionAggregator {
    groups: Vec<SubmissionGroup>,
    index_by_text: HashMap<String, usize>,
    contributors: HashSet<Uuid>,
}

impl SubmissionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an already normalized guess. Returns `false` (and changes nothing)
    /// if the player has contributed this turn.
    pub fn add(&mut self, player: Uuid, text: String) -> bool {
        if !self.contributors.insert(player) {
            return false;
        }
        match self.index_by_text.get(&text) {
            Some(&index) => self.groups[index].contributors.push(player),
            None => {
                self.index_by_text.insert(text.clone(), self.groups.len());
                self.groups.push(SubmissionGroup {
                    text,
                    contributors: vec![player],
                });
            }
        }
        true
    }

    pub fn has_contributed(&self, player: Uuid) -> bool {
        self.contributors.contains(&player)
    }

    /// Number of distinct players across all groups.
    pub fn contributor_count(&self) -> usize {
        self.contributors.len()
    }

    pub fn group(&self, text: &str) -> Option<&SubmissionGroup> {
        self.index_by_text.get(text).map(|&index| &self.groups[index])
    }

    pub fn groups(&self) -> &[SubmissionGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drops a departing player's guess. Groups left without contributors vanish.
    pub fn remove_contributor(&mut self, player: Uuid) -> bool {
        if !self.contributors.remove(&player) {
            return false;
        }
        for group in &mut self.groups {
            group.contributors.retain(|id| *id != player);
        }
        self.groups.retain(|group| !group.contributors.is_empty());
        self.index_by_text = self
            .groups
            .iter()
            .enumerate()
            .map(|(index, group)| (group.text.clone(), index))
            .collect();
        true
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.index_by_text.clear();
        self.contributors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_guesses_are_grouped_in_arrival_order() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut agg = SubmissionAggregator::new();
        assert!(agg.add(a, "pop".to_string()));
        assert!(agg.add(b, "fizz".to_string()));
        assert!(agg.add(c, "pop".to_string()));

        assert_eq!(agg.contributor_count(), 3);
        assert_eq!(agg.groups().len(), 2);
        assert_eq!(agg.group("pop").map(|g| g.contributors.clone()), Some(vec![a, c]));
        assert_eq!(agg.groups()[0].text, "pop");
        assert_eq!(agg.groups()[1].text, "fizz");
    }

    #[test]
    fn test_second_guess_from_same_player_is_rejected() {
        let a = Uuid::new_v4();
        let mut agg = SubmissionAggregator::new();
        assert!(agg.add(a, "pop".to_string()));
        assert!(!agg.add(a, "bang".to_string()));
        assert!(!agg.add(a, "pop".to_string()));
        assert_eq!(agg.contributor_count(), 1);
        assert!(agg.group("bang").is_none());
        assert_eq!(agg.group("pop").map(|g| g.contributors.len()), Some(1));
    }

    #[test]
    fn test_grouping_is_case_sensitive() {
        let mut agg = SubmissionAggregator::new();
        agg.add(Uuid::new_v4(), "Pop".to_string());
        agg.add(Uuid::new_v4(), "pop".to_string());
        assert_eq!(agg.groups().len(), 2);
    }

    #[test]
    fn test_remove_contributor_drops_empty_groups() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut agg = SubmissionAggregator::new();
        agg.add(a, "pop".to_string());
        agg.add(b, "fizz".to_string());
        agg.add(c, "pop".to_string());

        assert!(agg.remove_contributor(b));
        assert!(!agg.remove_contributor(b));
        assert!(agg.group("fizz").is_none());
        assert_eq!(agg.contributor_count(), 2);

        assert!(agg.remove_contributor(a));
        assert_eq!(agg.group("pop").map(|g| g.contributors.clone()), Some(vec![c]));
        assert!(!agg.has_contributed(a));
    }

    #[test]
    fn test_clear() {
        let mut agg = SubmissionAggregator::new();
        let a = Uuid::new_v4();
        agg.add(a, "pop".to_string());
        agg.clear();
        assert!(agg.is_empty());
        assert_eq!(agg.contributor_count(), 0);
        assert!(agg.add(a, "pop".to_string()));
    }

    #[test]
    fn test_normalize_guess() {
        assert_eq!(normalize_guess("  pop ", 10), Ok("pop".to_string()));
        assert_eq!(normalize_guess("pop \t pop", 10), Ok("pop pop".to_string()));
        assert_eq!(normalize_guess(" \n ", 10), Err(GuessError::Empty));
        assert_eq!(
            normalize_guess("abcdefghijk", 10),
            Err(GuessError::TooLong { max: 10 })
        );
        // Multi-byte text counts characters, not bytes.
        assert_eq!(normalize_guess("ぽんぽん", 4), Ok("ぽんぽん".to_string()));
    }
}
