//! Robot animation catalogue.
//!
//! The agent only sees short animation names plus descriptive labels; the
//! robot needs full paths. The catalogue maps one onto the other.

use crate::config::AnimationConfig;

#[derive(Debug, Clone, Default)]
pub struct AnimationCatalogue {
    entries: Vec<AnimationConfig>,
}

impl AnimationCatalogue {
    pub fn new(entries: Vec<AnimationConfig>) -> Self {
        Self { entries }
    }

    pub fn from_config(animations: &[AnimationConfig]) -> Self {
        Self::new(animations.to_vec())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path_of(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.path.as_str())
    }

    /// One `name: labels` line per animation, in catalogue order.
    pub fn prompt_list(&self) -> String {
        self.entries
            .iter()
            .map(|a| format!("{}: {}", a.name, a.labels))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replace every animation name occurring in `text` with its path.
    ///
    /// Single left-to-right pass: the longest name matching at a position
    /// wins, and inserted paths are never rescanned.
    pub fn resolve(&self, text: &str) -> String {
        let mut resolved = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(ch) = rest.chars().next() {
            let hit = self
                .entries
                .iter()
                .filter(|a| !a.name.is_empty() && rest.starts_with(a.name.as_str()))
                .max_by_key(|a| a.name.len());
            match hit {
                Some(animation) => {
                    resolved.push_str(&animation.path);
                    rest = &rest[animation.name.len()..];
                }
                None => {
                    resolved.push(ch);
                    rest = &rest[ch.len_utf8()..];
                }
            }
        }
        resolved
    }
}
