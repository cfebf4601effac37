//! Ordered interaction store with consumption-aware matching

use tracing::debug;

use crate::fingerprint::{match_key, MatchRules};
use crate::interaction::{Interaction, Request};

/// Named, ordered collection of interactions for one scenario
///
/// Recorded order is significant: when several interactions match the same
/// request, they are handed out first to last, each at most once.
#[derive(Debug, Clone)]
pub struct Cassette {
    name: String,
    interactions: Vec<Interaction>,
    consumed: Vec<bool>,
}

impl Cassette {
    /// Create an empty cassette
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_interactions(name, Vec::new())
    }

    /// Create a cassette from interactions in recorded order
    pub fn from_interactions(name: impl Into<String>, interactions: Vec<Interaction>) -> Self {
        let consumed = vec![false; interactions.len()];
        Self {
            name: name.into(),
            interactions,
            consumed,
        }
    }

    /// Cassette name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All interactions in recorded order
    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of interactions
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether the cassette holds no interactions
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Number of interactions not yet handed out
    pub fn remaining(&self) -> usize {
        self.consumed.iter().filter(|used| !**used).count()
    }

    /// Append an interaction after all existing ones
    pub fn append(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
        self.consumed.push(false);
    }

    /// Find the first unconsumed interaction matching `request` and consume it
    ///
    /// Returns `None` when every matching interaction has already been
    /// consumed, even if one would otherwise qualify.
    pub fn match_request(&mut self, request: &Request, rules: &MatchRules) -> Option<Interaction> {
        let wanted = match_key(request, rules);

        let index = self
            .interactions
            .iter()
            .zip(&self.consumed)
            .position(|(interaction, used)| {
                !*used && match_key(interaction.request(), rules) == wanted
            });

        let Some(index) = index else {
            debug!(
                "No unconsumed match in '{}' for {} {} (key: {})",
                self.name,
                request.method,
                request.url,
                wanted.short()
            );
            return None;
        };

        self.consumed[index] = true;
        debug!(
            "Matched {} {} to interaction #{} of '{}' (key: {})",
            request.method,
            request.url,
            index,
            self.name,
            wanted.short()
        );

        Some(self.interactions[index].clone())
    }

    /// Forget which interactions were handed out
    pub fn reset_consumed(&mut self) {
        self.consumed.iter_mut().for_each(|used| *used = false);
    }

    /// Consume the cassette, returning its interactions
    pub fn into_interactions(self) -> Vec<Interaction> {
        self.interactions
    }
}
