//! Running transcript of the conversation.
//!
//! Agent text arrives as partial fragments over the session event stream
//! and accretes into a single entry until the turn completes. Customer
//! entries come from explicit typed input; there is no local speech
//! recognition, so spoken customer audio never appears here.

use serde::Serialize;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    Customer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Ordered transcript with agent-fragment accretion.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    accreting: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Transcript::default()
    }

    /// Appends an agent text fragment.
    ///
    /// Consecutive fragments within one agent turn merge space-joined into
    /// the entry opened by the first fragment. Blank fragments are dropped.
    /// Returns the entry the fragment landed in, or `None` for a blank.
    pub fn push_agent_fragment(&mut self, fragment: &str) -> Option<&TranscriptEntry> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return None;
        }
        if self.accreting {
            if let Some(last) = self.entries.last_mut() {
                last.text.push(' ');
                last.text.push_str(fragment);
                return self.entries.last();
            }
        }
        self.entries.push(TranscriptEntry {
            speaker: Speaker::Agent,
            text: fragment.to_string(),
        });
        self.accreting = true;
        self.entries.last()
    }

    /// Appends a customer entry. Any open agent accretion ends; a later
    /// agent fragment in the same turn starts a fresh entry.
    pub fn push_customer(&mut self, text: &str) -> Option<&TranscriptEntry> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        self.accreting = false;
        self.entries.push(TranscriptEntry {
            speaker: Speaker::Customer,
            text: text.to_string(),
        });
        self.entries.last()
    }

    /// Seals the current agent turn. The next agent fragment opens a new
    /// entry. Sealing an already-sealed transcript is a no-op.
    pub fn seal_turn(&mut self) {
        self.accreting = false;
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_fragments_accrete_space_joined() {
        let mut t = Transcript::new();
        t.push_agent_fragment("Hola,");
        t.push_agent_fragment("¿qué te gustaría");
        t.push_agent_fragment("ordenar hoy?");
        assert_eq!(t.len(), 1);
        assert_eq!(t.entries()[0].text, "Hola, ¿qué te gustaría ordenar hoy?");
        assert_eq!(t.entries()[0].speaker, Speaker::Agent);
    }

    #[test]
    fn test_turn_complete_starts_a_new_agent_entry() {
        let mut t = Transcript::new();
        t.push_agent_fragment("First turn.");
        t.seal_turn();
        t.push_agent_fragment("Second turn.");
        assert_eq!(t.len(), 2);
        assert_eq!(t.entries()[1].text, "Second turn.");
    }

    #[test]
    fn test_customer_entry_ends_accretion() {
        let mut t = Transcript::new();
        t.push_agent_fragment("Anything else?");
        t.push_customer("One pozole please");
        t.push_agent_fragment("Sure thing.");
        assert_eq!(t.len(), 3);
        assert_eq!(t.entries()[1].speaker, Speaker::Customer);
        assert_eq!(t.entries()[2].text, "Sure thing.");
    }

    #[test]
    fn test_blank_fragments_are_dropped() {
        let mut t = Transcript::new();
        assert!(t.push_agent_fragment("   ").is_none());
        assert!(t.push_customer("").is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn test_sealing_twice_is_harmless() {
        let mut t = Transcript::new();
        t.push_agent_fragment("Done.");
        t.seal_turn();
        t.seal_turn();
        t.push_agent_fragment("Next.");
        assert_eq!(t.len(), 2);
    }
}
