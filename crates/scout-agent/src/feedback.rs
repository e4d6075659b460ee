//! Feedback aggregator: session feedback plus stored preferences, folded
//! into a prompt-augmentation block.
//!
//! The aggregator never talks to the model. It reports which stored
//! preferences it folded into a prompt so the caller can bump their
//! `applicationCount` once the prompt has actually been sent.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use scout_core::config::OutputFormat;
use scout_core::utils::timestamp;

use crate::preferences::{PreferenceRecord, PreferenceStore};

const CONTEXT_HEADER: &str = "\n=== USER PREFERENCES AND FEEDBACK ===\n";
const CONTEXT_INTRO: &str = "Apply these preferences to everything you produce:\n";
const LEARNED_HEADER: &str = "\nLearned Preferences (from previous sessions):\n";
const SESSION_HEADER: &str = "\nCurrent Session Feedback:\n";

const GHERKIN_INSTRUCTION: &str = "ACCEPTANCE CRITERIA FORMAT: Use Gherkin format (Given/When/Then)\n\
- At least 4-6 acceptance criteria per story\n\
- Format: \"Given [context], when [action], then [expected outcome]\"";

const EXPLICIT_INSTRUCTION: &str = "ACCEPTANCE CRITERIA FORMAT: Use Explicit/Detailed format\n\
- 30-50 lines total\n\
- Structured with numbered sections (1, 2, 3) and subsections (a, b, c)\n\
- Include: What displays, User interactions, Validation, Navigation, Responsive behavior\n\
- Always include a Notes section at the end";

/// How many entries `summary()` lists.
const SUMMARY_RECENT: usize = 5;

// ─────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────

/// Coarse classification of a feedback text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackCategory {
    Length,
    Complexity,
    Format,
    Terminology,
    Requirements,
    Exclusions,
    General,
}

impl FeedbackCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackCategory::Length => "length",
            FeedbackCategory::Complexity => "complexity",
            FeedbackCategory::Format => "format",
            FeedbackCategory::Terminology => "terminology",
            FeedbackCategory::Requirements => "requirements",
            FeedbackCategory::Exclusions => "exclusions",
            FeedbackCategory::General => "general",
        }
    }
}

const CATEGORY_KEYWORDS: &[(FeedbackCategory, &[&str])] = &[
    (
        FeedbackCategory::Length,
        &["shorter", "longer", "concise", "detailed", "brief"],
    ),
    (
        FeedbackCategory::Complexity,
        &["technical", "simple", "user-focused", "developer"],
    ),
    (
        FeedbackCategory::Format,
        &["format", "structure", "style", "template"],
    ),
    (FeedbackCategory::Terminology, &["call", "name", "term", "use"]),
    (
        FeedbackCategory::Requirements,
        &["include", "add", "always", "must", "should"],
    ),
    (
        FeedbackCategory::Exclusions,
        &["remove", "don't", "avoid", "skip"],
    ),
];

/// One piece of session feedback. Immutable once created.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FeedbackEntry {
    pub text: String,
    pub context: String,
    pub timestamp: String,
    pub categories: Vec<FeedbackCategory>,
}

/// A prompt with its augmentation applied.
#[derive(Clone, Debug, PartialEq)]
pub struct EnhancedPrompt {
    pub prompt: String,
    /// Texts of stored preferences folded into `prompt`.
    pub applied_preferences: Vec<String>,
}

/// Overview of collected feedback.
#[derive(Clone, Debug, Serialize)]
pub struct FeedbackSummary {
    pub session_count: usize,
    pub stored_count: usize,
    pub categories: BTreeMap<FeedbackCategory, usize>,
    pub recent: Vec<FeedbackEntry>,
}

// ─────────────────────────────────────────────
// FeedbackAggregator
// ─────────────────────────────────────────────

/// Session-scoped feedback collector backed by an optional preference store.
pub struct FeedbackAggregator {
    store: Option<PreferenceStore>,
    session: Vec<FeedbackEntry>,
}

impl FeedbackAggregator {
    /// Aggregator that promotes feedback into `store`.
    pub fn new(store: PreferenceStore) -> Self {
        Self {
            store: Some(store),
            session: Vec::new(),
        }
    }

    /// Aggregator with no durable store.
    pub fn session_only() -> Self {
        Self {
            store: None,
            session: Vec::new(),
        }
    }

    /// The backing store, if any.
    pub fn store(&self) -> Option<&PreferenceStore> {
        self.store.as_ref()
    }

    /// Session feedback in arrival order.
    pub fn entries(&self) -> &[FeedbackEntry] {
        &self.session
    }

    /// Record feedback for this session and promote it to the store.
    ///
    /// Store failures are logged; the feedback still applies to this session.
    pub async fn add_feedback(&mut self, text: &str, context: &str) -> &FeedbackEntry {
        let entry = FeedbackEntry {
            text: text.trim().to_string(),
            context: context.to_string(),
            timestamp: timestamp(),
            categories: analyze(text),
        };
        debug!(feedback = %entry.text, categories = ?entry.categories, "feedback added");

        if let Some(store) = &self.store {
            if let Err(e) = store.promote_async(&entry.text, context).await {
                warn!(error = %e, "failed to promote feedback");
            }
        }

        self.session.push(entry);
        &self.session[self.session.len() - 1]
    }

    /// Drop session feedback. Stored preferences are kept.
    pub fn clear_session(&mut self) {
        self.session.clear();
    }

    fn stored(&self) -> Vec<PreferenceRecord> {
        self.store.as_ref().map(PreferenceStore::list).unwrap_or_default()
    }

    /// Stored preferences followed by session feedback, inside a labelled block.
    ///
    /// Returns an empty string when there is nothing to say.
    pub fn build_context(&self) -> String {
        render_context(&self.stored(), &self.session)
    }

    /// Prepend the context block and the format instruction to `base`.
    pub fn enhance_prompt(&self, base: &str, format: OutputFormat) -> String {
        self.enhance(base, format).prompt
    }

    /// Like [`enhance_prompt`](Self::enhance_prompt), also reporting which
    /// stored preferences were folded in.
    pub fn enhance(&self, base: &str, format: OutputFormat) -> EnhancedPrompt {
        let stored = self.stored();
        let context = render_context(&stored, &self.session);

        let mut prompt = String::new();
        if !context.is_empty() {
            prompt.push_str(&context);
            prompt.push('\n');
        }
        prompt.push_str(format_instruction(format));
        prompt.push_str("\n\n");
        prompt.push_str(base);

        EnhancedPrompt {
            prompt,
            applied_preferences: stored.into_iter().map(|p| p.text).collect(),
        }
    }

    /// Counts per category plus the most recent entries.
    pub fn summary(&self) -> FeedbackSummary {
        let mut categories = BTreeMap::new();
        for entry in &self.session {
            for cat in &entry.categories {
                *categories.entry(*cat).or_insert(0) += 1;
            }
        }
        let skip = self.session.len().saturating_sub(SUMMARY_RECENT);

        FeedbackSummary {
            session_count: self.session.len(),
            stored_count: self.stored().len(),
            categories,
            recent: self.session[skip..].to_vec(),
        }
    }
}

/// Tag feedback text with keyword categories; `General` when nothing matches.
pub fn analyze(text: &str) -> Vec<FeedbackCategory> {
    let lower = text.to_lowercase();
    let cats: Vec<FeedbackCategory> = CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(cat, _)| *cat)
        .collect();

    if cats.is_empty() {
        vec![FeedbackCategory::General]
    } else {
        cats
    }
}

/// Format instruction block for an output format.
pub fn format_instruction(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Gherkin => GHERKIN_INSTRUCTION,
        OutputFormat::Explicit => EXPLICIT_INSTRUCTION,
    }
}

fn render_context(stored: &[PreferenceRecord], session: &[FeedbackEntry]) -> String {
    if stored.is_empty() && session.is_empty() {
        return String::new();
    }

    let mut out = String::from(CONTEXT_HEADER);
    out.push_str(CONTEXT_INTRO);

    if !stored.is_empty() {
        out.push_str(LEARNED_HEADER);
        for (i, pref) in stored.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, pref.text));
        }
    }

    if !session.is_empty() {
        out.push_str(SESSION_HEADER);
        for (i, entry) in session.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, entry.text));
        }
    }

    out.push('\n');
    out.push_str(&"=".repeat(50));
    out.push('\n');
    out
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_aggregator() -> (TempDir, FeedbackAggregator) {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(dir.path().join("preferences.json"));
        (dir, FeedbackAggregator::new(store))
    }

    #[test]
    fn test_empty_context_is_empty_string() {
        let (_dir, agg) = make_aggregator();
        assert_eq!(agg.build_context(), "");
    }

    #[test]
    fn test_enhance_without_context_has_no_block() {
        let (_dir, agg) = make_aggregator();
        let prompt = agg.enhance_prompt("BASE", OutputFormat::Gherkin);
        assert!(!prompt.contains("USER PREFERENCES"));
        assert!(prompt.starts_with("ACCEPTANCE CRITERIA FORMAT: Use Gherkin"));
        assert!(prompt.ends_with("BASE"));
    }

    #[tokio::test]
    async fn test_context_orders_stored_then_session() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(dir.path().join("preferences.json"));
        store.promote("older preference", "past").unwrap();

        let mut agg = FeedbackAggregator::new(store);
        agg.add_feedback("Make them shorter", "run").await;

        let ctx = agg.build_context();
        let learned = ctx.find("Learned Preferences").unwrap();
        let session = ctx.find("Current Session Feedback").unwrap();
        assert!(learned < session);
        assert!(ctx.contains("1. older preference"));
        // Promoted session feedback is now a stored preference too
        assert!(ctx.contains("2. Make them shorter"));
        assert!(ctx.contains("Current Session Feedback:\n1. Make them shorter"));
        assert!(ctx.ends_with(&format!("{}\n", "=".repeat(50))));
    }

    #[tokio::test]
    async fn test_add_feedback_promotes_once() {
        let (_dir, mut agg) = make_aggregator();
        agg.add_feedback("Avoid jargon", "a").await;
        agg.add_feedback("avoid JARGON", "b").await;
        assert_eq!(agg.entries().len(), 2);
        assert_eq!(agg.store().unwrap().list().len(), 1);
    }

    #[tokio::test]
    async fn test_promotion_does_not_count_application() {
        let (_dir, mut agg) = make_aggregator();
        agg.add_feedback("Be brief", "").await;
        let enhanced = agg.enhance("base", OutputFormat::Explicit);
        assert_eq!(enhanced.applied_preferences, vec!["Be brief".to_string()]);
        assert_eq!(agg.store().unwrap().list()[0].application_count, 0);
        assert!(enhanced.prompt.contains("Explicit/Detailed format"));
    }

    #[tokio::test]
    async fn test_session_only_aggregator() {
        let mut agg = FeedbackAggregator::session_only();
        agg.add_feedback("Add error states", "").await;
        let enhanced = agg.enhance("base", OutputFormat::Gherkin);
        assert!(enhanced.applied_preferences.is_empty());
        assert!(enhanced.prompt.contains("Current Session Feedback"));
        assert!(!enhanced.prompt.contains("Learned Preferences"));
    }

    #[test]
    fn test_analyze_categories() {
        assert_eq!(analyze("Make it shorter"), vec![FeedbackCategory::Length]);
        assert_eq!(
            analyze("Always include a rollback step"),
            vec![FeedbackCategory::Requirements]
        );
        assert!(analyze("skip the intro").contains(&FeedbackCategory::Exclusions));
        assert_eq!(analyze("great job"), vec![FeedbackCategory::General]);
    }

    #[tokio::test]
    async fn test_summary_and_clear_session() {
        let (_dir, mut agg) = make_aggregator();
        for text in ["shorter please", "more technical", "brief", "x", "y", "z"] {
            agg.add_feedback(text, "").await;
        }
        let summary = agg.summary();
        assert_eq!(summary.session_count, 6);
        assert_eq!(summary.stored_count, 6);
        assert_eq!(summary.categories[&FeedbackCategory::Length], 2);
        assert_eq!(summary.recent.len(), 5);
        assert_eq!(summary.recent[0].text, "more technical");

        agg.clear_session();
        assert!(agg.entries().is_empty());
        assert_eq!(agg.store().unwrap().list().len(), 6);
    }
}
