//! Research planner: picks a research strategy for a task and builds the
//! seed prompt.
//!
//! Planning is a pure function of the task text and the optional explicit
//! instruction: no network, no processes, no clock.
//!
//! - A non-empty instruction always yields [`Strategy::Guided`].
//! - Otherwise keyword scoring over [`DOMAINS`] picks the best domain
//!   (ties go to the earlier table entry).
//! - All-zero scores yield [`Strategy::Generic`] with an empty domain.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How many existing items are listed in the seed prompt.
const MAX_EXISTING_ITEMS: usize = 5;

/// Domain name → keywords. Order matters for tie-breaking.
pub const DOMAINS: &[(&str, &[&str])] = &[
    (
        "e-commerce",
        &["shop", "cart", "checkout", "product", "payment", "order", "inventory"],
    ),
    (
        "healthcare",
        &["patient", "medical", "health", "diagnosis", "treatment", "hospital", "doctor"],
    ),
    (
        "finance",
        &["account", "transaction", "banking", "payment", "investment", "loan"],
    ),
    (
        "education",
        &["student", "course", "learning", "assignment", "grade", "teacher"],
    ),
    (
        "social",
        &["post", "comment", "like", "share", "friend", "feed", "profile"],
    ),
    (
        "saas",
        &["subscription", "dashboard", "analytics", "integration", "api", "tenant"],
    ),
];

// ─────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────

/// Immutable input to one session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskRequest {
    /// Free-form task text.
    pub text: String,
    /// Optional explicit research instruction.
    pub instruction: Option<String>,
    /// Target artifact the final text is written to.
    pub target: Option<String>,
    /// Overwrite the target instead of appending to it.
    pub overwrite: bool,
    /// Titles of items already present in the target.
    pub existing_items: Vec<String>,
}

impl TaskRequest {
    /// A request with just task text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Attach an explicit research instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Attach a target artifact and its write mode.
    pub fn with_target(mut self, target: impl Into<String>, overwrite: bool) -> Self {
        self.target = Some(target.into());
        self.overwrite = overwrite;
        self
    }

    /// Attach titles of items that already exist in the target.
    pub fn with_existing_items(mut self, items: Vec<String>) -> Self {
        self.existing_items = items;
        self
    }

    /// The instruction, if it has any non-whitespace content.
    pub fn explicit_instruction(&self) -> Option<&str> {
        self.instruction
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Research strategy chosen for a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Follow the caller's explicit instruction.
    Guided,
    /// Research the detected domain.
    Domain,
    /// General best-practice research.
    Generic,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Guided => f.write_str("guided"),
            Strategy::Domain => f.write_str("domain"),
            Strategy::Generic => f.write_str("generic"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "guided" => Ok(Strategy::Guided),
            "domain" => Ok(Strategy::Domain),
            "generic" => Ok(Strategy::Generic),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// A design-prototype link found in the task text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrototypeLink {
    pub url: String,
    pub password: Option<String>,
}

/// The plan computed once per task. Read-only afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ResearchPlan {
    pub strategy: Strategy,
    /// Empty unless `strategy == Domain`.
    pub detected_domain: String,
    pub seed_prompt: String,
    pub prototype: Option<PrototypeLink>,
}

// ─────────────────────────────────────────────
// Planning
// ─────────────────────────────────────────────

/// Plan a bare task text with an optional explicit instruction.
pub fn plan(task_text: &str, explicit_instruction: Option<&str>) -> ResearchPlan {
    let mut request = TaskRequest::new(task_text);
    request.instruction = explicit_instruction.map(String::from);
    plan_request(&request, None)
}

/// Plan a full [`TaskRequest`], optionally forcing a strategy.
///
/// Overrides never produce an impossible plan: `Guided` without an
/// instruction and `Domain` without a detected domain fall back to what
/// detection would choose.
pub fn plan_request(task: &TaskRequest, strategy_override: Option<Strategy>) -> ResearchPlan {
    let instruction = task.explicit_instruction();
    let domain = detect_domain(&task.text);

    let strategy = match (strategy_override, instruction, domain) {
        (Some(Strategy::Generic), _, _) => Strategy::Generic,
        (Some(Strategy::Domain), _, Some(_)) => Strategy::Domain,
        (Some(Strategy::Guided), Some(_), _) => Strategy::Guided,
        (Some(Strategy::Domain), _, None) => Strategy::Generic,
        (_, Some(_), _) => Strategy::Guided,
        (_, None, Some(_)) => Strategy::Domain,
        (_, None, None) => Strategy::Generic,
    };

    let detected_domain = match strategy {
        Strategy::Domain => domain.unwrap_or_default().to_string(),
        _ => String::new(),
    };
    let prototype = detect_prototype(&task.text);

    let seed_prompt = build_seed_prompt(
        task,
        strategy,
        instruction.unwrap_or_default(),
        &detected_domain,
        prototype.as_ref(),
    );

    ResearchPlan {
        strategy,
        detected_domain,
        seed_prompt,
        prototype,
    }
}

/// Score every domain by keyword hits and return the best one, if any hit.
pub fn detect_domain(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    let mut best: Option<(&'static str, usize)> = None;

    for (domain, keywords) in DOMAINS {
        let score = keywords.iter().filter(|kw| lower.contains(*kw)).count();
        if score == 0 {
            continue;
        }
        match best {
            Some((_, top)) if top >= score => {}
            _ => best = Some((*domain, score)),
        }
    }

    best.map(|(domain, _)| domain)
}

fn prototype_url_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https?://(?:www\.)?figma\.com/(?:file|proto|design)/[^\s)>\]]+").ok()
    })
    .as_ref()
}

fn password_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*password\s*:\s*(\S+)").ok())
        .as_ref()
}

/// Find a design-prototype link and an accompanying `Password:` line.
pub fn detect_prototype(text: &str) -> Option<PrototypeLink> {
    let url = prototype_url_re()?.find(text)?.as_str().to_string();
    let password = password_re()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    Some(PrototypeLink { url, password })
}

fn build_seed_prompt(
    task: &TaskRequest,
    strategy: Strategy,
    instruction: &str,
    domain: &str,
    prototype: Option<&PrototypeLink>,
) -> String {
    let mut prompt = String::new();

    match strategy {
        Strategy::Guided => {
            prompt.push_str("Follow these research instructions before answering:\n\n");
            prompt.push_str("Research Instructions:\n");
            prompt.push_str(instruction);
            prompt.push_str("\n\n");
        }
        Strategy::Domain => {
            prompt.push_str(&format!(
                "You are a research agent with browser tools. Research {domain} best practices and examples before answering.\n\n"
            ));
        }
        Strategy::Generic => {
            prompt.push_str(
                "You are a research agent with browser tools. Research general best practices for the features mentioned before answering.\n\n",
            );
        }
    }

    prompt.push_str("Task:\n");
    prompt.push_str(task.text.trim());
    prompt.push_str("\n\n");

    if let Some(link) = prototype {
        prompt.push_str("Prototype walkthrough:\n");
        prompt.push_str(&format!("1. Navigate to {}\n", link.url));
        match &link.password {
            Some(pw) => prompt.push_str(&format!(
                "2. If a password prompt appears, fill it with \"{pw}\" and press Enter\n"
            )),
            None => prompt.push_str("2. Dismiss any login or cookie prompts\n"),
        }
        prompt.push_str(
            "3. Step through every screen with ArrowRight, taking a screenshot of each\n\
             4. Note screen names, interactions and states you observe\n\n",
        );
    }

    if !task.existing_items.is_empty() {
        prompt.push_str("Already present (do not duplicate):\n");
        for item in task.existing_items.iter().take(MAX_EXISTING_ITEMS) {
            prompt.push_str(&format!("- {item}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Use the available tools as needed, then reply with the final answer only.",
    );
    prompt
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
