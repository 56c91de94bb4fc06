//! Rulesets: named, ordered behavioral directives rendered into system prompts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single behavioral directive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    /// Plain-text directive.
    Text { value: String },
    /// Output must satisfy a JSON schema.
    Json { schema: Value },
}

impl Rule {
    /// Creates a plain-text rule.
    pub fn text(value: impl Into<String>) -> Self {
        Rule::Text {
            value: value.into(),
        }
    }

    /// Creates a schema-constrained rule.
    pub fn json(schema: Value) -> Self {
        Rule::Json { schema }
    }

    /// Renders the rule as a prompt line.
    pub fn render(&self) -> String {
        match self {
            Rule::Text { value } => value.clone(),
            Rule::Json { schema } => format!(
                "Output a valid JSON object that matches this schema: {}",
                schema
            ),
        }
    }
}

/// Named, ordered list of rules.
///
/// # Example
///
/// ```
/// use weave_core::rules::{Rule, Ruleset};
///
/// let ruleset = Ruleset::new("tone")
///     .rule(Rule::text("Be concise"))
///     .rule(Rule::text("Answer in English"));
/// assert_eq!(ruleset.rules.len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    /// Ruleset name
    pub name: String,
    /// Rules in declaration order
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Ruleset {
    /// Creates an empty ruleset.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Appends a rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Returns the rulesets a task sees: structure rulesets first, then the
/// task's own, each in its original order.
pub fn effective_rulesets(structure: &[Ruleset], task: &[Ruleset]) -> Vec<Ruleset> {
    structure.iter().chain(task.iter()).cloned().collect()
}

/// Renders rulesets as a system-prompt section.
///
/// Returns `None` when there are no rules to render.
pub fn render_rulesets(rulesets: &[Ruleset]) -> Option<String> {
    let sections: Vec<String> = rulesets
        .iter()
        .filter(|ruleset| !ruleset.rules.is_empty())
        .map(|ruleset| {
            let lines: Vec<String> = ruleset
                .rules
                .iter()
                .enumerate()
                .map(|(i, rule)| format!("{}. {}", i + 1, rule.render()))
                .collect();
            format!("Ruleset name: {}\n{}", ruleset.name, lines.join("\n"))
        })
        .collect();

    if sections.is_empty() {
        None
    } else {
        Some(format!(
            "When responding, always follow these rulesets:\n\n{}",
            sections.join("\n\n")
        ))
    }
}
