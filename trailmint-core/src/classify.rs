//! Category classification for archived activity
//!
//! Anonymized records keep a coarse category in place of the raw URL or
//! prompt text. Both classifiers are pure functions over an ordered rule
//! table: the first rule with a pattern contained in the (lowercased) input
//! wins. The tables can be replaced through `[classify]` in the config file.

use crate::config::ClassifyConfig;
use serde::{Deserialize, Serialize};

/// Coarse category of a visited site, derived from its host name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlCategory {
    Shopping,
    Social,
    News,
    Entertainment,
    Productivity,
    General,
}

impl UrlCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlCategory::Shopping => "shopping",
            UrlCategory::Social => "social",
            UrlCategory::News => "news",
            UrlCategory::Entertainment => "entertainment",
            UrlCategory::Productivity => "productivity",
            UrlCategory::General => "general",
        }
    }
}

/// Coarse intent of a captured prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptCategory {
    Programming,
    Writing,
    Education,
    ProblemSolving,
    Creative,
    Analysis,
    General,
    /// Prompt text was empty
    Unknown,
}

impl PromptCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptCategory::Programming => "programming",
            PromptCategory::Writing => "writing",
            PromptCategory::Education => "education",
            PromptCategory::ProblemSolving => "problem_solving",
            PromptCategory::Creative => "creative",
            PromptCategory::Analysis => "analysis",
            PromptCategory::General => "general",
            PromptCategory::Unknown => "unknown",
        }
    }
}

/// One classification rule: any pattern contained in the input selects
/// `category`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Rule<C> {
    pub category: C,
    pub patterns: Vec<String>,
}

impl<C: Copy> Rule<C> {
    pub fn new(category: C, patterns: &[&str]) -> Self {
        Self {
            category,
            patterns: patterns.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    fn matches(&self, haystack: &str) -> Option<C> {
        self.patterns
            .iter()
            .any(|p| !p.is_empty() && haystack.contains(&p.to_lowercase()))
            .then_some(self.category)
    }
}

/// Built-in host rules.
pub fn default_url_rules() -> Vec<Rule<UrlCategory>> {
    vec![
        Rule::new(UrlCategory::Shopping, &["shop", "store", "buy"]),
        Rule::new(UrlCategory::Social, &["social", "facebook", "twitter"]),
        Rule::new(UrlCategory::News, &["news", "blog"]),
        Rule::new(UrlCategory::Entertainment, &["video", "youtube", "netflix"]),
        Rule::new(UrlCategory::Productivity, &["work", "office", "docs"]),
    ]
}

/// Built-in prompt rules.
pub fn default_prompt_rules() -> Vec<Rule<PromptCategory>> {
    vec![
        Rule::new(PromptCategory::Programming, &["code", "program", "debug"]),
        Rule::new(PromptCategory::Writing, &["write", "essay", "article"]),
        Rule::new(
            PromptCategory::Education,
            &["explain", "what is", "how does"],
        ),
        Rule::new(PromptCategory::ProblemSolving, &["help", "solve", "fix"]),
        Rule::new(PromptCategory::Creative, &["create", "design", "make"]),
        Rule::new(
            PromptCategory::Analysis,
            &["analyze", "compare", "evaluate"],
        ),
    ]
}

/// Rule tables for both classifiers.
#[derive(Debug, Clone)]
pub struct Classifier {
    url_rules: Vec<Rule<UrlCategory>>,
    prompt_rules: Vec<Rule<PromptCategory>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(default_url_rules(), default_prompt_rules())
    }
}

impl Classifier {
    pub fn new(url_rules: Vec<Rule<UrlCategory>>, prompt_rules: Vec<Rule<PromptCategory>>) -> Self {
        Self {
            url_rules,
            prompt_rules,
        }
    }

    /// Built-in tables, with any table present in `config` replacing its
    /// counterpart.
    pub fn from_config(config: &ClassifyConfig) -> Self {
        Self::new(
            config.url.clone().unwrap_or_else(default_url_rules),
            config.prompt.clone().unwrap_or_else(default_prompt_rules),
        )
    }

    /// Category of a URL's host. Unparseable URLs are `General`.
    pub fn classify_url(&self, raw_url: &str) -> UrlCategory {
        let host = crate::types::domain_of(raw_url).to_lowercase();
        if host.is_empty() {
            return UrlCategory::General;
        }
        self.url_rules
            .iter()
            .find_map(|rule| rule.matches(&host))
            .unwrap_or(UrlCategory::General)
    }

    pub fn classify_prompt(&self, text: &str) -> PromptCategory {
        if text.trim().is_empty() {
            return PromptCategory::Unknown;
        }
        let lower = text.to_lowercase();
        self.prompt_rules
            .iter()
            .find_map(|rule| rule.matches(&lower))
            .unwrap_or(PromptCategory::General)
    }
}
