#![forbid(unsafe_code)]

//! Keyword rule table answering free-text questions about the dashboard.
//!
//! Input is normalised (lowercase, punctuation to spaces, whitespace
//! collapsed) and checked against each rule in table order. The first rule
//! whose matcher accepts the input supplies the reply; if none does, the
//! table's fallback is returned.

use serde::{Deserialize, Serialize};

/// Lowercases, turns everything that is not alphanumeric (or `<`, `>`, `=`,
/// kept for income labels) into a space, and collapses runs of whitespace.
#[must_use]
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .flat_map(|c| {
            let kept = if c.is_alphanumeric() || matches!(c, '<' | '>' | '=') {
                c
            } else {
                ' '
            };
            kept.to_lowercase()
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word containment: `"age"` matches `"median age"` but not `"wage"`.
fn contains_words(haystack: &str, needle: &str) -> bool {
    let needle = normalize(needle);
    if needle.is_empty() {
        return false;
    }
    format!(" {haystack} ").contains(&format!(" {needle} "))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    /// At least one keyword present.
    Any(Vec<String>),
    /// Every keyword present.
    All(Vec<String>),
    /// The normalised input starts with this text.
    Prefix(String),
}

impl Matcher {
    /// `normalized` must already have gone through [`normalize`].
    #[must_use]
    pub fn matches(&self, normalized: &str) -> bool {
        match self {
            Self::Any(keywords) => keywords.iter().any(|k| contains_words(normalized, k)),
            Self::All(keywords) => {
                !keywords.is_empty() && keywords.iter().all(|k| contains_words(normalized, k))
            }
            Self::Prefix(prefix) => {
                let prefix = normalize(prefix);
                !prefix.is_empty()
                    && (normalized == prefix || normalized.starts_with(&format!("{prefix} ")))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    /// In YAML, a single-key map such as `any: [income, salary]`.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub matcher: Matcher,
    pub response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply<'a> {
    /// Name of the rule that fired; `None` for the fallback.
    pub rule: Option<&'a str>,
    pub text: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    rules: Vec<Rule>,
    fallback: String,
}

impl RuleTable {
    #[must_use]
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            fallback: fallback.into(),
        }
    }

    #[must_use]
    pub fn with_rule(
        mut self,
        name: impl Into<String>,
        matcher: Matcher,
        response: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule {
            name: name.into(),
            matcher,
            response: response.into(),
        });
        self
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn respond(&self, input: &str) -> Reply<'_> {
        let normalized = normalize(input);
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(&normalized))
            .map_or(
                Reply {
                    rule: None,
                    text: self.fallback.as_str(),
                },
                |rule| Reply {
                    rule: Some(rule.name.as_str()),
                    text: rule.response.as_str(),
                },
            )
    }

    /// The help table shipped with the census dashboard.
    #[must_use]
    pub fn census_default() -> Self {
        fn words(list: &[&str]) -> Vec<String> {
            list.iter().map(|w| (*w).to_owned()).collect()
        }

        Self::new(
            "I can explain the charts on this dashboard: income split, education, \
             occupation, marital status, sex, age and working hours. Try asking about one of them.",
        )
        .with_rule(
            "greeting",
            Matcher::Any(words(&["hi", "hello", "hey", "good morning", "good evening"])),
            "Hello! Ask me about income, education, occupation, age or working hours in the census data.",
        )
        .with_rule(
            "education_income",
            Matcher::All(words(&["education", "income"])),
            "The education chart shows the share of people earning over 50K for each education level, \
             ordered from the lowest to the highest level. The share rises steadily with education.",
        )
        .with_rule(
            "education",
            Matcher::Any(words(&["education", "degree", "school", "college", "bachelors", "masters"])),
            "Education levels are ordered by their numeric level (education.num). \
             Bars show the proportion of each level earning over 50K.",
        )
        .with_rule(
            "occupation",
            Matcher::Any(words(&["occupation", "job", "jobs", "work", "profession"])),
            "The occupation chart ranks occupations by the share earning over 50K, highest first. \
             Records with an unknown occupation are left out of that chart.",
        )
        .with_rule(
            "marital",
            Matcher::Any(words(&["marital", "married", "marriage", "divorced", "single", "spouse"])),
            "Marital status is ranked by the share earning over 50K, highest first.",
        )
        .with_rule(
            "sex",
            Matcher::Any(words(&["sex", "gender", "male", "female", "men", "women"])),
            "The sex chart compares the share of men and women earning over 50K.",
        )
        .with_rule(
            "hours",
            Matcher::Any(words(&["hours", "hours per week", "overtime", "workweek"])),
            "The working-hours box plot shows min, quartiles, median and max of hours per week \
             for each income group.",
        )
        .with_rule(
            "age",
            Matcher::Any(words(&["age", "old", "young", "older", "younger"])),
            "The age box plot summarises ages per income group; the headline figure is the median age \
             of everyone in the dataset.",
        )
        .with_rule(
            "income",
            Matcher::Any(words(&["income", "salary", "earn", "earning", "50k", ">50k", "<=50k", "rich"])),
            "Income is split into two classes, <=50K and >50K per year. The headline rate is the share \
             of all records above 50K.",
        )
        .with_rule(
            "help",
            Matcher::Any(words(&["help", "what can you do", "how does this work"])),
            "Hover a bar or box to see exact numbers. Ask about any chart by name for an explanation.",
        )
        .with_rule(
            "thanks",
            Matcher::Any(words(&["thank", "thanks", "thx"])),
            "You're welcome!",
        )
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::census_default()
    }
}
