//! Keyword rule compiler and matcher.
//!
//! A [`RuleSet`] is compiled from one snapshot of the active keywords and is
//! a pure function of that snapshot: the same text always yields the same
//! matches, in keyword id order.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use chanwatch_types::models::{Keyword, KeywordId, KeywordKind};

/// Upper bound on the compiled size of a user supplied pattern.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
#[error("keyword #{keyword_id} ({pattern:?}) is not a valid regex: {source}")]
pub struct RuleCompileError {
    pub keyword_id: KeywordId,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

#[derive(Debug)]
enum Matcher {
    /// Lower-cased needle for substring search.
    Phrase(String),
    Pattern(Regex),
}

#[derive(Debug)]
struct Rule {
    keyword_id: KeywordId,
    matcher: Matcher,
}

#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile every active keyword. Invalid regexes are dropped with a
    /// warning; the rest of the set still compiles.
    pub fn compile(keywords: &[Keyword]) -> Self {
        let (rules, rejected) = Self::compile_reporting(keywords);
        for err in &rejected {
            warn!("Dropping keyword rule: {}", err);
        }
        rules
    }

    /// Like [`RuleSet::compile`] but hands back the rejected rules.
    pub fn compile_reporting(keywords: &[Keyword]) -> (Self, Vec<RuleCompileError>) {
        let mut sorted: Vec<&Keyword> = keywords.iter().filter(|k| k.is_active).collect();
        sorted.sort_by_key(|k| k.id);

        let mut rules = Vec::with_capacity(sorted.len());
        let mut rejected = Vec::new();

        for keyword in sorted {
            let text = keyword.text.trim();
            if text.is_empty() {
                continue;
            }

            let matcher = match keyword.kind {
                KeywordKind::Phrase => Ok(Matcher::Phrase(text.to_lowercase())),
                KeywordKind::Word => {
                    build_regex(&format!(r"(?:^|\W){}(?:$|\W)", regex::escape(&text.to_lowercase())))
                        .map(Matcher::Pattern)
                }
                KeywordKind::Regex => build_regex(text).map(Matcher::Pattern),
            };

            match matcher {
                Ok(matcher) => rules.push(Rule {
                    keyword_id: keyword.id,
                    matcher,
                }),
                Err(source) => rejected.push(RuleCompileError {
                    keyword_id: keyword.id,
                    pattern: keyword.text.clone(),
                    source,
                }),
            }
        }

        (Self { rules }, rejected)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Ids of every rule that matches `text`. Empty means "discard".
    pub fn matches(&self, text: &str) -> Vec<KeywordId> {
        if text.is_empty() {
            return Vec::new();
        }
        let lowered = text.to_lowercase();

        self.rules
            .iter()
            .filter(|rule| match &rule.matcher {
                Matcher::Phrase(needle) => lowered.contains(needle.as_str()),
                Matcher::Pattern(re) => re.is_match(&lowered),
            })
            .map(|rule| rule.keyword_id)
            .collect()
    }
}

fn build_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(id: KeywordId, text: &str, kind: KeywordKind) -> Keyword {
        Keyword {
            id,
            text: text.into(),
            kind,
            is_active: true,
        }
    }

    #[test]
    fn word_respects_boundaries_phrase_does_not() {
        let word = RuleSet::compile(&[kw(1, "leak", KeywordKind::Word)]);
        assert!(word.matches("leakage reported").is_empty());
        assert_eq!(word.matches("A LEAK was reported"), vec![1]);

        let phrase = RuleSet::compile(&[kw(2, "leak", KeywordKind::Phrase)]);
        assert_eq!(phrase.matches("leakage reported"), vec![2]);
    }

    #[test]
    fn word_boundaries_work_for_cyrillic() {
        let rules = RuleSet::compile(&[kw(1, "утечка", KeywordKind::Word)]);
        assert_eq!(rules.matches("Крупная УТЕЧКА данных"), vec![1]);
        assert!(rules.matches("утечками").is_empty());
    }

    #[test]
    fn word_escapes_metacharacters() {
        let rules = RuleSet::compile(&[kw(1, "c++ bug", KeywordKind::Word)]);
        assert!(rules.matches("ccc bug").is_empty());
        assert_eq!(rules.matches("a C++ bug again"), vec![1]);
    }

    #[test]
    fn word_may_end_in_punctuation() {
        let rules = RuleSet::compile(&[kw(1, "c++", KeywordKind::Word)]);
        assert_eq!(rules.matches("C++"), vec![1]);
        assert_eq!(rules.matches("rewritten in c++, again"), vec![1]);
        assert!(rules.matches("c++x").is_empty());
        assert!(rules.matches("abc++").is_empty());
    }

    #[test]
    fn invalid_regex_is_dropped_alone() {
        let (rules, rejected) = RuleSet::compile_reporting(&[
            kw(1, "breach", KeywordKind::Word),
            kw(2, "([unclosed", KeywordKind::Regex),
            kw(3, r"cve-\d{4}-\d+", KeywordKind::Regex),
        ]);
        assert_eq!(rules.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].keyword_id, 2);
        assert_eq!(rules.matches("Patch for CVE-2024-1234 and a breach"), vec![1, 3]);
    }

    #[test]
    fn inactive_and_blank_rules_are_skipped() {
        let mut inactive = kw(1, "leak", KeywordKind::Phrase);
        inactive.is_active = false;
        let rules = RuleSet::compile(&[inactive, kw(2, "   ", KeywordKind::Word)]);
        assert!(rules.is_empty());
        assert!(rules.matches("leak").is_empty());
    }

    #[test]
    fn matching_is_deterministic_and_ordered_by_id() {
        let snapshot = [
            kw(9, "breach", KeywordKind::Phrase),
            kw(4, "data", KeywordKind::Word),
        ];
        let a = RuleSet::compile(&snapshot);
        let b = RuleSet::compile(&snapshot);
        let text = "Data breach at the vendor";
        assert_eq!(a.matches(text), vec![4, 9]);
        assert_eq!(a.matches(text), b.matches(text));
    }
}
