//! Vocabulary skill extraction with compound regrouping.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

const BUNDLED_RULES: &str = include_str!("../rules/skills.yaml");
const RULES_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
struct SkillRulesFile {
    version: u32,
    stop_words: Vec<String>,
    tech: VocabularyRules,
    soft: VocabularyRules,
}

#[derive(Debug, Clone, Deserialize)]
struct VocabularyRules {
    skills: BTreeMap<String, String>,
    /// Tokens that only count inside a compound; dropped when left over.
    #[serde(default)]
    parts: BTreeSet<String>,
    #[serde(default)]
    compounds: Vec<CompoundRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompoundRule {
    tokens: Vec<String>,
    label: String,
}

impl VocabularyRules {
    fn validate(&self, side: &str) -> Result<()> {
        for rule in &self.compounds {
            if rule.tokens.len() < 2 {
                bail!("{side} compound `{}` needs at least two tokens", rule.label);
            }
            for token in &rule.tokens {
                if !self.skills.contains_key(token) && !self.parts.contains(token) {
                    bail!("{side} compound `{}` uses unknown token `{token}`", rule.label);
                }
            }
        }
        Ok(())
    }

    fn extract(&self, tokens: &BTreeSet<String>) -> BTreeSet<String> {
        let mut matched = tokens
            .iter()
            .filter(|t| self.skills.contains_key(*t) || self.parts.contains(*t))
            .map(String::as_str)
            .collect::<BTreeSet<_>>();

        let mut labels = BTreeSet::new();
        for rule in &self.compounds {
            if rule.tokens.iter().all(|t| matched.contains(t.as_str())) {
                for token in &rule.tokens {
                    matched.remove(token.as_str());
                }
                labels.insert(rule.label.clone());
            }
        }

        labels.extend(matched.into_iter().filter_map(|t| self.skills.get(t).cloned()));
        labels
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkillSets {
    pub tech: BTreeSet<String>,
    pub soft: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct SkillExtractor {
    stop_words: BTreeSet<String>,
    tech: VocabularyRules,
    soft: VocabularyRules,
}

impl SkillExtractor {
    /// Vocabulary compiled into the binary.
    pub fn bundled() -> Result<Self> {
        Self::from_yaml(BUNDLED_RULES).context("parsing bundled rules/skills.yaml")
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: SkillRulesFile = serde_yaml::from_str(text)?;
        if file.version != RULES_VERSION {
            bail!("unsupported skill rules version {}", file.version);
        }
        file.tech.validate("tech")?;
        file.soft.validate("soft")?;
        Ok(Self {
            stop_words: file.stop_words.into_iter().collect(),
            tech: file.tech,
            soft: file.soft,
        })
    }

    /// Lowercased words of `text` in order, repeats kept. Everything but
    /// letters, digits, `+` and `#` separates words; stop words are removed.
    pub fn words(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '+' || c == '#' { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .filter(|w| !self.stop_words.contains(*w))
            .map(ToString::to_string)
            .collect()
    }

    pub fn tokenize(&self, text: &str) -> BTreeSet<String> {
        self.words(text).into_iter().collect()
    }

    pub fn extract(&self, text: &str) -> SkillSets {
        let tokens = self.tokenize(text);
        SkillSets {
            tech: self.tech.extract(&tokens),
            soft: self.soft.extract(&tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn compounds_replace_their_parts() {
        let extractor = SkillExtractor::bundled().unwrap();
        let skills = extractor.extract(
            "Vous maîtrisez le machine learning et Power BI avec une bonne gestion du temps.",
        );
        assert!(skills.tech.contains("Machine Learning"));
        assert!(skills.tech.contains("Power BI"));
        for bare in ["machine", "learning", "power", "bi", "BI"] {
            assert!(!skills.tech.contains(bare), "{bare} should be consumed");
        }
        assert_eq!(skills.soft, set(&["Gestion du temps"]));
    }

    #[test]
    fn stray_parts_are_dropped() {
        let extractor = SkillExtractor::bundled().unwrap();
        let skills = extractor.extract("Esprit ouvert, gestion de projet, Python et SQL.");
        assert_eq!(skills.tech, set(&["Python", "SQL"]));
        assert!(skills.soft.is_empty());
    }

    #[test]
    fn consumed_tokens_are_unavailable_to_later_rules() {
        let extractor = SkillExtractor::bundled().unwrap();
        let skills = extractor.extract("Esprit d'équipe, esprit de synthèse, rigueur et autonomie");
        assert_eq!(skills.soft, set(&["Autonomie", "Esprit d'équipe", "Rigueur"]));
    }

    #[test]
    fn punctuation_splits_but_keeps_language_symbols() {
        let extractor = SkillExtractor::bundled().unwrap();
        let tokens = extractor.tokenize("C++/C#, scikit-learn; Node.js (CI/CD) et l'API");
        assert_eq!(
            tokens,
            set(&["api", "c#", "c++", "cd", "ci", "js", "learn", "node", "scikit"])
        );
        let skills = extractor.extract("C++/C#, scikit-learn; Node.js (CI/CD) et l'API");
        assert_eq!(
            skills.tech,
            set(&["API", "C#", "C++", "CI/CD", "Node.js", "Scikit-learn"])
        );
    }

    #[test]
    fn extraction_is_order_independent() {
        let extractor = SkillExtractor::bundled().unwrap();
        let a = extractor.extract("spark python sql server docker");
        let b = extractor.extract("docker server sql python spark");
        assert_eq!(a, b);
        assert_eq!(a.tech, set(&["Docker", "Python", "SQL Server", "Spark"]));
    }

    #[test]
    fn unknown_compound_tokens_are_rejected() {
        let yaml = r#"
version: 1
stop_words: []
tech:
  skills: {python: Python}
  compounds:
    - tokens: [python, ghost]
      label: Ghost
soft:
  skills: {}
"#;
        let err = SkillExtractor::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
