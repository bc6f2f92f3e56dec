//! Key matching rules
//!
//! A [`MatchKeyRule`] decides which keys hold JSON. The rule text accepted by
//! the step configuration is one of:
//! - empty: nothing matches
//! - `*`: everything matches
//! - `a | b | c`: exactly the listed names (surrounding whitespace trimmed)

use std::collections::HashSet;

/// Tri-state predicate over key names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchKeyRule {
    /// Every key matches
    All,
    /// No key matches
    None,
    /// Only the stored keys match
    ///
    /// When `case_sensitive` is false the stored names are upper-cased and
    /// candidate keys are upper-cased before the lookup.
    Keys {
        keys: HashSet<String>,
        case_sensitive: bool,
    },
}

impl MatchKeyRule {
    pub fn match_all() -> Self {
        Self::All
    }

    pub fn match_none() -> Self {
        Self::None
    }

    /// Builds a rule matching exactly `keys`
    ///
    /// Duplicates collapse, and with `case_sensitive == false` every name is
    /// normalized to upper case.
    pub fn match_keys<I, S>(keys: I, case_sensitive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|key| normalize(key.as_ref(), case_sensitive))
            .collect();

        Self::Keys {
            keys,
            case_sensitive,
        }
    }

    /// Parses the rule text used by the `jsonInputs` / `jsonEnvs` inputs
    pub fn parse(text: &str, case_sensitive: bool) -> Self {
        match text.trim() {
            "" => Self::match_none(),
            "*" => Self::match_all(),
            list => Self::match_keys(
                list.split('|').map(str::trim).filter(|key| !key.is_empty()),
                case_sensitive,
            ),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Keys {
                keys,
                case_sensitive,
            } => keys.contains(normalize(key, *case_sensitive).as_str()),
        }
    }
}

fn normalize(key: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        key.to_string()
    } else {
        key.to_uppercase()
    }
}
