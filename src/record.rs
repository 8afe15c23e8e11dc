use crate::error::ConfigError;

/// The separators Arduino sketches commonly print between values.
pub const DEFAULT_DELIMITERS: [char; 4] = [';', '|', ':', ','];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelimiterSet {
    delimiters: Vec<char>,
}

impl DelimiterSet {
    pub fn new(delimiters: impl IntoIterator<Item = char>) -> Result<DelimiterSet, ConfigError> {
        let mut out: Vec<char> = Vec::new();
        for delimiter in delimiters {
            // Whitespace always separates tokens, listing it here would only
            // hide typos such as a stray space in --delimiters.
            if delimiter.is_whitespace() {
                return Err(ConfigError::Invalid {
                    field: "delimiters",
                    reason: "whitespace is always a separator and can't be listed".to_string(),
                });
            }
            if !out.contains(&delimiter) {
                out.push(delimiter);
            }
        }
        if out.is_empty() {
            return Err(ConfigError::Invalid {
                field: "delimiters",
                reason: "at least one delimiter is required".to_string(),
            });
        }
        Ok(DelimiterSet { delimiters: out })
    }

    pub fn contains(&self, c: char) -> bool {
        self.delimiters.contains(&c)
    }

    pub fn as_slice(&self) -> &[char] {
        &self.delimiters
    }
}

impl Default for DelimiterSet {
    fn default() -> Self {
        DelimiterSet {
            delimiters: DEFAULT_DELIMITERS.to_vec(),
        }
    }
}

impl std::str::FromStr for DelimiterSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DelimiterSet::new(s.chars())
    }
}

/// Splits one raw record into tokens: every delimiter counts as a blank, and
/// runs of blanks separate tokens. Empty tokens are never produced.
pub fn normalize(line: &str, delimiters: &DelimiterSet) -> Vec<String> {
    line.split(|c: char| c.is_whitespace() || delimiters.contains(c))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
