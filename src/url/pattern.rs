use crate::url::matcher::{is_valid_glob, matches_glob};
use crate::ConfigError;
use regex::Regex;

/// Filter applied to the path of every discovered link
///
/// Operators may write either a glob (`/products/*`) or a regular expression
/// (`^/p/\d+$`) in the same field. A path is admitted if it matches the glob;
/// failing that, the pattern is tried as a regex anchored at the start of the
/// path.
#[derive(Debug, Clone)]
pub struct LinkPattern {
    raw: String,
    regex: Option<Regex>,
}

impl LinkPattern {
    /// Compiles a link pattern
    ///
    /// Fails only when the text is neither a well-formed glob nor a valid regex.
    pub fn new(raw: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(&format!("^(?:{})", raw)).ok();

        if regex.is_none() && !is_valid_glob(raw) {
            return Err(ConfigError::InvalidPattern(format!(
                "'{}' is neither a glob nor a regular expression",
                raw
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    /// Returns true if the URL path is admitted by this pattern
    pub fn matches(&self, path: &str) -> bool {
        if matches_glob(&self.raw, path) {
            return true;
        }
        self.regex.as_ref().is_some_and(|re| re.is_match(path))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
