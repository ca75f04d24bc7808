//! Page and site status definitions
use std::fmt;

/// Represents the outcome of the most recent extraction attempt for a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageStatus {
    /// Page row exists but has not been extracted yet
    Pending,

    /// Page was extracted and yielded a product record
    Parsed,

    /// Extraction raised an error (recorded in `parse_error`)
    Failed,

    /// Page was recognised as not being a product page
    Skipped,
}

impl PageStatus {
    /// Returns true if an extraction attempt has finished for this page
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Converts the page status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Parsed => "parsed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a page status from a database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "parsed" => Some(Self::Parsed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Returns all possible page statuses
    pub fn all() -> [Self; 4] {
        [Self::Pending, Self::Parsed, Self::Failed, Self::Skipped]
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Whether a site is eligible for crawling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteStatus {
    Active,
    Inactive,
}

impl SiteStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
