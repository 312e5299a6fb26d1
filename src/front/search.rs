//! Conversation search query construction.

use crate::types::SearchStatus;

/// Date bounds for a search, as unix seconds.
///
/// `during` selects conversations from the same day and takes precedence
/// over `before`/`after`, which may be combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub before: Option<i64>,
    pub after: Option<i64>,
    pub during: Option<i64>,
}

impl DateRange {
    pub fn is_empty(&self) -> bool {
        self.before.is_none() && self.after.is_none() && self.during.is_none()
    }
}

/// A search request against `/conversations/search/{query}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub range: DateRange,
    pub statuses: Vec<SearchStatus>,
}

impl SearchQuery {
    /// Query string as the API reads it, before encoding:
    /// range filters, then `is:` filters, then the free text.
    pub fn to_query_string(&self) -> String {
        let mut query = String::new();
        if let Some(during) = self.range.during {
            query.push_str(&format!("during:{} ", during));
        } else {
            if let Some(before) = self.range.before {
                query.push_str(&format!("before:{} ", before));
            }
            if let Some(after) = self.range.after {
                query.push_str(&format!("after:{} ", after));
            }
        }
        for status in &self.statuses {
            query.push_str(&format!("is:{} ", status.as_str()));
        }
        query.push_str(&self.text);
        query
    }

    /// Query percent-encoded as a single URL path segment.
    pub fn encoded(&self) -> String {
        urlencoding::encode(&self.to_query_string()).into_owned()
    }
}
