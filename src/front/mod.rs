//! Front core API access: rate-limited, cursor-paginated fetching and the
//! resource records it returns.

pub mod client;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod search;

pub use client::{ClientConfig, FrontClient};
pub use error::FrontError;
pub use models::{Conversation, Inbox, Message};
pub use search::{DateRange, SearchQuery};
