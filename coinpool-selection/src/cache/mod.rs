//! Process-local token cache.
//!
//! Each pool's cache holds the unspent tokens this process has seen, in the
//! order it first saw them. It is never the authority on whether a token is
//! free; that is the claims list in the durable pool state.

pub mod filter;
pub mod registry;
pub mod token_cache;

pub use filter::FilteredTokens;
pub use registry::TokenCacheRegistry;
pub use token_cache::TokenCache;
