//! Token filter strategy: owner-hash / tag-regex matching over a cache.

use coinpool_core::{CachedToken, TokenFilter};

use super::token_cache::{Iter, TokenCache};

/// Lazy view of the cached tokens that pass a filter.
///
/// An empty filter walks the cache directly without evaluating any matcher.
#[derive(Debug, Clone)]
pub enum FilteredTokens<'a> {
    All(Iter<'a>),
    Matching {
        tokens: Iter<'a>,
        filter: &'a TokenFilter,
    },
}

impl<'a> Iterator for FilteredTokens<'a> {
    type Item = &'a CachedToken;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            FilteredTokens::All(tokens) => tokens.next(),
            FilteredTokens::Matching { tokens, filter } => tokens.find(|t| filter.matches(t)),
        }
    }
}

/// Select the cached tokens matching `filter`, in cache order.
pub fn find<'a>(cache: &'a TokenCache, filter: &'a TokenFilter) -> FilteredTokens<'a> {
    if filter.is_unfiltered() {
        FilteredTokens::All(cache.iter())
    } else {
        FilteredTokens::Matching {
            tokens: cache.iter(),
            filter,
        }
    }
}
