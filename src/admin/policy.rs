//! Cache effects of every admin mutation.
//!
//! | Mutation                 | Invalidates              | Direct writes          |
//! |--------------------------|--------------------------|------------------------|
//! | login                    | current-user             | current-user ← user    |
//! | create quote             | quotes, quote-stats      |                        |
//! | update quote             | quotes                   | quote(id) ← quote      |
//! | delete quote             | quotes, quote-stats      |                        |
//! | import quotes            | quotes, quote-stats      |                        |
//! | backup file              | quote-files              |                        |
//! | start sentiment analysis | sentiment-stats          |                        |

use crate::api::types::{Quote, User};
use crate::query::CacheEffects;

use super::keys;

pub fn login(user: &User) -> CacheEffects {
  CacheEffects::new()
    .set(keys::current_user(), user.clone())
    .invalidate(keys::current_user())
}

pub fn create_quote() -> CacheEffects {
  CacheEffects::new()
    .invalidate(keys::QUOTES)
    .invalidate(keys::QUOTE_STATS)
}

pub fn update_quote(quote: &Quote) -> CacheEffects {
  CacheEffects::new()
    .invalidate(keys::QUOTES)
    .set(keys::quote(quote.id), quote.clone())
}

pub fn delete_quote() -> CacheEffects {
  CacheEffects::new()
    .invalidate(keys::QUOTES)
    .invalidate(keys::QUOTE_STATS)
}

pub fn import_quotes() -> CacheEffects {
  CacheEffects::new()
    .invalidate(keys::QUOTES)
    .invalidate(keys::QUOTE_STATS)
}

pub fn backup_file() -> CacheEffects {
  CacheEffects::new().invalidate(keys::QUOTE_FILES)
}

pub fn start_analysis() -> CacheEffects {
  CacheEffects::new().invalidate(keys::SENTIMENT_STATS)
}
