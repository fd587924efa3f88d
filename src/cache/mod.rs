mod result_cache;

pub use result_cache::{CacheStats, ResultCache};
