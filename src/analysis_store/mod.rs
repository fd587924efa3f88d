mod models;
mod schema;
pub mod share_id;
mod store;
mod trait_def;

pub use models::{Lookup, StoreFailure, StoreFailureKind};
pub use store::SqliteAnalysisStore;
pub use trait_def::AnalysisStore;
