pub mod error;
mod file;
mod path;
pub mod store;

pub use crate::file::FileMeta;
pub use crate::path::validate as validate_path;
pub use crate::store::FileStore;
use std::sync::Arc;

pub type StoreHandle = Arc<dyn FileStore + Send + Sync>;
