// casket-common/src/lib.rs
pub mod cache;
pub mod config;
pub mod dependency;
pub mod error;
pub mod formulary;
pub mod fs;
pub mod model;
pub mod policy;

pub use cache::Cache;
pub use config::Config;
pub use error::{CasketError, Result};
pub use model::{Cask, Formula, Package};
