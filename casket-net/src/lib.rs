// casket-net/src/lib.rs
pub mod api;
pub mod backend;
pub mod http;
pub mod validation;

pub use backend::{DownloadBackend, DownloadRequest};
pub use http::HttpDownloader;
pub use validation::{sha256_file, validate_url, verify_checksum};
