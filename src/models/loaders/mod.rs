pub mod toml_loader;

pub use toml_loader::{load_all_request_files, load_request_file, RequestFile};
