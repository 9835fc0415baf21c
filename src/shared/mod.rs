pub mod errors;
pub mod ids;
pub mod logging;
pub mod process;

pub use errors::ErrorKind;
pub use logging::{init_logging, LOG_FILTER_ENV};
pub use ids::{generate_branch_name, parse_indexes, validate_branch_name, RepoName};
pub use process::{is_binary_available, ProcessCommand, ProcessError, ProcessOutput};
