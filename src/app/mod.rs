pub mod batch;
pub mod browser;
pub mod capture;
pub mod data_io;
pub mod error;
pub mod notify;
pub mod report;
pub mod resolve;
pub mod runtime;
pub mod types;

pub use error::BatchError;
pub use runtime::run;
pub use types::Cli;
