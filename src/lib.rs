//! Per-site report publisher.
//!
//! Each site has a list of SQL reports. Their rows are merged into one
//! date × metric matrix and written into a Google Sheet named after the site.
//! When the sheet cannot be written the matrix goes to Drive as a CSV file.

pub mod config;
pub mod drive;
pub mod history;
pub mod report;
pub mod runner;
pub mod source;

mod error;

pub use error::{Error, Result};
