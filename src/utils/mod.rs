pub mod error;

pub use error::{BiomapperError, Result};
