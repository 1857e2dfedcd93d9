pub mod api;
pub mod error;
pub mod layout;
pub mod logger;
mod scan;
pub mod transpose;

pub use crate::error::{Artifact, Error, Result};
pub use api::{CsvIndex, IndexOptions};
pub use transpose::{ColumnGroup, DiscardGroups, GroupContext, GroupSink};
