//! Transfer snapshots and the merge that keeps them current

mod merge;
mod types;

pub use merge::{merge, percent, MergeError};
pub use types::{Transfer, TransferFile};
