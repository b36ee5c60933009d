//! Exclusive assignment of work to annotators and the read-only progress
//! views built over the same table.

pub mod coordinator;
mod types;

pub use types::{
    AssignedBatch, AssignmentError, BatchSummary, ExampleRef, ItemSummary, Overview,
    ServiceIdentity, SubmitReceipt,
};
