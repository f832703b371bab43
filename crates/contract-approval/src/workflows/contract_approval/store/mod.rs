//! Persistence adapters for [`ApprovalRepository`](super::repository::ApprovalRepository).

mod memory;
mod sled_store;

pub use memory::InMemoryApprovalStore;
pub use sled_store::SledApprovalStore;
