pub mod assignments;
pub mod directory;
pub mod idempotency;
pub mod orders;
pub mod reviews;
