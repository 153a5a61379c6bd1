// Dataset curation building blocks:
// - Record/table model and JSONL persistence
// - Asset store path layout
// - Concurrent acquisition of missing images
// - Decode validation, content hashing, duplicate merge
// - Label hierarchy trees

pub mod acquire;
pub mod hash;
pub mod hierarchy;
pub mod merge;
pub mod record;
pub mod store;
pub mod validate;
