pub mod link;
pub mod metadata;
pub mod walker;
