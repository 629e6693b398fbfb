pub mod download;
pub mod engine;
pub mod index;
pub mod media;
pub mod paths;
pub mod reconcile;
pub mod walker;
