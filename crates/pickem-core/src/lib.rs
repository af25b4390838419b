// Library root: re-exports all modules so integration tests and the CLI crate
// can access the pick'em pipeline's public API.

pub mod config;
pub mod draft;
pub mod model;
pub mod normalize;
pub mod refresh;
pub mod scoring;
pub mod settlement;
pub mod source;
pub mod store;
