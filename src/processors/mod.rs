//! Markup side of the engine: content trees, reconstruction and the chapter pipeline

pub mod chapter;
pub mod markup;
pub mod reconstruct;
pub mod skip_tags;
pub mod tree;
