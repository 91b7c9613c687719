pub mod engine;
pub mod headers;

pub use engine::RewritingProxy;
