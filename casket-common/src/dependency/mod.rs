// casket-common/src/dependency/mod.rs
pub mod graph;

pub use graph::DependencyGraphBuilder;
