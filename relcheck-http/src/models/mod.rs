pub mod check;
pub mod cluster;

// Re-export all models for easier imports
pub use check::*;
pub use cluster::*;
