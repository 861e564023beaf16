pub mod check;
pub mod cluster;

// Re-export all handlers for easier imports
pub use check::*;
pub use cluster::*;
