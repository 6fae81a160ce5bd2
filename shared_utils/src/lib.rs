//! Small helpers shared by every crate in the workspace.

pub mod env;
