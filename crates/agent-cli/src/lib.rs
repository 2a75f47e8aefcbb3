//! Agent builders, tool implementations, and CLI surface for the swarm
//! binary. Split from `main.rs` so integration tests can exercise these
//! pieces without shelling out to the compiled binary.

pub mod agents;
pub mod beads_bridge;
pub mod cli;
pub mod config;
pub mod prompts;
pub mod tools;
pub mod worktree_bridge;
