//! Environment of the node API server.

pub mod checked_env;
pub mod envs;
