// Engine orchestration - session registry, lifecycle and command dispatch.

pub mod dispatcher;
pub mod registry;
pub mod session;
pub mod stats;
