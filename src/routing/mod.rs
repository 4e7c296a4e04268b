// ============================================================================
// Engine routing
// ============================================================================
//
// Identifier groups hold master engines in shard order and slave engines in
// replica order. Resolution turns (identifier, optional key) into one engine;
// fan-out resolution returns every engine of a role.
//
// ============================================================================

pub mod group;
pub mod registry;
pub mod resolver;

pub use group::{EngineGroup, SlaveBalance};
pub use registry::EngineRegistry;
pub use resolver::Route;
