//! Reference engine for the regression harness: XML scene files holding
//! point masses that fall under gravity.

mod loader;
mod world;

pub use loader::{
    load_scene_file, parse_scene, MappingDesc, NodeDesc, SceneDesc, SceneErrorCode,
    SceneLoadError, SourceLocation, StateDesc, Template,
};
pub use world::{EngineError, PointMassEngine};
