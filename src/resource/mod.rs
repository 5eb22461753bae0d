//! Narrow interface to the resource collaborator: opaque handles, typed
//! shader keys and a program cache.

pub mod cache;
pub mod handle;
pub mod provider;
pub mod shader;

pub use cache::ProgramCache;
pub use handle::Handle;
pub use provider::{InMemoryResources, LoadProgress, ResourceProvider};
pub use shader::{ShaderDefine, ShaderKey};

/// Marker for mesh handles.
pub struct Mesh;
/// Marker for material handles.
pub struct Material;
/// Marker for compiled shader program handles.
pub struct ShaderProgram;

pub type MeshHandle = Handle<Mesh>;
pub type MaterialHandle = Handle<Material>;
pub type ProgramHandle = Handle<ShaderProgram>;
