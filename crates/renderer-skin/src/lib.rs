//! GPU skinning for meshes bound to a shared skeleton.
//!
//! A [`Skin`](skin::Skin) maps the mesh-local bone slots of one mesh onto the
//! global bones of a [`Skeleton`](skeleton::Skeleton), keeps the inverse bind
//! pose of every slot, and each frame turns the skeleton's current pose into
//! skinning matrices that are uploaded to a uniform block owned by the skin.
//! The renderer behind the uniform block is abstracted by the traits in
//! [`gpu`], so the same skin can feed wgpu or a test double.

pub mod ancestor;
pub mod bind_pose;
pub mod bone_map;
pub mod buffer;
pub mod config;
pub mod error;
pub mod gpu;
pub mod matrix;
pub mod scene;
pub mod skeleton;
pub mod skin;

pub use config::SkinConfig;
pub use error::{ArgumentError, Error, ResourceError, Result};
pub use skin::Skin;
