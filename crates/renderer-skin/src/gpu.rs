//! Renderer collaborators of a skin.
//!
//! A renderer creates uniform blocks and writes bytes into them; a shader
//! declares where the bone matrices are bound. Both are implemented by the
//! backend crates, the skin only talks to these traits.

use crate::error::ResourceError;

/// Binding of the bone matrix block declared by a shader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniformBinding {
    pub name: String,
    pub slot: u32,
}

impl UniformBinding {
    pub fn new(name: impl Into<String>, slot: u32) -> Self {
        Self {
            name: name.into(),
            slot,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UniformBlockDescriptor<'a> {
    pub label: &'a str,
    pub binding: &'a UniformBinding,
    /// Size in bytes.
    pub size: u64,
}

pub trait UniformBlock: Send + Sync {
    fn size(&self) -> u64;
}

pub trait Renderer {
    type Block: UniformBlock;

    fn create_uniform_block(
        &self,
        descriptor: &UniformBlockDescriptor,
    ) -> Result<Self::Block, ResourceError>;

    /// Write `data` at the start of `block`.
    fn write_uniform_block(&self, block: &Self::Block, data: &[u8]) -> Result<(), ResourceError>;
}

pub trait Shader {
    fn bones_binding(&self) -> Option<&UniformBinding>;
}

// A bare binding stands for a shader that declares exactly that block.
impl Shader for UniformBinding {
    fn bones_binding(&self) -> Option<&UniformBinding> {
        Some(self)
    }
}
