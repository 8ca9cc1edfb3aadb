use std::{mem, sync::Arc};

use bytemuck::{cast_slice, Pod, Zeroable};
use glam::Mat4;
use log::{debug, warn};

use crate::{
    error::{ArgumentError, Result},
    gpu::{Renderer, Shader, UniformBinding, UniformBlock, UniformBlockDescriptor},
};

/// One column-major bone matrix as the vertex shader reads it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BoneMatrix {
    transform: [[f32; 4]; 4],
}

impl From<Mat4> for BoneMatrix {
    fn from(matrix: Mat4) -> Self {
        Self {
            transform: matrix.to_cols_array_2d(),
        }
    }
}

impl From<BoneMatrix> for Mat4 {
    fn from(matrix: BoneMatrix) -> Self {
        Mat4::from_cols_array_2d(&matrix.transform)
    }
}

pub const BONE_MATRIX_SIZE: u64 = mem::size_of::<BoneMatrix>() as u64;

#[derive(Debug)]
struct BoundBlock<B> {
    block: Arc<B>,
    binding: UniformBinding,
    bones: usize,
}

/// Staging matrices, a shadow of the last upload and the GPU block they are
/// uploaded into.
///
/// The block is created on first bind and kept until the bone count or the
/// shader binding changes.
#[derive(Debug)]
pub struct GpuSyncBuffer<B: UniformBlock> {
    label: String,
    staging: Vec<BoneMatrix>,
    // None until the current block received its first upload
    uploaded: Option<Vec<BoneMatrix>>,
    dirty: bool,
    bound: Option<BoundBlock<B>>,
}

impl<B: UniformBlock> GpuSyncBuffer<B> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            staging: Vec::new(),
            uploaded: None,
            dirty: true,
            bound: None,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// True when the next [`sync`](Self::sync) would upload.
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.uploaded.as_deref() != Some(self.staging.as_slice())
    }

    pub fn set_matrices(&mut self, matrices: &[Mat4]) {
        self.staging.clear();
        self.staging
            .extend(matrices.iter().map(|matrix| BoneMatrix::from(*matrix)));
    }

    pub fn matrices(&self) -> &[BoneMatrix] {
        &self.staging
    }

    pub fn block(&self) -> Option<Arc<B>> {
        self.bound.as_ref().map(|bound| bound.block.clone())
    }

    /// Drop the GPU block so that the next bind allocates a new one.
    pub fn release(&mut self) {
        if let Some(bound) = self.bound.take() {
            debug!(
                "Releasing uniform block \"{}\" of {} bones",
                self.label, bound.bones
            );
        }
        self.uploaded = None;
        self.dirty = true;
    }

    /// Make sure a block for `bones` matrices exists at the shader's binding.
    pub fn bind<R>(&mut self, renderer: &R, shader: &dyn Shader, bones: usize) -> Result<()>
    where
        R: Renderer<Block = B>,
    {
        let binding = shader
            .bones_binding()
            .ok_or(ArgumentError::MissingBinding)?;
        if let Some(bound) = &self.bound {
            if bound.bones == bones && bound.binding == *binding {
                return Ok(());
            }
        }
        if bones == 0 {
            if self.bound.is_some() {
                warn!("Skin \"{}\" lost all of its bones", self.label);
            }
            self.release();
            return Ok(());
        }
        self.release();

        let block = renderer.create_uniform_block(&UniformBlockDescriptor {
            label: &self.label,
            binding,
            size: bones as u64 * BONE_MATRIX_SIZE,
        })?;
        debug!(
            "Created uniform block \"{}\" of {} bones at {} #{}",
            self.label, bones, binding.name, binding.slot
        );
        self.bound = Some(BoundBlock {
            block: Arc::new(block),
            binding: binding.clone(),
            bones,
        });
        Ok(())
    }

    /// Upload the staging matrices if they differ from the last upload or the
    /// buffer was marked dirty. Returns whether an upload happened.
    pub fn sync<R>(&mut self, renderer: &R) -> Result<bool>
    where
        R: Renderer<Block = B>,
    {
        let Some(bound) = &self.bound else {
            return Ok(false);
        };
        if !self.is_dirty() {
            return Ok(false);
        }
        if bound.bones != self.staging.len() {
            warn!(
                "Uniform block \"{}\" holds {} bones but {} are staged, skip uploading",
                self.label,
                bound.bones,
                self.staging.len()
            );
            return Ok(false);
        }

        renderer.write_uniform_block(&bound.block, cast_slice(&self.staging))?;
        let uploaded = self.uploaded.get_or_insert_with(Vec::new);
        uploaded.clear();
        uploaded.extend_from_slice(&self.staging);
        self.dirty = false;
        Ok(true)
    }
}

impl<B: UniformBlock> Drop for GpuSyncBuffer<B> {
    fn drop(&mut self) {
        self.release();
    }
}
