//! wgpu backend for `renderer-skin`.
//!
//! Bone matrices live in a uniform buffer with its own bind group, which the
//! draw code binds at the slot declared by [`SkinShader`].

use log::{debug, warn};
use renderer_skin::{
    gpu::{Renderer, Shader, UniformBinding, UniformBlock, UniformBlockDescriptor},
    ResourceError,
};
use wgpu::{
    util::{backend_bits_from_env, initialize_adapter_from_env, power_preference_from_env},
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType, BufferDescriptor, BufferUsages,
    Device, DeviceDescriptor, ErrorFilter, Instance, InstanceDescriptor, PowerPreference, Queue,
    RequestAdapterOptions, ShaderStages,
};

pub const BONES_BLOCK_NAME: &str = "u_bone_matrix";
pub const BONES_BIND_GROUP: u32 = 3;

pub fn bones_bind_group_layout(device: &Device) -> BindGroupLayout {
    device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        entries: &[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::VERTEX,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
        label: Some("Bones Bind Group Layout"),
    })
}

#[derive(Debug)]
pub struct SkinBlock {
    buffer: Buffer,
    bind_group: BindGroup,
    group: u32,
}

impl SkinBlock {
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn bind_group(&self) -> &BindGroup {
        &self.bind_group
    }

    /// Bind group index the block was created for.
    pub fn group(&self) -> u32 {
        self.group
    }
}

impl UniformBlock for SkinBlock {
    fn size(&self) -> u64 {
        self.buffer.size()
    }
}

/// Shader side of the bone block: its name and bind group index.
#[derive(Debug, Clone)]
pub struct SkinShader {
    binding: UniformBinding,
}

impl SkinShader {
    pub fn new(group: u32) -> Self {
        Self {
            binding: UniformBinding::new(BONES_BLOCK_NAME, group),
        }
    }
}

impl Default for SkinShader {
    fn default() -> Self {
        Self::new(BONES_BIND_GROUP)
    }
}

impl Shader for SkinShader {
    fn bones_binding(&self) -> Option<&UniformBinding> {
        Some(&self.binding)
    }
}

#[derive(Debug)]
pub struct WgpuRenderer<'a> {
    device: &'a Device,
    queue: &'a Queue,
    layout: &'a BindGroupLayout,
}

impl<'a> WgpuRenderer<'a> {
    /// `layout` is usually created by [`bones_bind_group_layout`].
    pub fn new(device: &'a Device, queue: &'a Queue, layout: &'a BindGroupLayout) -> Self {
        Self {
            device,
            queue,
            layout,
        }
    }
}

impl Renderer for WgpuRenderer<'_> {
    type Block = SkinBlock;

    fn create_uniform_block(
        &self,
        descriptor: &UniformBlockDescriptor,
    ) -> Result<SkinBlock, ResourceError> {
        let limit = self.device.limits().max_uniform_buffer_binding_size as u64;
        if descriptor.size > limit {
            return Err(ResourceError::TooLarge {
                size: descriptor.size,
                limit,
            });
        }

        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        self.device.push_error_scope(ErrorFilter::Validation);
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some(descriptor.label),
            size: descriptor.size,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Bones Bind Group"),
            layout: self.layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        if let Some(error) = validation.or(out_of_memory) {
            warn!("Failed to create uniform block \"{}\": {}", descriptor.label, error);
            return Err(ResourceError::Allocation {
                label: descriptor.label.to_string(),
                reason: error.to_string(),
            });
        }
        debug!(
            "Allocated {} bytes for \"{}\" at group {}",
            descriptor.size, descriptor.label, descriptor.binding.slot
        );
        Ok(SkinBlock {
            buffer,
            bind_group,
            group: descriptor.binding.slot,
        })
    }

    fn write_uniform_block(&self, block: &SkinBlock, data: &[u8]) -> Result<(), ResourceError> {
        if data.len() as u64 > block.buffer.size() {
            return Err(ResourceError::Upload(format!(
                "{} bytes do not fit into a buffer of {} bytes",
                data.len(),
                block.buffer.size()
            )));
        }
        self.device.push_error_scope(ErrorFilter::Validation);
        self.queue.write_buffer(&block.buffer, 0, data);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(ResourceError::Upload(error.to_string())),
            None => Ok(()),
        }
    }
}

/// Device without a surface, for offscreen work and tests.
pub async fn request_headless_device() -> Option<(Device, Queue)> {
    let instance = Instance::new(InstanceDescriptor {
        backends: backend_bits_from_env().unwrap_or(wgpu::Backends::all()),
        ..Default::default()
    });
    let adapter = match initialize_adapter_from_env(&instance, None) {
        Some(adapter) => adapter,
        None => {
            instance
                .request_adapter(&RequestAdapterOptions {
                    power_preference: power_preference_from_env()
                        .unwrap_or(PowerPreference::None),
                    ..Default::default()
                })
                .await?
        }
    };
    match adapter
        .request_device(
            &DeviceDescriptor {
                label: Some("Skin Device"),
                ..Default::default()
            },
            None,
        )
        .await
    {
        Ok(pair) => Some(pair),
        Err(error) => {
            warn!("Failed to acquire a device: {}", error);
            None
        }
    }
}
