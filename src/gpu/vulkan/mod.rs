pub mod command_pool;
pub mod conversions;
pub mod framebuffer;
pub mod inflight;
pub mod queue;
pub mod recorder;
pub mod render_pass;
pub mod synchronizer;
pub mod tracker;

use std::mem::ManuallyDrop;

use ash::vk;
use log::debug;
use vk_mem::Alloc;

use crate::utils::{Handle, Pool};
use crate::{
    BindGroupInfo, BindGroupLayoutEntry, BindGroupLayoutInfo, BindingResource, BindingType,
    BufferBindingType, BufferInfo, BufferUsages, Command, ComputePipelineInfo, Format, GPUError,
    MemoryVisibility, QuerySetInfo, QueryType, RenderPipelineInfo, Result, SampleCount,
    SamplerInfo, TextureInfo, TextureUsages, TextureViewInfo,
};

pub use command_pool::{CommandPool, FencePool, SemaphorePool};
pub use framebuffer::{FramebufferCache, FramebufferKey};
pub use inflight::{InflightContext, InflightObjects};
pub use queue::PresentTarget;
pub use recorder::{CommandRecorder, CommandSink, UsedNatives, VulkanSink};
pub use render_pass::{ColorTargetKey, DepthStencilKey, RenderPassCache, RenderPassKey};
pub use synchronizer::{BufferBarrier, ImageBarrier, ResourceSynchronizer};
pub use tracker::{BufferUse, PassResources, ResourceTracker, TextureUse};

use conversions::{aspect_for_format, final_layout_for_usage, vk_buffer_usage, vk_image_usage};

pub struct Buffer {
    pub buf: vk::Buffer,
    pub alloc: Option<vk_mem::Allocation>,
    pub size: u64,
    pub usage: BufferUsages,
    pub visibility: MemoryVisibility,
}

pub struct Texture {
    pub img: vk::Image,
    pub alloc: Option<vk_mem::Allocation>,
    pub dim: [u32; 3],
    pub layers: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub sample_count: SampleCount,
    pub usage: TextureUsages,
    pub aspect: vk::ImageAspectFlags,
    /// Layout the texture rests in between passes, derived from its usage.
    pub final_layout: vk::ImageLayout,
}

pub struct TextureView {
    pub view: vk::ImageView,
    pub texture: Handle<Texture>,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub aspect: vk::ImageAspectFlags,
}

pub struct Sampler {
    pub sampler: vk::Sampler,
}

pub struct BindGroupLayout {
    pub layout: vk::DescriptorSetLayout,
    pub entries: Vec<BindGroupLayoutEntry>,
}

pub struct BindGroup {
    pub set: vk::DescriptorSet,
    pub layout: Handle<BindGroupLayout>,
    pub bindings: Vec<BindingResource>,
}

/// Externally compiled pipeline registered with the device. The native
/// pipeline and layout stay owned by whoever compiled them.
pub struct RenderPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

pub struct QuerySet {
    pub pool: vk::QueryPool,
    pub ty: QueryType,
    pub count: u32,
}

/// Arena-backed storage for every resource kind, with generation-checked
/// lookup. Handles into these pools are the resource identity used by the
/// tracker and synchronizer.
#[derive(Default)]
pub struct ResourceRegistry {
    pub buffers: Pool<Buffer>,
    pub textures: Pool<Texture>,
    pub texture_views: Pool<TextureView>,
    pub samplers: Pool<Sampler>,
    pub bind_group_layouts: Pool<BindGroupLayout>,
    pub bind_groups: Pool<BindGroup>,
    pub render_pipelines: Pool<RenderPipeline>,
    pub compute_pipelines: Pool<ComputePipeline>,
    pub query_sets: Pool<QuerySet>,
}

impl ResourceRegistry {
    pub fn buffer(&self, handle: Handle<Buffer>) -> Result<&Buffer> {
        self.buffers.get_ref(handle).ok_or(GPUError::SlotError())
    }

    pub fn texture(&self, handle: Handle<Texture>) -> Result<&Texture> {
        self.textures.get_ref(handle).ok_or(GPUError::SlotError())
    }

    pub fn texture_view(&self, handle: Handle<TextureView>) -> Result<&TextureView> {
        self.texture_views
            .get_ref(handle)
            .ok_or(GPUError::SlotError())
    }

    pub fn sampler(&self, handle: Handle<Sampler>) -> Result<&Sampler> {
        self.samplers.get_ref(handle).ok_or(GPUError::SlotError())
    }

    pub fn bind_group(&self, handle: Handle<BindGroup>) -> Result<&BindGroup> {
        self.bind_groups
            .get_ref(handle)
            .ok_or(GPUError::SlotError())
    }

    pub fn bind_group_layout(&self, handle: Handle<BindGroupLayout>) -> Result<&BindGroupLayout> {
        self.bind_group_layouts
            .get_ref(handle)
            .ok_or(GPUError::SlotError())
    }

    pub fn render_pipeline(&self, handle: Handle<RenderPipeline>) -> Result<&RenderPipeline> {
        self.render_pipelines
            .get_ref(handle)
            .ok_or(GPUError::SlotError())
    }

    pub fn compute_pipeline(&self, handle: Handle<ComputePipeline>) -> Result<&ComputePipeline> {
        self.compute_pipelines
            .get_ref(handle)
            .ok_or(GPUError::SlotError())
    }

    pub fn query_set(&self, handle: Handle<QuerySet>) -> Result<&QuerySet> {
        self.query_sets.get_ref(handle).ok_or(GPUError::SlotError())
    }
}

/// A sealed command stream plus the per-pass hazard tables derived from it.
/// The native command buffer slot is assigned during submit and recycled
/// once the fence wait completes.
pub struct CommandBuffer {
    pub(crate) commands: Vec<Command>,
    pub(crate) pass_resources: Vec<PassResources>,
    pub(crate) cmd: vk::CommandBuffer,
    pub(crate) waits: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
}

impl CommandBuffer {
    pub fn new(commands: Vec<Command>, pass_resources: Vec<PassResources>) -> Self {
        Self {
            commands,
            pass_resources,
            cmd: vk::CommandBuffer::null(),
            waits: Vec::new(),
        }
    }

    /// Register an external semaphore this buffer must wait on before
    /// executing.
    pub fn add_wait(&mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) {
        self.waits.push((semaphore, stage));
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn pass_resources(&self) -> &[PassResources] {
        &self.pass_resources
    }
}

/// Everything needed to construct a [`Device`]. Instance and logical device
/// come from the caller; enumeration and extension negotiation live outside
/// this layer.
pub struct DeviceInfo<'a> {
    pub instance: &'a ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
}

/// Owns the allocator, resource registry, structural caches, native object
/// pools, and inflight bookkeeping for one logical device and queue.
/// Single-threaded: nothing here is internally synchronized.
pub struct Device {
    pub(crate) device: ash::Device,
    pub(crate) allocator: ManuallyDrop<vk_mem::Allocator>,
    pub(crate) queue: vk::Queue,
    pub registry: ResourceRegistry,
    pub(crate) render_passes: RenderPassCache,
    pub(crate) framebuffers: FramebufferCache,
    pub(crate) cmd_pool: CommandPool,
    pub(crate) fences: FencePool,
    pub(crate) semaphores: SemaphorePool,
    pub(crate) descriptor_pool: vk::DescriptorPool,
    pub(crate) inflight: InflightContext,
    pub(crate) swapchain_loader: ash::extensions::khr::Swapchain,
}

const MAX_DESCRIPTOR_SETS: u32 = 2048;

impl Device {
    pub fn new(info: &DeviceInfo) -> Result<Self> {
        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            info.instance,
            &info.device,
            info.physical_device,
        ))?;

        let cmd_pool = CommandPool::new(&info.device, info.queue_family_index)?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
        ];
        let descriptor_pool = unsafe {
            info.device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(MAX_DESCRIPTOR_SETS)
                    .pool_sizes(&pool_sizes),
                None,
            )
        }?;

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(info.instance, &info.device);

        Ok(Self {
            device: info.device.clone(),
            allocator: ManuallyDrop::new(allocator),
            queue: info.queue,
            registry: ResourceRegistry::default(),
            render_passes: RenderPassCache::default(),
            framebuffers: FramebufferCache::default(),
            cmd_pool,
            fences: FencePool::default(),
            semaphores: SemaphorePool::default(),
            descriptor_pool,
            inflight: InflightContext::default(),
            swapchain_loader,
        })
    }

    /// Seal an encoder's stream against this device's registry.
    pub fn finish(&self, encoder: crate::CommandEncoder) -> Result<CommandBuffer> {
        encoder.finish(&self.registry)
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    pub fn make_buffer(&mut self, info: &BufferInfo) -> Result<Handle<Buffer>> {
        let mappable = matches!(info.visibility, MemoryVisibility::CpuAndGpu);
        let create_info = vk_mem::AllocationCreateInfo {
            usage: if mappable {
                vk_mem::MemoryUsage::AutoPreferHost
            } else {
                vk_mem::MemoryUsage::Auto
            },
            flags: if mappable {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let (buffer, mut allocation) = unsafe {
            self.allocator.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(info.byte_size)
                    .usage(vk_buffer_usage(info.usage))
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                &create_info,
            )
        }?;

        if let Some(data) = info.initial_data {
            if !mappable {
                unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                return Err(GPUError::ConfigError(
                    "initial_data requires CpuAndGpu visibility",
                ));
            }
            unsafe {
                let mapped = self.allocator.map_memory(&mut allocation)?;
                std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());
                self.allocator.unmap_memory(&mut allocation);
            }
        }

        self.registry
            .buffers
            .insert(Buffer {
                buf: buffer,
                alloc: Some(allocation),
                size: info.byte_size,
                usage: info.usage,
                visibility: info.visibility,
            })
            .ok_or(GPUError::SlotError())
    }

    pub fn destroy_buffer(&mut self, handle: Handle<Buffer>) {
        if let Some(mut buffer) = self.registry.buffers.release(handle) {
            if let Some(alloc) = buffer.alloc.as_mut() {
                unsafe { self.allocator.destroy_buffer(buffer.buf, alloc) };
            }
        }
    }

    pub fn make_texture(&mut self, info: &TextureInfo) -> Result<Handle<Texture>> {
        let mut usage = vk_image_usage(info.usage);
        if info.mip_levels > 1 {
            // Mip generation blits within the image.
            usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        }

        let (image, allocation) = unsafe {
            self.allocator.create_image(
                &vk::ImageCreateInfo::builder()
                    .image_type(vk::ImageType::TYPE_2D)
                    .extent(vk::Extent3D {
                        width: info.dim[0],
                        height: info.dim[1],
                        depth: info.dim[2].max(1),
                    })
                    .array_layers(info.layers)
                    .mip_levels(info.mip_levels)
                    .format(info.format.into())
                    .samples(info.sample_count.into())
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(usage)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::Auto,
                    ..Default::default()
                },
            )
        }?;

        self.registry
            .textures
            .insert(Texture {
                img: image,
                alloc: Some(allocation),
                dim: info.dim,
                layers: info.layers,
                mip_levels: info.mip_levels,
                format: info.format,
                sample_count: info.sample_count,
                usage: info.usage,
                aspect: aspect_for_format(info.format),
                final_layout: final_layout_for_usage(info.usage),
            })
            .ok_or(GPUError::SlotError())
    }

    pub fn destroy_texture(&mut self, handle: Handle<Texture>) {
        if let Some(mut texture) = self.registry.textures.release(handle) {
            if let Some(alloc) = texture.alloc.as_mut() {
                unsafe { self.allocator.destroy_image(texture.img, alloc) };
            }
        }
    }

    pub fn make_texture_view(&mut self, info: &TextureViewInfo) -> Result<Handle<TextureView>> {
        let texture = self.registry.texture(info.texture)?;
        let aspect: vk::ImageAspectFlags = info.aspect.into();
        let view_type = if info.layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view = unsafe {
            self.device.create_image_view(
                &vk::ImageViewCreateInfo::builder()
                    .image(texture.img)
                    .view_type(view_type)
                    .format(texture.format.into())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect,
                        base_mip_level: info.base_mip_level,
                        level_count: info.mip_level_count,
                        base_array_layer: info.base_layer,
                        layer_count: info.layer_count,
                    }),
                None,
            )
        }?;
        self.registry
            .texture_views
            .insert(TextureView {
                view,
                texture: info.texture,
                base_mip_level: info.base_mip_level,
                mip_level_count: info.mip_level_count,
                aspect,
            })
            .ok_or(GPUError::SlotError())
    }

    pub fn destroy_texture_view(&mut self, handle: Handle<TextureView>) {
        if let Some(view) = self.registry.texture_views.release(handle) {
            unsafe { self.device.destroy_image_view(view.view, None) };
        }
    }

    pub fn make_sampler(&mut self, info: &SamplerInfo) -> Result<Handle<Sampler>> {
        let sampler = unsafe {
            self.device.create_sampler(
                &vk::SamplerCreateInfo::builder()
                    .mag_filter(info.mag_filter.into())
                    .min_filter(info.min_filter.into())
                    .mipmap_mode(info.mipmap_filter.into())
                    .address_mode_u(info.address_mode_u.into())
                    .address_mode_v(info.address_mode_v.into())
                    .address_mode_w(info.address_mode_w.into())
                    .anisotropy_enable(info.anisotropy_enable)
                    .max_anisotropy(info.max_anisotropy)
                    .max_lod(vk::LOD_CLAMP_NONE),
                None,
            )
        }?;
        self.registry
            .samplers
            .insert(Sampler { sampler })
            .ok_or(GPUError::SlotError())
    }

    pub fn destroy_sampler(&mut self, handle: Handle<Sampler>) {
        if let Some(sampler) = self.registry.samplers.release(handle) {
            unsafe { self.device.destroy_sampler(sampler.sampler, None) };
        }
    }

    pub fn make_bind_group_layout(
        &mut self,
        info: &BindGroupLayoutInfo,
    ) -> Result<Handle<BindGroupLayout>> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = info
            .entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(entry.binding)
                    .descriptor_type(descriptor_type(entry.ty))
                    .descriptor_count(1)
                    .stage_flags(entry.stages.to_vk())
                    .build()
            })
            .collect();
        let layout = unsafe {
            self.device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings),
                None,
            )
        }?;
        self.registry
            .bind_group_layouts
            .insert(BindGroupLayout {
                layout,
                entries: info.entries.to_vec(),
            })
            .ok_or(GPUError::SlotError())
    }

    pub fn destroy_bind_group_layout(&mut self, handle: Handle<BindGroupLayout>) {
        if let Some(layout) = self.registry.bind_group_layouts.release(handle) {
            unsafe {
                self.device
                    .destroy_descriptor_set_layout(layout.layout, None)
            };
        }
    }

    pub fn make_bind_group(&mut self, info: &BindGroupInfo) -> Result<Handle<BindGroup>> {
        let layout = self.registry.bind_group_layout(info.layout)?;
        let entries = layout.entries.clone();
        let set_layouts = [layout.layout];
        let set = unsafe {
            self.device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(self.descriptor_pool)
                    .set_layouts(&set_layouts),
            )
        }?[0];

        enum InfoSlot {
            Buf(usize),
            Img(usize),
        }
        let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::new();
        let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::new();
        let mut plan: Vec<(u32, vk::DescriptorType, InfoSlot)> = Vec::new();

        for binding in info.bindings {
            match binding {
                BindingResource::Buffer(b) => {
                    let entry = entries
                        .iter()
                        .find(|e| e.binding == b.index)
                        .ok_or(GPUError::ConfigError("binding index not in layout"))?;
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: self.registry.buffer(b.buffer)?.buf,
                        offset: b.offset,
                        range: if b.size == 0 { vk::WHOLE_SIZE } else { b.size },
                    });
                    plan.push((
                        b.index,
                        descriptor_type(entry.ty),
                        InfoSlot::Buf(buffer_infos.len() - 1),
                    ));
                }
                BindingResource::Texture(t) => {
                    let entry = entries
                        .iter()
                        .find(|e| e.binding == t.index)
                        .ok_or(GPUError::ConfigError("binding index not in layout"))?;
                    let layout = match entry.ty {
                        BindingType::StorageTexture => vk::ImageLayout::GENERAL,
                        _ => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    };
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: self.registry.texture_view(t.view)?.view,
                        image_layout: layout,
                    });
                    plan.push((
                        t.index,
                        descriptor_type(entry.ty),
                        InfoSlot::Img(image_infos.len() - 1),
                    ));
                }
                BindingResource::Sampler(s) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: self.registry.sampler(s.sampler)?.sampler,
                        image_view: vk::ImageView::null(),
                        image_layout: vk::ImageLayout::UNDEFINED,
                    });
                    plan.push((
                        s.index,
                        vk::DescriptorType::SAMPLER,
                        InfoSlot::Img(image_infos.len() - 1),
                    ));
                }
            }
        }

        let writes: Vec<vk::WriteDescriptorSet> = plan
            .iter()
            .map(|(binding, ty, slot)| {
                let mut write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty);
                match slot {
                    InfoSlot::Buf(i) => {
                        write = write.buffer_info(std::slice::from_ref(&buffer_infos[*i]));
                    }
                    InfoSlot::Img(i) => {
                        write = write.image_info(std::slice::from_ref(&image_infos[*i]));
                    }
                }
                write.build()
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };

        self.registry
            .bind_groups
            .insert(BindGroup {
                set,
                layout: info.layout,
                bindings: info.bindings.to_vec(),
            })
            .ok_or(GPUError::SlotError())
    }

    pub fn destroy_bind_group(&mut self, handle: Handle<BindGroup>) {
        if let Some(group) = self.registry.bind_groups.release(handle) {
            unsafe {
                let _ = self
                    .device
                    .free_descriptor_sets(self.descriptor_pool, &[group.set]);
            }
        }
    }

    pub fn make_query_set(&mut self, info: &QuerySetInfo) -> Result<Handle<QuerySet>> {
        let query_type = match info.ty {
            QueryType::Occlusion => vk::QueryType::OCCLUSION,
            QueryType::Timestamp => vk::QueryType::TIMESTAMP,
        };
        let pool = unsafe {
            self.device.create_query_pool(
                &vk::QueryPoolCreateInfo::builder()
                    .query_type(query_type)
                    .query_count(info.count),
                None,
            )
        }?;
        self.registry
            .query_sets
            .insert(QuerySet {
                pool,
                ty: info.ty,
                count: info.count,
            })
            .ok_or(GPUError::SlotError())
    }

    pub fn destroy_query_set(&mut self, handle: Handle<QuerySet>) {
        if let Some(qs) = self.registry.query_sets.release(handle) {
            unsafe { self.device.destroy_query_pool(qs.pool, None) };
        }
    }

    pub fn register_render_pipeline(
        &mut self,
        info: &RenderPipelineInfo,
    ) -> Result<Handle<RenderPipeline>> {
        self.registry
            .render_pipelines
            .insert(RenderPipeline {
                pipeline: info.pipeline,
                layout: info.layout,
            })
            .ok_or(GPUError::SlotError())
    }

    pub fn register_compute_pipeline(
        &mut self,
        info: &ComputePipelineInfo,
    ) -> Result<Handle<ComputePipeline>> {
        self.registry
            .compute_pipelines
            .insert(ComputePipeline {
                pipeline: info.pipeline,
                layout: info.layout,
            })
            .ok_or(GPUError::SlotError())
    }

    /// Drops the registration only; the native pipeline belongs to its
    /// compiler.
    pub fn unregister_render_pipeline(&mut self, handle: Handle<RenderPipeline>) {
        self.registry.render_pipelines.release(handle);
    }

    pub fn unregister_compute_pipeline(&mut self, handle: Handle<ComputePipeline>) {
        self.registry.compute_pipelines.release(handle);
    }
}

fn descriptor_type(ty: BindingType) -> vk::DescriptorType {
    match ty {
        BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            dynamic_offset,
        } => {
            if dynamic_offset {
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            } else {
                vk::DescriptorType::UNIFORM_BUFFER
            }
        }
        BindingType::Buffer { dynamic_offset, .. } => {
            if dynamic_offset {
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
            } else {
                vk::DescriptorType::STORAGE_BUFFER
            }
        }
        BindingType::SampledTexture => vk::DescriptorType::SAMPLED_IMAGE,
        BindingType::StorageTexture => vk::DescriptorType::STORAGE_IMAGE,
        BindingType::Sampler => vk::DescriptorType::SAMPLER,
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        debug!("tearing down device");
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        self.inflight.clear_all();

        for mut buffer in self.registry.buffers.drain() {
            if let Some(alloc) = buffer.alloc.as_mut() {
                unsafe { self.allocator.destroy_buffer(buffer.buf, alloc) };
            }
        }
        for view in self.registry.texture_views.drain() {
            unsafe { self.device.destroy_image_view(view.view, None) };
        }
        for mut texture in self.registry.textures.drain() {
            if let Some(alloc) = texture.alloc.as_mut() {
                unsafe { self.allocator.destroy_image(texture.img, alloc) };
            }
        }
        for sampler in self.registry.samplers.drain() {
            unsafe { self.device.destroy_sampler(sampler.sampler, None) };
        }
        for layout in self.registry.bind_group_layouts.drain() {
            unsafe {
                self.device
                    .destroy_descriptor_set_layout(layout.layout, None)
            };
        }
        for qs in self.registry.query_sets.drain() {
            unsafe { self.device.destroy_query_pool(qs.pool, None) };
        }
        // Descriptor sets go with their pool; registered pipelines stay with
        // their compiler.
        self.registry.bind_groups.drain();
        self.registry.render_pipelines.drain();
        self.registry.compute_pipelines.drain();

        self.render_passes.clear(&self.device);
        self.framebuffers.clear(&self.device);
        self.cmd_pool.destroy(&self.device);
        self.fences.destroy(&self.device);
        self.semaphores.destroy(&self.device);
        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            ManuallyDrop::drop(&mut self.allocator);
        }
    }
}
