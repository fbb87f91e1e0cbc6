use ash::vk;

use crate::{Command, GPUError, RenderPassDesc, Rect2D, Result, Viewport};

use super::synchronizer::{BufferBarrier, ImageBarrier, ResourceSynchronizer};
use super::{ResourceRegistry, Texture};

/// Native-call surface the recorder drives.
///
/// The production sink issues `cmd_*` calls against a live command buffer
/// and resolves the render-pass/framebuffer caches; tests substitute a
/// capturing sink, which keeps the whole translation path runnable without
/// a device.
pub trait CommandSink {
    fn begin_render_pass(&mut self, desc: &RenderPassDesc, registry: &ResourceRegistry)
        -> Result<()>;
    fn end_render_pass(&mut self) -> Result<()>;
    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline)
        -> Result<()>;
    fn bind_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) -> Result<()>;
    fn bind_vertex_buffer(&mut self, slot: u32, buffer: vk::Buffer) -> Result<()>;
    fn bind_index_buffer(&mut self, buffer: vk::Buffer, ty: vk::IndexType) -> Result<()>;
    fn set_viewport(&mut self, viewport: &Viewport) -> Result<()>;
    fn set_scissor(&mut self, rect: &Rect2D) -> Result<()>;
    fn set_blend_constants(&mut self, color: [f32; 4]) -> Result<()>;
    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()>;
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<()>;
    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()>;
    fn begin_query(&mut self, pool: vk::QueryPool, index: u32) -> Result<()>;
    fn end_query(&mut self, pool: vk::QueryPool, index: u32) -> Result<()>;
    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy)
        -> Result<()>;
    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) -> Result<()>;
    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        region: vk::BufferImageCopy,
    ) -> Result<()>;
    fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::ImageCopy,
    ) -> Result<()>;
    fn blit_image(
        &mut self,
        src: vk::Image,
        dst: vk::Image,
        blit: vk::ImageBlit,
        filter: vk::Filter,
    ) -> Result<()>;
    fn resolve_query_set(
        &mut self,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        dst: vk::Buffer,
        dst_offset: u64,
    ) -> Result<()>;
    fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffers: &[BufferBarrier],
        images: &[ImageBarrier],
    ) -> Result<()>;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PassState {
    None,
    Render,
    Compute,
}

/// Second pass over a sealed command stream: drives the synchronizer at pass
/// boundaries and translates each record into its native counterpart.
pub struct CommandRecorder<'a, S: CommandSink> {
    sink: &'a mut S,
    registry: &'a ResourceRegistry,
    synchronizer: ResourceSynchronizer,
}

impl<'a, S: CommandSink> CommandRecorder<'a, S> {
    pub fn new(
        sink: &'a mut S,
        registry: &'a ResourceRegistry,
        synchronizer: ResourceSynchronizer,
    ) -> Self {
        Self {
            sink,
            registry,
            synchronizer,
        }
    }

    pub fn record(mut self, commands: &[Command]) -> Result<()> {
        let mut pass = PassState::None;
        let mut render_layout: Option<vk::PipelineLayout> = None;
        let mut compute_layout: Option<vk::PipelineLayout> = None;
        let mut pass_query_set: Option<vk::QueryPool> = None;
        let mut active_query: Option<(vk::QueryPool, u32)> = None;

        for cmd in commands {
            match cmd {
                Command::BeginComputePass => {
                    self.synchronizer.begin_pass();
                    pass = PassState::Compute;
                }
                Command::EndComputePass => {
                    pass = PassState::None;
                    compute_layout = None;
                }
                Command::BeginRenderPass(desc) => {
                    self.synchronizer.begin_pass();
                    self.synchronizer.activate_pass();
                    self.synchronizer.sync(self.sink, self.registry)?;
                    self.sink.begin_render_pass(desc, self.registry)?;
                    pass_query_set = match desc.occlusion_query_set {
                        Some(qs) => Some(self.registry.query_set(qs)?.pool),
                        None => None,
                    };
                    pass = PassState::Render;
                }
                Command::EndRenderPass => {
                    self.sink.end_render_pass()?;
                    pass = PassState::None;
                    render_layout = None;
                    pass_query_set = None;
                }
                Command::SetRenderPipeline(handle) => {
                    if pass != PassState::Render {
                        return Err(GPUError::NoActivePass);
                    }
                    let pipeline = self.registry.render_pipeline(*handle)?;
                    self.sink
                        .bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline)?;
                    render_layout = Some(pipeline.layout);
                }
                Command::SetComputePipeline(handle) => {
                    if pass != PassState::Compute {
                        return Err(GPUError::NoActivePass);
                    }
                    let pipeline = self.registry.compute_pipeline(*handle)?;
                    self.sink
                        .bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline.pipeline)?;
                    compute_layout = Some(pipeline.layout);
                }
                Command::SetBindGroup {
                    index,
                    group,
                    dynamic_offsets,
                } => {
                    let (bind_point, layout) = match pass {
                        PassState::Render => (
                            vk::PipelineBindPoint::GRAPHICS,
                            render_layout.ok_or(GPUError::NoPipelineBound)?,
                        ),
                        PassState::Compute => (
                            vk::PipelineBindPoint::COMPUTE,
                            compute_layout.ok_or(GPUError::NoPipelineBound)?,
                        ),
                        PassState::None => return Err(GPUError::NoActivePass),
                    };
                    if pass == PassState::Compute {
                        self.synchronizer
                            .activate_bind_group(*group, self.registry)?;
                    }
                    let set = self.registry.bind_group(*group)?.set;
                    self.sink
                        .bind_descriptor_set(bind_point, layout, *index, set, dynamic_offsets)?;
                }
                Command::SetVertexBuffer { slot, buffer } => {
                    if pass != PassState::Render {
                        return Err(GPUError::NoActivePass);
                    }
                    let buffer = self.registry.buffer(*buffer)?.buf;
                    self.sink.bind_vertex_buffer(*slot, buffer)?;
                }
                Command::SetIndexBuffer { buffer, format } => {
                    if pass != PassState::Render {
                        return Err(GPUError::NoActivePass);
                    }
                    let buffer = self.registry.buffer(*buffer)?.buf;
                    self.sink.bind_index_buffer(buffer, (*format).into())?;
                }
                Command::SetViewport(viewport) => {
                    if pass != PassState::Render {
                        return Err(GPUError::NoActivePass);
                    }
                    self.sink.set_viewport(viewport)?;
                }
                Command::SetScissor(rect) => {
                    if pass != PassState::Render {
                        return Err(GPUError::NoActivePass);
                    }
                    self.sink.set_scissor(rect)?;
                }
                Command::SetBlendConstant(color) => {
                    if pass != PassState::Render {
                        return Err(GPUError::NoActivePass);
                    }
                    self.sink.set_blend_constants(*color)?;
                }
                Command::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => {
                    if pass != PassState::Render {
                        return Err(GPUError::NoActivePass);
                    }
                    if render_layout.is_none() {
                        return Err(GPUError::NoPipelineBound);
                    }
                    self.sink
                        .draw(*vertex_count, *instance_count, *first_vertex, *first_instance)?;
                }
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex,
                    first_instance,
                } => {
                    if pass != PassState::Render {
                        return Err(GPUError::NoActivePass);
                    }
                    if render_layout.is_none() {
                        return Err(GPUError::NoPipelineBound);
                    }
                    self.sink.draw_indexed(
                        *index_count,
                        *instance_count,
                        *first_index,
                        *base_vertex,
                        *first_instance,
                    )?;
                }
                Command::Dispatch { x, y, z } => {
                    if pass != PassState::Compute {
                        return Err(GPUError::NoActivePass);
                    }
                    if compute_layout.is_none() {
                        return Err(GPUError::NoPipelineBound);
                    }
                    self.synchronizer.sync(self.sink, self.registry)?;
                    self.sink.dispatch(*x, *y, *z)?;
                }
                Command::BeginOcclusionQuery { query_index } => {
                    let pool = pass_query_set.ok_or(GPUError::NoActivePass)?;
                    self.sink.begin_query(pool, *query_index)?;
                    active_query = Some((pool, *query_index));
                }
                Command::EndOcclusionQuery => {
                    let (pool, index) = active_query.take().ok_or(GPUError::NoActivePass)?;
                    self.sink.end_query(pool, index)?;
                }
                Command::CopyBufferToBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let src = self.registry.buffer(*src)?.buf;
                    let dst = self.registry.buffer(*dst)?.buf;
                    self.sink.copy_buffer(
                        src,
                        dst,
                        vk::BufferCopy {
                            src_offset: *src_offset,
                            dst_offset: *dst_offset,
                            size: *size,
                        },
                    )?;
                }
                Command::CopyBufferToTexture {
                    src,
                    src_layout,
                    dst,
                    extent,
                } => {
                    self.copy_buffer_to_texture(*src, src_layout, dst, extent)?;
                }
                Command::CopyTextureToBuffer {
                    src,
                    dst,
                    dst_layout,
                    extent,
                } => {
                    let texture = self.registry.texture(src.texture)?;
                    let dst_buf = self.registry.buffer(*dst)?.buf;

                    self.transition(
                        texture,
                        src.mip_level,
                        1,
                        texture.final_layout,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_WRITE),
                        (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ),
                    )?;
                    self.sink.copy_image_to_buffer(
                        texture.img,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst_buf,
                        buffer_image_copy(texture, src, dst_layout, extent),
                    )?;
                    self.transition(
                        texture,
                        src.mip_level,
                        1,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        texture.final_layout,
                        (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ),
                        (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_READ),
                    )?;
                }
                Command::CopyTextureToTexture { src, dst, extent } => {
                    self.copy_texture_to_texture(src, dst, extent)?;
                }
                Command::ResolveQuerySet {
                    query_set,
                    first_query,
                    query_count,
                    dst,
                    dst_offset,
                } => {
                    let pool = self.registry.query_set(*query_set)?.pool;
                    let dst = self.registry.buffer(*dst)?.buf;
                    self.sink
                        .resolve_query_set(pool, *first_query, *query_count, dst, *dst_offset)?;
                }
            }
        }
        Ok(())
    }

    /// Buffer upload into a texture. A texture with a mip chain gets level 0
    /// uploaded and the remaining levels blitted down one at a time; each
    /// level transition stands alone because it depends on the blit just
    /// before it.
    fn copy_buffer_to_texture(
        &mut self,
        src: crate::utils::Handle<super::Buffer>,
        src_layout: &crate::TexelCopyBufferLayout,
        dst: &crate::TexelCopyTextureInfo,
        extent: &crate::Extent3D,
    ) -> Result<()> {
        use super::conversions::mip_dimensions;

        let texture = self.registry.texture(dst.texture)?;
        let src_buf = self.registry.buffer(src)?.buf;
        let mips = texture.mip_levels;
        let generate_mips = mips > 1 && dst.mip_level == 0;

        self.transition(
            texture,
            0,
            mips,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE),
        )?;

        self.sink.copy_buffer_to_image(
            src_buf,
            texture.img,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::BufferImageCopy {
                buffer_offset: src_layout.offset,
                buffer_row_length: src_layout.bytes_per_row,
                buffer_image_height: src_layout.rows_per_image,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: texture.aspect,
                    mip_level: dst.mip_level,
                    base_array_layer: 0,
                    layer_count: texture.layers,
                },
                image_offset: vk::Offset3D {
                    x: dst.origin.x as i32,
                    y: dst.origin.y as i32,
                    z: dst.origin.z as i32,
                },
                image_extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: extent.depth.max(1),
                },
            },
        )?;

        if generate_mips {
            let dim = texture.dim;
            for level in 1..mips {
                let src_dim = mip_dimensions(dim, level - 1);
                let dst_dim = mip_dimensions(dim, level);

                self.transition(
                    texture,
                    level - 1,
                    1,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE),
                    (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ),
                )?;
                self.sink.blit_image(
                    texture.img,
                    texture.img,
                    vk::ImageBlit {
                        src_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: texture.aspect,
                            mip_level: level - 1,
                            base_array_layer: 0,
                            layer_count: texture.layers,
                        },
                        src_offsets: blit_offsets(src_dim),
                        dst_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: texture.aspect,
                            mip_level: level,
                            base_array_layer: 0,
                            layer_count: texture.layers,
                        },
                        dst_offsets: blit_offsets(dst_dim),
                    },
                    vk::Filter::LINEAR,
                )?;
                self.transition(
                    texture,
                    level - 1,
                    1,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    texture.final_layout,
                    (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ),
                    (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_READ),
                )?;
            }
            self.transition(
                texture,
                mips - 1,
                1,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                texture.final_layout,
                (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE),
                (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_READ),
            )?;
        } else {
            self.transition(
                texture,
                0,
                mips,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                texture.final_layout,
                (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE),
                (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_READ),
            )?;
        }
        Ok(())
    }

    fn copy_texture_to_texture(
        &mut self,
        src: &crate::TexelCopyTextureInfo,
        dst: &crate::TexelCopyTextureInfo,
        extent: &crate::Extent3D,
    ) -> Result<()> {
        let src_tex = self.registry.texture(src.texture)?;
        let dst_tex = self.registry.texture(dst.texture)?;

        self.sink.pipeline_barrier(
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::TRANSFER,
            &[],
            &[
                level_barrier(
                    src_tex,
                    src.mip_level,
                    src_tex.final_layout,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::AccessFlags::MEMORY_WRITE,
                    vk::AccessFlags::TRANSFER_READ,
                ),
                level_barrier(
                    dst_tex,
                    dst.mip_level,
                    dst_tex.final_layout,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::MEMORY_WRITE,
                    vk::AccessFlags::TRANSFER_WRITE,
                ),
            ],
        )?;

        self.sink.copy_image(
            src_tex.img,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst_tex.img,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageCopy {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: src_tex.aspect,
                    mip_level: src.mip_level,
                    base_array_layer: 0,
                    layer_count: src_tex.layers,
                },
                src_offset: vk::Offset3D {
                    x: src.origin.x as i32,
                    y: src.origin.y as i32,
                    z: src.origin.z as i32,
                },
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: dst_tex.aspect,
                    mip_level: dst.mip_level,
                    base_array_layer: 0,
                    layer_count: dst_tex.layers,
                },
                dst_offset: vk::Offset3D {
                    x: dst.origin.x as i32,
                    y: dst.origin.y as i32,
                    z: dst.origin.z as i32,
                },
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: extent.depth.max(1),
                },
            },
        )?;

        self.sink.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::ALL_COMMANDS,
            &[],
            &[
                level_barrier(
                    src_tex,
                    src.mip_level,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    src_tex.final_layout,
                    vk::AccessFlags::TRANSFER_READ,
                    vk::AccessFlags::MEMORY_READ,
                ),
                level_barrier(
                    dst_tex,
                    dst.mip_level,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    dst_tex.final_layout,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::AccessFlags::MEMORY_READ,
                ),
            ],
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn transition(
        &mut self,
        texture: &Texture,
        base_mip_level: u32,
        level_count: u32,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src: (vk::PipelineStageFlags, vk::AccessFlags),
        dst: (vk::PipelineStageFlags, vk::AccessFlags),
    ) -> Result<()> {
        self.sink.pipeline_barrier(
            src.0,
            dst.0,
            &[],
            &[ImageBarrier {
                image: texture.img,
                src_access: src.1,
                dst_access: dst.1,
                old_layout,
                new_layout,
                aspect: texture.aspect,
                base_mip_level,
                level_count,
                base_layer: 0,
                layer_count: texture.layers,
            }],
        )
    }
}

fn level_barrier(
    texture: &Texture,
    mip_level: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> ImageBarrier {
    ImageBarrier {
        image: texture.img,
        src_access,
        dst_access,
        old_layout,
        new_layout,
        aspect: texture.aspect,
        base_mip_level: mip_level,
        level_count: 1,
        base_layer: 0,
        layer_count: texture.layers,
    }
}

fn buffer_image_copy(
    texture: &Texture,
    src: &crate::TexelCopyTextureInfo,
    dst_layout: &crate::TexelCopyBufferLayout,
    extent: &crate::Extent3D,
) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: dst_layout.offset,
        buffer_row_length: dst_layout.bytes_per_row,
        buffer_image_height: dst_layout.rows_per_image,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: texture.aspect,
            mip_level: src.mip_level,
            base_array_layer: 0,
            layer_count: texture.layers,
        },
        image_offset: vk::Offset3D {
            x: src.origin.x as i32,
            y: src.origin.y as i32,
            z: src.origin.z as i32,
        },
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: extent.depth.max(1),
        },
    }
}

/// Cached natives a sink resolved while recording, reported back so the
/// submission can pin them against its fence.
#[derive(Default)]
pub struct UsedNatives {
    pub render_passes: Vec<vk::RenderPass>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

/// Production sink: translates sink calls into `cmd_*` calls on one live
/// command buffer, resolving render passes and framebuffers through the
/// structural caches.
pub struct VulkanSink<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
    render_passes: &'a mut super::render_pass::RenderPassCache,
    framebuffers: &'a mut super::framebuffer::FramebufferCache,
    used: UsedNatives,
}

impl<'a> VulkanSink<'a> {
    pub fn new(
        device: &'a ash::Device,
        cmd: vk::CommandBuffer,
        render_passes: &'a mut super::render_pass::RenderPassCache,
        framebuffers: &'a mut super::framebuffer::FramebufferCache,
    ) -> Self {
        Self {
            device,
            cmd,
            render_passes,
            framebuffers,
            used: UsedNatives::default(),
        }
    }

    pub fn into_used(self) -> UsedNatives {
        self.used
    }
}

impl<'a> CommandSink for VulkanSink<'a> {
    fn begin_render_pass(
        &mut self,
        desc: &RenderPassDesc,
        registry: &ResourceRegistry,
    ) -> Result<()> {
        use super::framebuffer::FramebufferKey;
        use super::render_pass::RenderPassKey;

        let pass_key = RenderPassKey::from_desc(desc, registry)?;
        let render_pass = self.render_passes.get_or_create(self.device, &pass_key)?;
        let fb_key = FramebufferKey::from_desc(render_pass, desc, registry)?;
        let framebuffer = self.framebuffers.get_or_create(self.device, &fb_key)?;
        self.used.render_passes.push(render_pass);
        self.used.framebuffers.push(framebuffer);

        // One clear value per attachment, in attachment order.
        let mut clear_values: smallvec::SmallVec<[vk::ClearValue; 8]> = smallvec::SmallVec::new();
        for color in &desc.color_attachments {
            clear_values.push(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: color.clear_value,
                },
            });
        }
        if desc.color_attachments.iter().any(|c| c.resolve_view.is_some()) {
            for color in &desc.color_attachments {
                if color.resolve_view.is_some() {
                    clear_values.push(vk::ClearValue::default());
                }
            }
        }
        if let Some(depth) = &desc.depth_stencil_attachment {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: depth.clear_depth,
                    stencil: depth.clear_stencil,
                },
            });
        }

        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: fb_key.width,
                    height: fb_key.height,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(self.cmd, &info, vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        unsafe { self.device.cmd_end_render_pass(self.cmd) };
        Ok(())
    }

    fn bind_pipeline(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) -> Result<()> {
        unsafe { self.device.cmd_bind_pipeline(self.cmd, bind_point, pipeline) };
        Ok(())
    }

    fn bind_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                bind_point,
                layout,
                index,
                &[set],
                dynamic_offsets,
            );
        }
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: vk::Buffer) -> Result<()> {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.cmd, slot, &[buffer], &[0]);
        }
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, ty: vk::IndexType) -> Result<()> {
        unsafe { self.device.cmd_bind_index_buffer(self.cmd, buffer, 0, ty) };
        Ok(())
    }

    fn set_viewport(&mut self, viewport: &Viewport) -> Result<()> {
        unsafe {
            self.device.cmd_set_viewport(
                self.cmd,
                0,
                &[vk::Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.w,
                    height: viewport.h,
                    min_depth: viewport.min_depth,
                    max_depth: viewport.max_depth,
                }],
            );
        }
        Ok(())
    }

    fn set_scissor(&mut self, rect: &Rect2D) -> Result<()> {
        unsafe {
            self.device.cmd_set_scissor(
                self.cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D {
                        x: rect.x,
                        y: rect.y,
                    },
                    extent: vk::Extent2D {
                        width: rect.w,
                        height: rect.h,
                    },
                }],
            );
        }
        Ok(())
    }

    fn set_blend_constants(&mut self, color: [f32; 4]) -> Result<()> {
        unsafe { self.device.cmd_set_blend_constants(self.cmd, &color) };
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        unsafe {
            self.device.cmd_draw(
                self.cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<()> {
        unsafe {
            self.device.cmd_draw_indexed(
                self.cmd,
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        unsafe { self.device.cmd_dispatch(self.cmd, x, y, z) };
        Ok(())
    }

    fn begin_query(&mut self, pool: vk::QueryPool, index: u32) -> Result<()> {
        unsafe {
            self.device
                .cmd_begin_query(self.cmd, pool, index, vk::QueryControlFlags::empty());
        }
        Ok(())
    }

    fn end_query(&mut self, pool: vk::QueryPool, index: u32) -> Result<()> {
        unsafe { self.device.cmd_end_query(self.cmd, pool, index) };
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) -> Result<()> {
        unsafe { self.device.cmd_copy_buffer(self.cmd, src, dst, &[region]) };
        Ok(())
    }

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) -> Result<()> {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(self.cmd, src, dst, dst_layout, &[region]);
        }
        Ok(())
    }

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        region: vk::BufferImageCopy,
    ) -> Result<()> {
        unsafe {
            self.device
                .cmd_copy_image_to_buffer(self.cmd, src, src_layout, dst, &[region]);
        }
        Ok(())
    }

    fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::ImageCopy,
    ) -> Result<()> {
        unsafe {
            self.device
                .cmd_copy_image(self.cmd, src, src_layout, dst, dst_layout, &[region]);
        }
        Ok(())
    }

    fn blit_image(
        &mut self,
        src: vk::Image,
        dst: vk::Image,
        blit: vk::ImageBlit,
        filter: vk::Filter,
    ) -> Result<()> {
        unsafe {
            self.device.cmd_blit_image(
                self.cmd,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                filter,
            );
        }
        Ok(())
    }

    fn resolve_query_set(
        &mut self,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        dst: vk::Buffer,
        dst_offset: u64,
    ) -> Result<()> {
        unsafe {
            self.device.cmd_copy_query_pool_results(
                self.cmd,
                pool,
                first_query,
                query_count,
                dst,
                dst_offset,
                std::mem::size_of::<u64>() as u64,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            );
        }
        Ok(())
    }

    fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffers: &[BufferBarrier],
        images: &[ImageBarrier],
    ) -> Result<()> {
        let buffer_barriers: Vec<vk::BufferMemoryBarrier> = buffers
            .iter()
            .map(|b| {
                vk::BufferMemoryBarrier::builder()
                    .src_access_mask(b.src_access)
                    .dst_access_mask(b.dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(b.buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
                    .build()
            })
            .collect();
        let image_barriers: Vec<vk::ImageMemoryBarrier> = images
            .iter()
            .map(|i| {
                vk::ImageMemoryBarrier::builder()
                    .src_access_mask(i.src_access)
                    .dst_access_mask(i.dst_access)
                    .old_layout(i.old_layout)
                    .new_layout(i.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(i.image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: i.aspect,
                        base_mip_level: i.base_mip_level,
                        level_count: i.level_count,
                        base_array_layer: i.base_layer,
                        layer_count: i.layer_count,
                    })
                    .build()
            })
            .collect();
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::BY_REGION,
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
        Ok(())
    }
}

fn blit_offsets(dim: [u32; 3]) -> [vk::Offset3D; 2] {
    [
        vk::Offset3D { x: 0, y: 0, z: 0 },
        vk::Offset3D {
            x: dim[0] as i32,
            y: dim[1] as i32,
            z: dim[2].max(1) as i32,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::vulkan::test_support::*;
    use crate::*;

    fn record(reg: &ResourceRegistry, commands: &[Command]) -> Result<CapturingSink> {
        let mut tracker = ResourceTracker::new();
        for c in commands {
            tracker.track(c, reg)?;
        }
        let mut sink = CapturingSink::default();
        let recorder = CommandRecorder::new(
            &mut sink,
            reg,
            ResourceSynchronizer::new(tracker.finish()),
        );
        recorder.record(commands)?;
        Ok(sink)
    }

    #[test]
    fn clear_only_pass_records_begin_end_with_no_barriers() {
        let mut reg = ResourceRegistry::default();
        let (_t0, v0) = fake_render_target(&mut reg);
        let (_t1, v1) = fake_render_target(&mut reg);

        let desc = RenderPassDesc {
            color_attachments: smallvec::smallvec![
                ColorAttachment {
                    view: v0,
                    load_op: LoadOp::Clear,
                    ..Default::default()
                },
                ColorAttachment {
                    view: v1,
                    load_op: LoadOp::Clear,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let sink = record(
            &reg,
            &[Command::BeginRenderPass(desc), Command::EndRenderPass],
        )
        .unwrap();

        assert_eq!(sink.calls.len(), 2);
        assert!(matches!(
            sink.calls[0],
            SinkCall::BeginRenderPass { clear_count: 2, .. }
        ));
        assert!(matches!(sink.calls[1], SinkCall::EndRenderPass));
        assert!(sink.barriers.is_empty());
    }

    #[test]
    fn draw_without_pipeline_is_rejected() {
        let mut reg = ResourceRegistry::default();
        let (_t, v) = fake_render_target(&mut reg);
        let desc = RenderPassDesc {
            color_attachments: smallvec::smallvec![ColorAttachment {
                view: v,
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = record(
            &reg,
            &[
                Command::BeginRenderPass(desc),
                Command::Draw {
                    vertex_count: 3,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0,
                },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, GPUError::NoPipelineBound));
    }

    #[test]
    fn pass_scoped_commands_outside_a_pass_are_rejected() {
        let mut reg = ResourceRegistry::default();
        let buf = fake_buffer(&mut reg, BufferUsages::VERTEX);
        let err = record(&reg, &[Command::SetVertexBuffer { slot: 0, buffer: buf }]).unwrap_err();
        assert!(matches!(err, GPUError::NoActivePass));
    }

    #[test]
    fn draws_and_dispatches_outside_a_pass_name_the_pass_misuse() {
        let reg = ResourceRegistry::default();
        let err = record(
            &reg,
            &[Command::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, GPUError::NoActivePass));

        let err = record(&reg, &[Command::Dispatch { x: 1, y: 1, z: 1 }]).unwrap_err();
        assert!(matches!(err, GPUError::NoActivePass));
    }

    #[test]
    fn compute_barrier_lands_before_the_dispatch() {
        let mut reg = ResourceRegistry::default();
        let buf = fake_buffer(&mut reg, BufferUsages::STORAGE);
        let group = fake_storage_group(&mut reg, buf);
        let pipeline = fake_compute_pipeline(&mut reg);

        let stream = [
            Command::BeginComputePass,
            Command::SetComputePipeline(pipeline),
            Command::SetBindGroup {
                index: 0,
                group,
                dynamic_offsets: Default::default(),
            },
            Command::Dispatch { x: 1, y: 1, z: 1 },
            Command::EndComputePass,
            Command::BeginComputePass,
            Command::SetComputePipeline(pipeline),
            Command::SetBindGroup {
                index: 0,
                group,
                dynamic_offsets: Default::default(),
            },
            Command::Dispatch { x: 1, y: 1, z: 1 },
            Command::EndComputePass,
        ];
        let sink = record(&reg, &stream).unwrap();

        // One barrier total, positioned between the second bind and the
        // second dispatch.
        assert_eq!(sink.barriers.len(), 1);
        let barrier_pos = sink
            .calls
            .iter()
            .position(|c| matches!(c, SinkCall::PipelineBarrier { .. }))
            .unwrap();
        let last_dispatch = sink
            .calls
            .iter()
            .rposition(|c| matches!(c, SinkCall::Dispatch { .. }))
            .unwrap();
        assert_eq!(barrier_pos + 1, last_dispatch);
    }

    #[test]
    fn mip_chain_upload_blits_each_level_with_unbatched_barriers() {
        let mut reg = ResourceRegistry::default();
        let tex = fake_texture(
            &mut reg,
            [64, 64, 1],
            4,
            TextureUsages::SAMPLED | TextureUsages::COPY_DST | TextureUsages::COPY_SRC,
        );
        let buf = fake_buffer(&mut reg, BufferUsages::COPY_SRC);

        let stream = [Command::CopyBufferToTexture {
            src: buf,
            src_layout: TexelCopyBufferLayout::default(),
            dst: TexelCopyTextureInfo {
                texture: tex,
                ..Default::default()
            },
            extent: Extent3D {
                width: 64,
                height: 64,
                depth: 1,
            },
        }];
        let sink = record(&reg, &stream).unwrap();

        let blits: Vec<_> = sink
            .calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, SinkCall::Blit { .. }))
            .collect();
        assert_eq!(blits.len(), 3);

        // Every blit sits between its own source-level transition and its
        // own restore; no transition barrier covers more than one level.
        for &(pos, call) in &blits {
            let SinkCall::Blit { src_mip, dst_mip } = call else {
                unreachable!()
            };
            assert_eq!(*dst_mip, src_mip + 1);
            let before = &sink.calls[pos - 1];
            let after = &sink.calls[pos + 1];
            let SinkCall::PipelineBarrier { images, .. } = before else {
                panic!("expected a transition before each blit");
            };
            assert_eq!(images.len(), 1);
            assert_eq!(images[0].base_mip_level, *src_mip);
            assert_eq!(images[0].level_count, 1);
            assert_eq!(images[0].new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            let SinkCall::PipelineBarrier { images, .. } = after else {
                panic!("expected a restore after each blit");
            };
            assert_eq!(images.len(), 1);
            assert_eq!(images[0].base_mip_level, *src_mip);
            assert_eq!(images[0].old_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        }
    }

    #[test]
    fn texture_to_buffer_copy_is_bracketed_by_layout_transitions() {
        let mut reg = ResourceRegistry::default();
        let tex = fake_texture(
            &mut reg,
            [32, 32, 1],
            1,
            TextureUsages::SAMPLED | TextureUsages::COPY_SRC,
        );
        let buf = fake_buffer(&mut reg, BufferUsages::COPY_DST);

        let stream = [Command::CopyTextureToBuffer {
            src: TexelCopyTextureInfo {
                texture: tex,
                ..Default::default()
            },
            dst: buf,
            dst_layout: TexelCopyBufferLayout::default(),
            extent: Extent3D {
                width: 32,
                height: 32,
                depth: 1,
            },
        }];
        let sink = record(&reg, &stream).unwrap();

        assert_eq!(sink.calls.len(), 3);
        let SinkCall::PipelineBarrier { images, .. } = &sink.calls[0] else {
            panic!("expected a transition before the copy");
        };
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(images[0].new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert!(matches!(sink.calls[1], SinkCall::CopyImageToBuffer));
        let SinkCall::PipelineBarrier { images, .. } = &sink.calls[2] else {
            panic!("expected a restore after the copy");
        };
        assert_eq!(images[0].old_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(images[0].new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn texture_to_texture_copy_transitions_both_images_together() {
        let mut reg = ResourceRegistry::default();
        let src = fake_texture(
            &mut reg,
            [32, 32, 1],
            1,
            TextureUsages::SAMPLED | TextureUsages::COPY_SRC,
        );
        let dst = fake_texture(
            &mut reg,
            [32, 32, 1],
            1,
            TextureUsages::SAMPLED | TextureUsages::COPY_DST,
        );

        let stream = [Command::CopyTextureToTexture {
            src: TexelCopyTextureInfo {
                texture: src,
                ..Default::default()
            },
            dst: TexelCopyTextureInfo {
                texture: dst,
                ..Default::default()
            },
            extent: Extent3D {
                width: 32,
                height: 32,
                depth: 1,
            },
        }];
        let sink = record(&reg, &stream).unwrap();

        assert_eq!(sink.calls.len(), 3);
        let src_img = reg.texture(src).unwrap().img;
        let dst_img = reg.texture(dst).unwrap().img;

        let SinkCall::PipelineBarrier { images, .. } = &sink.calls[0] else {
            panic!("expected a transition before the copy");
        };
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].image, src_img);
        assert_eq!(images[0].new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(images[1].image, dst_img);
        assert_eq!(images[1].new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        assert!(matches!(sink.calls[1], SinkCall::CopyImage));

        let SinkCall::PipelineBarrier { images, .. } = &sink.calls[2] else {
            panic!("expected a restore after the copy");
        };
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].old_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(images[0].new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(images[1].old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(images[1].new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn occlusion_queries_use_the_pass_query_set() {
        let mut reg = ResourceRegistry::default();
        let (_t, v) = fake_render_target(&mut reg);
        let qs = fake_query_set(&mut reg, 8);
        let pipeline = fake_render_pipeline(&mut reg);

        let desc = RenderPassDesc {
            color_attachments: smallvec::smallvec![ColorAttachment {
                view: v,
                ..Default::default()
            }],
            occlusion_query_set: Some(qs),
            ..Default::default()
        };
        let stream = [
            Command::BeginRenderPass(desc),
            Command::SetRenderPipeline(pipeline),
            Command::BeginOcclusionQuery { query_index: 2 },
            Command::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
            Command::EndOcclusionQuery,
            Command::EndRenderPass,
        ];
        let sink = record(&reg, &stream).unwrap();
        assert!(sink
            .calls
            .iter()
            .any(|c| matches!(c, SinkCall::BeginQuery { index: 2 })));
        assert!(sink.calls.iter().any(|c| matches!(c, SinkCall::EndQuery)));
    }
}
