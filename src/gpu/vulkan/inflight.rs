use std::collections::{HashMap, HashSet};

use ash::vk;

use crate::{BindingResource, Command, Result};

use super::ResourceRegistry;

/// Every native handle a submission references, gathered by walking its
/// command streams through the registry. While the owning fence is pending,
/// none of these may be destroyed or recycled.
#[derive(Debug, Default, Clone)]
pub struct InflightObjects {
    pub command_buffers: HashSet<vk::CommandBuffer>,
    pub buffers: HashSet<vk::Buffer>,
    pub images: HashSet<vk::Image>,
    pub image_views: HashSet<vk::ImageView>,
    pub samplers: HashSet<vk::Sampler>,
    pub pipelines: HashSet<vk::Pipeline>,
    pub pipeline_layouts: HashSet<vk::PipelineLayout>,
    pub descriptor_sets: HashSet<vk::DescriptorSet>,
    pub descriptor_set_layouts: HashSet<vk::DescriptorSetLayout>,
    pub render_passes: HashSet<vk::RenderPass>,
    pub framebuffers: HashSet<vk::Framebuffer>,
    pub semaphores: HashSet<vk::Semaphore>,
}

impl InflightObjects {
    pub fn gather(commands: &[Command], registry: &ResourceRegistry) -> Result<Self> {
        let mut out = Self::default();
        for cmd in commands {
            match cmd {
                Command::BeginRenderPass(desc) => {
                    for color in &desc.color_attachments {
                        out.add_view(color.view, registry)?;
                        if let Some(rv) = color.resolve_view {
                            out.add_view(rv, registry)?;
                        }
                    }
                    if let Some(depth) = &desc.depth_stencil_attachment {
                        out.add_view(depth.view, registry)?;
                    }
                }
                Command::SetRenderPipeline(handle) => {
                    let p = registry.render_pipeline(*handle)?;
                    out.pipelines.insert(p.pipeline);
                    out.pipeline_layouts.insert(p.layout);
                }
                Command::SetComputePipeline(handle) => {
                    let p = registry.compute_pipeline(*handle)?;
                    out.pipelines.insert(p.pipeline);
                    out.pipeline_layouts.insert(p.layout);
                }
                Command::SetBindGroup { group, .. } => {
                    let group = registry.bind_group(*group)?;
                    out.descriptor_sets.insert(group.set);
                    out.descriptor_set_layouts
                        .insert(registry.bind_group_layout(group.layout)?.layout);
                    for binding in &group.bindings {
                        match binding {
                            BindingResource::Buffer(b) => {
                                out.buffers.insert(registry.buffer(b.buffer)?.buf);
                            }
                            BindingResource::Texture(t) => {
                                out.add_view(t.view, registry)?;
                            }
                            BindingResource::Sampler(s) => {
                                out.samplers.insert(registry.sampler(s.sampler)?.sampler);
                            }
                        }
                    }
                }
                Command::SetVertexBuffer { buffer, .. }
                | Command::SetIndexBuffer { buffer, .. } => {
                    out.buffers.insert(registry.buffer(*buffer)?.buf);
                }
                Command::CopyBufferToBuffer { src, dst, .. } => {
                    out.buffers.insert(registry.buffer(*src)?.buf);
                    out.buffers.insert(registry.buffer(*dst)?.buf);
                }
                Command::CopyBufferToTexture { src, dst, .. } => {
                    out.buffers.insert(registry.buffer(*src)?.buf);
                    out.images.insert(registry.texture(dst.texture)?.img);
                }
                Command::CopyTextureToBuffer { src, dst, .. } => {
                    out.images.insert(registry.texture(src.texture)?.img);
                    out.buffers.insert(registry.buffer(*dst)?.buf);
                }
                Command::CopyTextureToTexture { src, dst, .. } => {
                    out.images.insert(registry.texture(src.texture)?.img);
                    out.images.insert(registry.texture(dst.texture)?.img);
                }
                Command::ResolveQuerySet { dst, .. } => {
                    out.buffers.insert(registry.buffer(*dst)?.buf);
                }
                _ => {}
            }
        }
        Ok(out)
    }

    fn add_view(
        &mut self,
        view: crate::utils::Handle<super::TextureView>,
        registry: &ResourceRegistry,
    ) -> Result<()> {
        let view = registry.texture_view(view)?;
        self.image_views.insert(view.view);
        self.images.insert(registry.texture(view.texture)?.img);
        Ok(())
    }

    pub fn merge(&mut self, other: InflightObjects) {
        self.command_buffers.extend(other.command_buffers);
        self.buffers.extend(other.buffers);
        self.images.extend(other.images);
        self.image_views.extend(other.image_views);
        self.samplers.extend(other.samplers);
        self.pipelines.extend(other.pipelines);
        self.pipeline_layouts.extend(other.pipeline_layouts);
        self.descriptor_sets.extend(other.descriptor_sets);
        self.descriptor_set_layouts.extend(other.descriptor_set_layouts);
        self.render_passes.extend(other.render_passes);
        self.framebuffers.extend(other.framebuffers);
        self.semaphores.extend(other.semaphores);
    }
}

/// Per-fence bookkeeping of submitted native objects. Released once the
/// caller has confirmed fence completion.
#[derive(Default)]
pub struct InflightContext {
    pending: HashMap<vk::Fence, InflightObjects>,
}

impl InflightContext {
    pub fn add(&mut self, fence: vk::Fence, objects: InflightObjects) {
        self.pending.entry(fence).or_default().merge(objects);
    }

    pub fn is_inflight_buffer(&self, buffer: vk::Buffer) -> bool {
        self.pending.values().any(|o| o.buffers.contains(&buffer))
    }

    pub fn is_inflight_image(&self, image: vk::Image) -> bool {
        self.pending.values().any(|o| o.images.contains(&image))
    }

    pub fn clear(&mut self, fence: vk::Fence) -> Option<InflightObjects> {
        self.pending.remove(&fence)
    }

    pub fn clear_all(&mut self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
