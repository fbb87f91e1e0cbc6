use std::collections::HashSet;

use ash::vk;
use log::trace;
use smallvec::SmallVec;

use crate::utils::Handle;
use crate::{BindingResource, Result};

use super::recorder::CommandSink;
use super::tracker::PassResources;
use super::{BindGroup, Buffer, ResourceRegistry, Texture};

/// One buffer-memory-barrier entry of a batched pipeline barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// One image-memory-barrier entry, carrying the layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

/// Walks the sealed per-pass tables in recording order and emits the minimal
/// barrier set between producer and consumer passes.
///
/// The recorder drives it: every pass begin advances the pass cursor, a
/// render pass begin activates all of the pass's consumed resources, a
/// compute bind group activates that group's resources, and `sync` runs at
/// render pass begin and before each dispatch. A consumed resource whose
/// producer was already drained (or never existed) is skipped without a
/// barrier; first use in a stream is assumed synchronized by its creator.
pub struct ResourceSynchronizer {
    passes: Vec<PassResources>,
    current: Option<usize>,
    activated_buffers: HashSet<Handle<Buffer>>,
    activated_textures: HashSet<Handle<Texture>>,
}

impl ResourceSynchronizer {
    pub fn new(passes: Vec<PassResources>) -> Self {
        Self {
            passes,
            current: None,
            activated_buffers: HashSet::new(),
            activated_textures: HashSet::new(),
        }
    }

    /// Advance to the next pass in the stream.
    pub fn begin_pass(&mut self) {
        self.current = Some(match self.current {
            Some(i) => i + 1,
            None => 0,
        });
    }

    /// Activate every resource the current pass consumes. Used at render
    /// pass begin, where all reads are declared up front.
    pub fn activate_pass(&mut self) {
        let Some(pass) = self.current.and_then(|i| self.passes.get(i)) else {
            return;
        };
        self.activated_buffers.extend(pass.consumed_buffers.keys());
        self.activated_textures.extend(pass.consumed_textures.keys());
    }

    /// Activate the resources of one bind group. Used in compute passes,
    /// where reads become known group by group.
    pub fn activate_bind_group(
        &mut self,
        group: Handle<BindGroup>,
        registry: &ResourceRegistry,
    ) -> Result<()> {
        let group = registry.bind_group(group)?;
        for binding in &group.bindings {
            match binding {
                BindingResource::Buffer(b) => {
                    self.activated_buffers.insert(b.buffer);
                }
                BindingResource::Texture(t) => {
                    let view = registry.texture_view(t.view)?;
                    self.activated_textures.insert(view.texture);
                }
                BindingResource::Sampler(_) => {}
            }
        }
        Ok(())
    }

    /// Emit at most one pipeline barrier covering every activated resource
    /// of the current pass with a not-yet-consumed producer in an earlier
    /// pass. Consuming a producer removes it, so each write is bridged by
    /// exactly one barrier. The activated set is cleared afterwards.
    pub fn sync(&mut self, sink: &mut dyn CommandSink, registry: &ResourceRegistry) -> Result<()> {
        let Some(cur) = self.current else {
            return Ok(());
        };
        if cur >= self.passes.len() {
            return Ok(());
        }

        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();
        let mut buffer_barriers: SmallVec<[BufferBarrier; 4]> = SmallVec::new();
        let mut image_barriers: SmallVec<[ImageBarrier; 4]> = SmallVec::new();

        for handle in self.activated_buffers.drain() {
            let Some(consumer) = self.passes[cur].consumed_buffers.get(&handle).copied() else {
                continue;
            };
            let mut producer = None;
            for earlier in self.passes[..cur].iter_mut() {
                if let Some(p) = earlier.produced_buffers.remove(&handle) {
                    producer = Some(p);
                    break;
                }
            }
            let Some(producer) = producer else {
                continue;
            };
            self.passes[cur].consumed_buffers.remove(&handle);

            src_stage |= producer.stage;
            dst_stage |= consumer.stage;
            buffer_barriers.push(BufferBarrier {
                buffer: registry.buffer(handle)?.buf,
                src_access: producer.access,
                dst_access: consumer.access,
            });
        }

        for handle in self.activated_textures.drain() {
            let Some(consumer) = self.passes[cur].consumed_textures.get(&handle).copied() else {
                continue;
            };
            let mut producer = None;
            for earlier in self.passes[..cur].iter_mut() {
                if let Some(p) = earlier.produced_textures.remove(&handle) {
                    producer = Some(p);
                    break;
                }
            }
            let Some(producer) = producer else {
                continue;
            };
            self.passes[cur].consumed_textures.remove(&handle);

            let texture = registry.texture(handle)?;
            src_stage |= producer.stage;
            dst_stage |= consumer.stage;
            image_barriers.push(ImageBarrier {
                image: texture.img,
                src_access: producer.access,
                dst_access: consumer.access,
                old_layout: producer.layout,
                new_layout: consumer.layout,
                aspect: texture.aspect,
                base_mip_level: 0,
                level_count: texture.mip_levels,
                base_layer: 0,
                layer_count: texture.layers,
            });
        }

        if buffer_barriers.is_empty() && image_barriers.is_empty() {
            return Ok(());
        }

        trace!(
            "pass {}: barrier with {} buffer(s), {} image(s), {:?} -> {:?}",
            cur,
            buffer_barriers.len(),
            image_barriers.len(),
            src_stage,
            dst_stage
        );
        sink.pipeline_barrier(src_stage, dst_stage, &buffer_barriers, &image_barriers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::vulkan::test_support::*;
    use crate::*;

    fn passes_for(
        reg: &ResourceRegistry,
        commands: &[Command],
    ) -> Vec<PassResources> {
        let mut tracker = ResourceTracker::new();
        for c in commands {
            tracker.track(c, reg).unwrap();
        }
        tracker.finish()
    }

    #[test]
    fn compute_write_then_vertex_read_emits_one_buffer_barrier() {
        let mut reg = ResourceRegistry::default();
        let buf = fake_buffer(&mut reg, BufferUsages::STORAGE | BufferUsages::VERTEX);
        let group = fake_storage_group(&mut reg, buf);

        let stream = [
            Command::BeginComputePass,
            Command::SetBindGroup {
                index: 0,
                group,
                dynamic_offsets: Default::default(),
            },
            Command::EndComputePass,
            Command::BeginRenderPass(RenderPassDesc::default()),
            Command::SetVertexBuffer { slot: 0, buffer: buf },
            Command::EndRenderPass,
        ];
        let mut sync = ResourceSynchronizer::new(passes_for(&reg, &stream));
        let mut sink = CapturingSink::default();

        // Compute pass: nothing earlier to wait on.
        sync.begin_pass();
        sync.activate_bind_group(group, &reg).unwrap();
        sync.sync(&mut sink, &reg).unwrap();
        assert!(sink.barriers.is_empty());

        // Render pass begin: bridge the compute write.
        sync.begin_pass();
        sync.activate_pass();
        sync.sync(&mut sink, &reg).unwrap();

        assert_eq!(sink.barriers.len(), 1);
        let barrier = &sink.barriers[0];
        assert_eq!(barrier.src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(barrier.dst_stage, vk::PipelineStageFlags::VERTEX_INPUT);
        assert_eq!(barrier.buffers.len(), 1);
        assert_eq!(barrier.buffers[0].src_access, vk::AccessFlags::SHADER_WRITE);
        assert_eq!(
            barrier.buffers[0].dst_access,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ
        );
        assert!(barrier.images.is_empty());
    }

    #[test]
    fn a_consumed_producer_is_never_bridged_twice() {
        let mut reg = ResourceRegistry::default();
        let buf = fake_buffer(&mut reg, BufferUsages::STORAGE | BufferUsages::VERTEX);
        let group = fake_storage_group(&mut reg, buf);

        let stream = [
            Command::BeginComputePass,
            Command::SetBindGroup {
                index: 0,
                group,
                dynamic_offsets: Default::default(),
            },
            Command::EndComputePass,
            Command::BeginRenderPass(RenderPassDesc::default()),
            Command::SetVertexBuffer { slot: 0, buffer: buf },
            Command::EndRenderPass,
            Command::BeginRenderPass(RenderPassDesc::default()),
            Command::SetVertexBuffer { slot: 0, buffer: buf },
            Command::EndRenderPass,
        ];
        let mut sync = ResourceSynchronizer::new(passes_for(&reg, &stream));
        let mut sink = CapturingSink::default();

        sync.begin_pass();
        sync.activate_bind_group(group, &reg).unwrap();
        sync.sync(&mut sink, &reg).unwrap();
        sync.begin_pass();
        sync.activate_pass();
        sync.sync(&mut sink, &reg).unwrap();
        sync.begin_pass();
        sync.activate_pass();
        sync.sync(&mut sink, &reg).unwrap();

        // The write in pass 0 is consumed by pass 1; pass 2 finds no
        // producer left and emits nothing.
        assert_eq!(sink.barriers.len(), 1);
    }

    #[test]
    fn missing_producer_is_silently_skipped() {
        let mut reg = ResourceRegistry::default();
        let buf = fake_buffer(&mut reg, BufferUsages::VERTEX);

        let stream = [
            Command::BeginRenderPass(RenderPassDesc::default()),
            Command::SetVertexBuffer { slot: 0, buffer: buf },
            Command::EndRenderPass,
        ];
        let mut sync = ResourceSynchronizer::new(passes_for(&reg, &stream));
        let mut sink = CapturingSink::default();

        sync.begin_pass();
        sync.activate_pass();
        sync.sync(&mut sink, &reg).unwrap();

        assert!(sink.barriers.is_empty());
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn all_due_resources_merge_into_a_single_barrier_call() {
        let mut reg = ResourceRegistry::default();
        let buf = fake_buffer(&mut reg, BufferUsages::STORAGE | BufferUsages::VERTEX);
        let (tex, view) = fake_render_target(&mut reg);
        let group = fake_storage_group(&mut reg, buf);
        let sampled = fake_sampled_group(&mut reg, view);

        let stream = [
            Command::BeginComputePass,
            Command::SetBindGroup {
                index: 0,
                group,
                dynamic_offsets: Default::default(),
            },
            Command::EndComputePass,
            Command::BeginRenderPass(RenderPassDesc {
                color_attachments: smallvec::smallvec![ColorAttachment {
                    view,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            Command::EndRenderPass,
            Command::BeginRenderPass(RenderPassDesc::default()),
            Command::SetVertexBuffer { slot: 0, buffer: buf },
            Command::SetBindGroup {
                index: 0,
                group: sampled,
                dynamic_offsets: Default::default(),
            },
            Command::EndRenderPass,
        ];
        let mut sync = ResourceSynchronizer::new(passes_for(&reg, &stream));
        let mut sink = CapturingSink::default();

        sync.begin_pass();
        sync.activate_bind_group(group, &reg).unwrap();
        sync.sync(&mut sink, &reg).unwrap();
        sync.begin_pass();
        sync.activate_pass();
        sync.sync(&mut sink, &reg).unwrap();
        sync.begin_pass();
        sync.activate_pass();
        sync.sync(&mut sink, &reg).unwrap();

        assert_eq!(sink.barriers.len(), 1);
        let barrier = &sink.barriers[0];
        assert_eq!(barrier.buffers.len(), 1);
        assert_eq!(barrier.images.len(), 1);
        assert_eq!(
            barrier.src_stage,
            vk::PipelineStageFlags::COMPUTE_SHADER
                | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        let img = &barrier.images[0];
        assert_eq!(img.image, reg.texture(tex).unwrap().img);
        assert_eq!(img.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(img.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}
