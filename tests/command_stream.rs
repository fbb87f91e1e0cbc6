use ash::vk;
use ash::vk::Handle as _;
use mizu::*;

fn fake_buffer(reg: &mut ResourceRegistry, raw: u64, usage: BufferUsages) -> Handle<Buffer> {
    reg.buffers
        .insert(Buffer {
            buf: vk::Buffer::from_raw(raw),
            alloc: None,
            size: 256,
            usage,
            visibility: MemoryVisibility::Gpu,
        })
        .unwrap()
}

fn fake_target(reg: &mut ResourceRegistry, raw: u64) -> Handle<TextureView> {
    let texture = reg
        .textures
        .insert(Texture {
            img: vk::Image::from_raw(raw),
            alloc: None,
            dim: [640, 480, 1],
            layers: 1,
            mip_levels: 1,
            format: Format::RGBA8,
            sample_count: SampleCount::S1,
            usage: TextureUsages::COLOR_ATTACHMENT | TextureUsages::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        })
        .unwrap();
    reg.texture_views
        .insert(TextureView {
            view: vk::ImageView::from_raw(raw + 1),
            texture,
            base_mip_level: 0,
            mip_level_count: 1,
            aspect: vk::ImageAspectFlags::COLOR,
        })
        .unwrap()
}

fn fake_storage_group(
    reg: &mut ResourceRegistry,
    raw: u64,
    buffer: Handle<Buffer>,
) -> Handle<BindGroup> {
    let layout = reg
        .bind_group_layouts
        .insert(BindGroupLayout {
            layout: vk::DescriptorSetLayout::from_raw(raw),
            entries: vec![BindGroupLayoutEntry {
                binding: 0,
                stages: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Storage,
                    dynamic_offset: false,
                },
            }],
        })
        .unwrap();
    reg.bind_groups
        .insert(BindGroup {
            set: vk::DescriptorSet::from_raw(raw + 1),
            layout,
            bindings: vec![BindingResource::Buffer(BufferBinding {
                index: 0,
                buffer,
                offset: 0,
                size: 0,
            })],
        })
        .unwrap()
}

/// Sink that records the order of translated calls.
#[derive(Default)]
struct EventSink {
    events: Vec<&'static str>,
    barrier_buffers: usize,
}

impl CommandSink for EventSink {
    fn begin_render_pass(&mut self, _: &RenderPassDesc, _: &ResourceRegistry) -> Result<()> {
        self.events.push("begin_render_pass");
        Ok(())
    }
    fn end_render_pass(&mut self) -> Result<()> {
        self.events.push("end_render_pass");
        Ok(())
    }
    fn bind_pipeline(&mut self, _: vk::PipelineBindPoint, _: vk::Pipeline) -> Result<()> {
        self.events.push("bind_pipeline");
        Ok(())
    }
    fn bind_descriptor_set(
        &mut self,
        _: vk::PipelineBindPoint,
        _: vk::PipelineLayout,
        _: u32,
        _: vk::DescriptorSet,
        _: &[u32],
    ) -> Result<()> {
        self.events.push("bind_descriptor_set");
        Ok(())
    }
    fn bind_vertex_buffer(&mut self, _: u32, _: vk::Buffer) -> Result<()> {
        self.events.push("bind_vertex_buffer");
        Ok(())
    }
    fn bind_index_buffer(&mut self, _: vk::Buffer, _: vk::IndexType) -> Result<()> {
        self.events.push("bind_index_buffer");
        Ok(())
    }
    fn set_viewport(&mut self, _: &Viewport) -> Result<()> {
        self.events.push("set_viewport");
        Ok(())
    }
    fn set_scissor(&mut self, _: &Rect2D) -> Result<()> {
        self.events.push("set_scissor");
        Ok(())
    }
    fn set_blend_constants(&mut self, _: [f32; 4]) -> Result<()> {
        self.events.push("set_blend_constants");
        Ok(())
    }
    fn draw(&mut self, _: u32, _: u32, _: u32, _: u32) -> Result<()> {
        self.events.push("draw");
        Ok(())
    }
    fn draw_indexed(&mut self, _: u32, _: u32, _: u32, _: i32, _: u32) -> Result<()> {
        self.events.push("draw_indexed");
        Ok(())
    }
    fn dispatch(&mut self, _: u32, _: u32, _: u32) -> Result<()> {
        self.events.push("dispatch");
        Ok(())
    }
    fn begin_query(&mut self, _: vk::QueryPool, _: u32) -> Result<()> {
        self.events.push("begin_query");
        Ok(())
    }
    fn end_query(&mut self, _: vk::QueryPool, _: u32) -> Result<()> {
        self.events.push("end_query");
        Ok(())
    }
    fn copy_buffer(&mut self, _: vk::Buffer, _: vk::Buffer, _: vk::BufferCopy) -> Result<()> {
        self.events.push("copy_buffer");
        Ok(())
    }
    fn copy_buffer_to_image(
        &mut self,
        _: vk::Buffer,
        _: vk::Image,
        _: vk::ImageLayout,
        _: vk::BufferImageCopy,
    ) -> Result<()> {
        self.events.push("copy_buffer_to_image");
        Ok(())
    }
    fn copy_image_to_buffer(
        &mut self,
        _: vk::Image,
        _: vk::ImageLayout,
        _: vk::Buffer,
        _: vk::BufferImageCopy,
    ) -> Result<()> {
        self.events.push("copy_image_to_buffer");
        Ok(())
    }
    fn copy_image(
        &mut self,
        _: vk::Image,
        _: vk::ImageLayout,
        _: vk::Image,
        _: vk::ImageLayout,
        _: vk::ImageCopy,
    ) -> Result<()> {
        self.events.push("copy_image");
        Ok(())
    }
    fn blit_image(
        &mut self,
        _: vk::Image,
        _: vk::Image,
        _: vk::ImageBlit,
        _: vk::Filter,
    ) -> Result<()> {
        self.events.push("blit_image");
        Ok(())
    }
    fn resolve_query_set(
        &mut self,
        _: vk::QueryPool,
        _: u32,
        _: u32,
        _: vk::Buffer,
        _: u64,
    ) -> Result<()> {
        self.events.push("resolve_query_set");
        Ok(())
    }
    fn pipeline_barrier(
        &mut self,
        _: vk::PipelineStageFlags,
        _: vk::PipelineStageFlags,
        buffers: &[BufferBarrier],
        _: &[ImageBarrier],
    ) -> Result<()> {
        self.events.push("pipeline_barrier");
        self.barrier_buffers += buffers.len();
        Ok(())
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn sealed_stream_carries_one_table_per_pass() {
    init_logging();
    let mut reg = ResourceRegistry::default();
    let storage = fake_buffer(&mut reg, 10, BufferUsages::STORAGE | BufferUsages::VERTEX);
    let view = fake_target(&mut reg, 20);
    let group = fake_storage_group(&mut reg, 30, storage);

    let mut enc = CommandEncoder::new();
    {
        let mut pass = enc.begin_compute_pass();
        pass.set_bind_group(0, group, &[]);
    }
    {
        let desc = RenderPassDesc {
            color_attachments: smallvec::smallvec![ColorAttachment {
                view,
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut pass = enc.begin_render_pass(&desc);
        pass.set_vertex_buffer(0, storage);
    }
    let cb = enc.finish(&reg).unwrap();

    let passes = cb.pass_resources();
    assert_eq!(passes.len(), 2);
    assert!(passes[0].produced_buffers.contains_key(&storage));
    assert!(passes[1].consumed_buffers.contains_key(&storage));
    assert_eq!(passes[1].produced_textures.len(), 1);
}

#[test]
fn compute_to_render_hazard_is_bridged_once_before_pass_begin() {
    init_logging();
    let mut reg = ResourceRegistry::default();
    let storage = fake_buffer(&mut reg, 10, BufferUsages::STORAGE | BufferUsages::VERTEX);
    let view = fake_target(&mut reg, 20);
    let group = fake_storage_group(&mut reg, 30, storage);
    let compute_pipeline = reg
        .compute_pipelines
        .insert(ComputePipeline {
            pipeline: vk::Pipeline::from_raw(40),
            layout: vk::PipelineLayout::from_raw(41),
        })
        .unwrap();
    let render_pipeline = reg
        .render_pipelines
        .insert(RenderPipeline {
            pipeline: vk::Pipeline::from_raw(50),
            layout: vk::PipelineLayout::from_raw(51),
        })
        .unwrap();

    let mut enc = CommandEncoder::new();
    {
        let mut pass = enc.begin_compute_pass();
        pass.set_pipeline(compute_pipeline);
        pass.set_bind_group(0, group, &[]);
        pass.dispatch(16, 16, 1);
    }
    {
        let desc = RenderPassDesc {
            color_attachments: smallvec::smallvec![ColorAttachment {
                view,
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut pass = enc.begin_render_pass(&desc);
        pass.set_pipeline(render_pipeline);
        pass.set_vertex_buffer(0, storage);
        pass.draw(3, 1, 0, 0);
    }
    let cb = enc.finish(&reg).unwrap();

    let mut sink = EventSink::default();
    let recorder = CommandRecorder::new(
        &mut sink,
        &reg,
        ResourceSynchronizer::new(cb.pass_resources().to_vec()),
    );
    recorder.record(cb.commands()).unwrap();

    let barriers: Vec<usize> = sink
        .events
        .iter()
        .enumerate()
        .filter(|(_, e)| **e == "pipeline_barrier")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(barriers.len(), 1);
    assert_eq!(sink.barrier_buffers, 1);

    let begin = sink
        .events
        .iter()
        .position(|e| *e == "begin_render_pass")
        .unwrap();
    let dispatch = sink.events.iter().position(|e| *e == "dispatch").unwrap();
    assert!(dispatch < barriers[0]);
    assert!(barriers[0] < begin);

    let expected_tail = [
        "begin_render_pass",
        "bind_pipeline",
        "bind_vertex_buffer",
        "draw",
        "end_render_pass",
    ];
    assert_eq!(&sink.events[begin..], &expected_tail);
}
