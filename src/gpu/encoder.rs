use smallvec::SmallVec;

use crate::utils::Handle;

use super::commands::Command;
use super::error::Result;
use super::structs::*;
use super::vulkan::{
    BindGroup, Buffer, CommandBuffer, ComputePipeline, QuerySet, RenderPipeline, ResourceRegistry,
    ResourceTracker,
};

/// Builds the ordered command stream for one encoding session.
///
/// Commands are appended in call order; `finish` runs the hazard tracker over
/// the stream and seals the per-pass resource tables into the returned
/// [`CommandBuffer`]. Single-threaded by design.
#[derive(Default)]
pub struct CommandEncoder {
    commands: Vec<Command>,
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_render_pass(&mut self, desc: &RenderPassDesc) -> RenderPassEncoder<'_> {
        self.commands.push(Command::BeginRenderPass(desc.clone()));
        RenderPassEncoder {
            enc: self,
            ended: false,
        }
    }

    pub fn begin_compute_pass(&mut self) -> ComputePassEncoder<'_> {
        self.commands.push(Command::BeginComputePass);
        ComputePassEncoder {
            enc: self,
            ended: false,
        }
    }

    pub fn copy_buffer_to_buffer(
        &mut self,
        src: Handle<Buffer>,
        src_offset: u64,
        dst: Handle<Buffer>,
        dst_offset: u64,
        size: u64,
    ) {
        self.commands.push(Command::CopyBufferToBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        src: Handle<Buffer>,
        src_layout: TexelCopyBufferLayout,
        dst: TexelCopyTextureInfo,
        extent: Extent3D,
    ) {
        self.commands.push(Command::CopyBufferToTexture {
            src,
            src_layout,
            dst,
            extent,
        });
    }

    pub fn copy_texture_to_buffer(
        &mut self,
        src: TexelCopyTextureInfo,
        dst: Handle<Buffer>,
        dst_layout: TexelCopyBufferLayout,
        extent: Extent3D,
    ) {
        self.commands.push(Command::CopyTextureToBuffer {
            src,
            dst,
            dst_layout,
            extent,
        });
    }

    pub fn copy_texture_to_texture(
        &mut self,
        src: TexelCopyTextureInfo,
        dst: TexelCopyTextureInfo,
        extent: Extent3D,
    ) {
        self.commands
            .push(Command::CopyTextureToTexture { src, dst, extent });
    }

    pub fn resolve_query_set(
        &mut self,
        query_set: Handle<QuerySet>,
        first_query: u32,
        query_count: u32,
        dst: Handle<Buffer>,
        dst_offset: u64,
    ) {
        self.commands.push(Command::ResolveQuerySet {
            query_set,
            first_query,
            query_count,
            dst,
            dst_offset,
        });
    }

    /// Seal the stream. Walks every command through the hazard tracker so the
    /// command buffer carries its per-pass produced/consumed tables.
    pub fn finish(self, registry: &ResourceRegistry) -> Result<CommandBuffer> {
        let mut tracker = ResourceTracker::new();
        for cmd in &self.commands {
            tracker.track(cmd, registry)?;
        }
        Ok(CommandBuffer::new(self.commands, tracker.finish()))
    }

    #[cfg(test)]
    pub(crate) fn commands(&self) -> &[Command] {
        &self.commands
    }
}

/// Records commands scoped to one render pass. Ends the pass on drop if
/// `end` was never called.
pub struct RenderPassEncoder<'a> {
    enc: &'a mut CommandEncoder,
    ended: bool,
}

impl<'a> RenderPassEncoder<'a> {
    pub fn set_pipeline(&mut self, pipeline: Handle<RenderPipeline>) {
        self.enc.commands.push(Command::SetRenderPipeline(pipeline));
    }

    pub fn set_bind_group(&mut self, index: u32, group: Handle<BindGroup>, dynamic_offsets: &[u32]) {
        self.enc.commands.push(Command::SetBindGroup {
            index,
            group,
            dynamic_offsets: SmallVec::from_slice(dynamic_offsets),
        });
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: Handle<Buffer>) {
        self.enc.commands.push(Command::SetVertexBuffer { slot, buffer });
    }

    pub fn set_index_buffer(&mut self, buffer: Handle<Buffer>, format: IndexFormat) {
        self.enc.commands.push(Command::SetIndexBuffer { buffer, format });
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.enc.commands.push(Command::SetViewport(viewport));
    }

    pub fn set_scissor(&mut self, scissor: Rect2D) {
        self.enc.commands.push(Command::SetScissor(scissor));
    }

    pub fn set_blend_constant(&mut self, color: [f32; 4]) {
        self.enc.commands.push(Command::SetBlendConstant(color));
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.enc.commands.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.enc.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
    }

    /// Queries index into the pass descriptor's occlusion query set.
    pub fn begin_occlusion_query(&mut self, query_index: u32) {
        self.enc
            .commands
            .push(Command::BeginOcclusionQuery { query_index });
    }

    pub fn end_occlusion_query(&mut self) {
        self.enc.commands.push(Command::EndOcclusionQuery);
    }

    pub fn end(mut self) {
        self.ended = true;
        self.enc.commands.push(Command::EndRenderPass);
    }
}

impl<'a> Drop for RenderPassEncoder<'a> {
    fn drop(&mut self) {
        if !self.ended {
            self.enc.commands.push(Command::EndRenderPass);
        }
    }
}

pub struct ComputePassEncoder<'a> {
    enc: &'a mut CommandEncoder,
    ended: bool,
}

impl<'a> ComputePassEncoder<'a> {
    pub fn set_pipeline(&mut self, pipeline: Handle<ComputePipeline>) {
        self.enc
            .commands
            .push(Command::SetComputePipeline(pipeline));
    }

    pub fn set_bind_group(&mut self, index: u32, group: Handle<BindGroup>, dynamic_offsets: &[u32]) {
        self.enc.commands.push(Command::SetBindGroup {
            index,
            group,
            dynamic_offsets: SmallVec::from_slice(dynamic_offsets),
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.enc.commands.push(Command::Dispatch { x, y, z });
    }

    pub fn end(mut self) {
        self.ended = true;
        self.enc.commands.push(Command::EndComputePass);
    }
}

impl<'a> Drop for ComputePassEncoder<'a> {
    fn drop(&mut self) {
        if !self.ended {
            self.enc.commands.push(Command::EndComputePass);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_encoders_bracket_their_commands() {
        let mut enc = CommandEncoder::new();
        let mut pass = enc.begin_render_pass(&RenderPassDesc::default());
        pass.draw(3, 1, 0, 0);
        pass.end();

        let cmds = enc.commands();
        assert!(matches!(cmds[0], Command::BeginRenderPass(_)));
        assert!(matches!(cmds[1], Command::Draw { vertex_count: 3, .. }));
        assert!(matches!(cmds[2], Command::EndRenderPass));
    }

    #[test]
    fn dropping_a_pass_encoder_ends_the_pass() {
        let mut enc = CommandEncoder::new();
        {
            let mut pass = enc.begin_compute_pass();
            pass.dispatch(8, 8, 1);
        }
        let cmds = enc.commands();
        assert!(matches!(cmds[0], Command::BeginComputePass));
        assert!(matches!(cmds[1], Command::Dispatch { x: 8, y: 8, z: 1 }));
        assert!(matches!(cmds[2], Command::EndComputePass));
    }
}
