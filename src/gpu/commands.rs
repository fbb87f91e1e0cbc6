use smallvec::SmallVec;

use crate::utils::Handle;

use super::structs::*;
use super::vulkan::{BindGroup, Buffer, ComputePipeline, QuerySet, RenderPipeline};

/// One recorded operation. Pure data: each record is produced once by an
/// encoder, walked once by the hazard tracker, walked once by the recorder,
/// then discarded with the stream.
#[derive(Debug, Clone)]
pub enum Command {
    BeginComputePass,
    EndComputePass,
    BeginRenderPass(RenderPassDesc),
    EndRenderPass,
    SetRenderPipeline(Handle<RenderPipeline>),
    SetComputePipeline(Handle<ComputePipeline>),
    SetBindGroup {
        index: u32,
        group: Handle<BindGroup>,
        dynamic_offsets: SmallVec<[u32; 4]>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: Handle<Buffer>,
    },
    SetIndexBuffer {
        buffer: Handle<Buffer>,
        format: IndexFormat,
    },
    SetViewport(Viewport),
    SetScissor(Rect2D),
    SetBlendConstant([f32; 4]),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    /// The query set comes from the enclosing pass descriptor.
    BeginOcclusionQuery {
        query_index: u32,
    },
    EndOcclusionQuery,
    CopyBufferToBuffer {
        src: Handle<Buffer>,
        src_offset: u64,
        dst: Handle<Buffer>,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        src: Handle<Buffer>,
        src_layout: TexelCopyBufferLayout,
        dst: TexelCopyTextureInfo,
        extent: Extent3D,
    },
    CopyTextureToBuffer {
        src: TexelCopyTextureInfo,
        dst: Handle<Buffer>,
        dst_layout: TexelCopyBufferLayout,
        extent: Extent3D,
    },
    CopyTextureToTexture {
        src: TexelCopyTextureInfo,
        dst: TexelCopyTextureInfo,
        extent: Extent3D,
    },
    ResolveQuerySet {
        query_set: Handle<QuerySet>,
        first_query: u32,
        query_count: u32,
        dst: Handle<Buffer>,
        dst_offset: u64,
    },
}
