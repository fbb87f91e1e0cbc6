use ash::vk;
use bitflags::bitflags;
use smallvec::SmallVec;

use crate::utils::Handle;

use super::vulkan::{BindGroup, BindGroupLayout, Buffer, QuerySet, Sampler, Texture, TextureView};

#[derive(Hash, Clone, Copy, Debug)]
pub enum MemoryVisibility {
    Gpu,
    CpuAndGpu,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Format {
    R8Uint,
    RG8,
    #[default]
    RGBA8,
    RGBA8Unorm,
    BGRA8,
    BGRA8Unorm,
    RGBA16F,
    RGBA32F,
    D24S8,
    D32F,
}

#[derive(Hash, Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    Clear,
    #[default]
    DontCare,
}

#[derive(Hash, Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    #[default]
    DontCare,
}

#[derive(Hash, Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum SampleCount {
    #[default]
    S1,
    S4,
}

#[derive(Hash, Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum IndexFormat {
    #[default]
    Uint16,
    Uint32,
}

#[derive(Hash, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AspectMask {
    #[default]
    Color,
    Depth,
    Stencil,
    DepthStencil,
}

#[derive(Debug, Clone, Copy)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy)]
pub enum SamplerAddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            w: 1280.0,
            h: 1024.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Hash, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Hash, Default, Clone, Copy, PartialEq, Eq)]
pub struct Extent3D {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Debug, Hash, Default, Clone, Copy, PartialEq, Eq)]
pub struct Origin3D {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 0b001;
        const FRAGMENT = 0b010;
        const COMPUTE = 0b100;
    }
}

impl ShaderStages {
    pub(crate) fn to_vk(self) -> vk::ShaderStageFlags {
        let mut out = vk::ShaderStageFlags::empty();
        if self.contains(ShaderStages::VERTEX) {
            out |= vk::ShaderStageFlags::VERTEX;
        }
        if self.contains(ShaderStages::FRAGMENT) {
            out |= vk::ShaderStageFlags::FRAGMENT;
        }
        if self.contains(ShaderStages::COMPUTE) {
            out |= vk::ShaderStageFlags::COMPUTE;
        }
        out
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsages: u32 {
        const COPY_SRC = 0b000001;
        const COPY_DST = 0b000010;
        const VERTEX = 0b000100;
        const INDEX = 0b001000;
        const UNIFORM = 0b010000;
        const STORAGE = 0b100000;
        const QUERY_RESOLVE = 0b1000000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsages: u32 {
        const COPY_SRC = 0b00001;
        const COPY_DST = 0b00010;
        const SAMPLED = 0b00100;
        const STORAGE = 0b01000;
        const COLOR_ATTACHMENT = 0b10000;
        const DEPTH_STENCIL_ATTACHMENT = 0b100000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferBindingType {
    Uniform,
    Storage,
    ReadOnlyStorage,
}

/// What occupies one slot of a bind group layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    Buffer {
        ty: BufferBindingType,
        dynamic_offset: bool,
    },
    SampledTexture,
    StorageTexture,
    Sampler,
}

#[derive(Debug, Clone, Copy)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub stages: ShaderStages,
    pub ty: BindingType,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferBinding {
    pub index: u32,
    pub buffer: Handle<Buffer>,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureBinding {
    pub index: u32,
    pub view: Handle<TextureView>,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerBinding {
    pub index: u32,
    pub sampler: Handle<Sampler>,
}

#[derive(Debug, Clone, Copy)]
pub enum BindingResource {
    Buffer(BufferBinding),
    Texture(TextureBinding),
    Sampler(SamplerBinding),
}

/// One color target of a render pass. `resolve_view` is the single-sample
/// target a multisampled `view` resolves into at store time.
#[derive(Debug, Clone, Copy)]
pub struct ColorAttachment {
    pub view: Handle<TextureView>,
    pub resolve_view: Option<Handle<TextureView>>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: [f32; 4],
}

impl Default for ColorAttachment {
    fn default() -> Self {
        Self {
            view: Default::default(),
            resolve_view: None,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_value: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DepthStencilAttachment {
    pub view: Handle<TextureView>,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    pub clear_depth: f32,
    pub clear_stencil: u32,
}

impl Default for DepthStencilAttachment {
    fn default() -> Self {
        Self {
            view: Default::default(),
            depth_load_op: LoadOp::Clear,
            depth_store_op: StoreOp::Store,
            stencil_load_op: LoadOp::DontCare,
            stencil_store_op: StoreOp::DontCare,
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    pub color_attachments: SmallVec<[ColorAttachment; 4]>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
    pub occlusion_query_set: Option<Handle<QuerySet>>,
}

/// Buffer region of a buffer/texture copy. `bytes_per_row` covers one row of
/// texels including padding; zero means tightly packed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TexelCopyBufferLayout {
    pub offset: u64,
    pub bytes_per_row: u32,
    pub rows_per_image: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TexelCopyTextureInfo {
    pub texture: Handle<Texture>,
    pub mip_level: u32,
    pub origin: Origin3D,
    pub aspect: AspectMask,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryType {
    #[default]
    Occlusion,
    Timestamp,
}

#[derive(Hash, Clone, Copy, Debug)]
pub struct BufferInfo<'a> {
    pub debug_name: &'a str,
    pub byte_size: u64,
    pub visibility: MemoryVisibility,
    pub usage: BufferUsages,
    /// Requires `CpuAndGpu` visibility; written through the mapped allocation.
    pub initial_data: Option<&'a [u8]>,
}

impl<'a> Default for BufferInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            byte_size: 1024,
            visibility: MemoryVisibility::CpuAndGpu,
            usage: BufferUsages::UNIFORM,
            initial_data: None,
        }
    }
}

#[derive(Hash, Clone, Copy, Debug)]
pub struct TextureInfo<'a> {
    pub debug_name: &'a str,
    pub dim: [u32; 3],
    pub layers: u32,
    pub format: Format,
    pub mip_levels: u32,
    pub sample_count: SampleCount,
    pub usage: TextureUsages,
}

impl<'a> Default for TextureInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            dim: [1280, 1024, 1],
            layers: 1,
            format: Format::RGBA8,
            mip_levels: 1,
            sample_count: SampleCount::S1,
            usage: TextureUsages::SAMPLED | TextureUsages::COPY_DST,
        }
    }
}

pub struct TextureViewInfo<'a> {
    pub debug_name: &'a str,
    pub texture: Handle<Texture>,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
    pub aspect: AspectMask,
}

impl<'a> Default for TextureViewInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            texture: Default::default(),
            base_mip_level: 0,
            mip_level_count: 1,
            base_layer: 0,
            layer_count: 1,
            aspect: Default::default(),
        }
    }
}

pub struct SamplerInfo<'a> {
    pub debug_name: &'a str,
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_filter: Filter,
    pub address_mode_u: SamplerAddressMode,
    pub address_mode_v: SamplerAddressMode,
    pub address_mode_w: SamplerAddressMode,
    pub anisotropy_enable: bool,
    pub max_anisotropy: f32,
}

impl<'a> Default for SamplerInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_filter: Filter::Linear,
            address_mode_u: SamplerAddressMode::Repeat,
            address_mode_v: SamplerAddressMode::Repeat,
            address_mode_w: SamplerAddressMode::Repeat,
            anisotropy_enable: false,
            max_anisotropy: 1.0,
        }
    }
}

pub struct BindGroupLayoutInfo<'a> {
    pub debug_name: &'a str,
    pub entries: &'a [BindGroupLayoutEntry],
}

impl<'a> Default for BindGroupLayoutInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            entries: &[],
        }
    }
}

pub struct BindGroupInfo<'a> {
    pub debug_name: &'a str,
    pub layout: Handle<BindGroupLayout>,
    pub bindings: &'a [BindingResource],
}

impl<'a> Default for BindGroupInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            layout: Default::default(),
            bindings: &[],
        }
    }
}

pub struct QuerySetInfo<'a> {
    pub debug_name: &'a str,
    pub ty: QueryType,
    pub count: u32,
}

impl<'a> Default for QuerySetInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            ty: QueryType::Occlusion,
            count: 1,
        }
    }
}

/// Registration of an externally compiled graphics pipeline. Shader and
/// pipeline compilation happen outside this layer.
pub struct RenderPipelineInfo<'a> {
    pub debug_name: &'a str,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_group_layouts: &'a [Handle<BindGroupLayout>],
}

impl<'a> Default for RenderPipelineInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            bind_group_layouts: &[],
        }
    }
}

pub struct ComputePipelineInfo<'a> {
    pub debug_name: &'a str,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_group_layouts: &'a [Handle<BindGroupLayout>],
}

impl<'a> Default for ComputePipelineInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            bind_group_layouts: &[],
        }
    }
}
