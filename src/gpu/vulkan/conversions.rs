use ash::vk;

use crate::{
    AspectMask, Filter, Format, IndexFormat, LoadOp, SampleCount, SamplerAddressMode, StoreOp,
    TextureUsages,
};

impl From<Format> for vk::Format {
    fn from(fmt: Format) -> Self {
        match fmt {
            Format::R8Uint => vk::Format::R8_UINT,
            Format::RG8 => vk::Format::R8G8_UNORM,
            Format::RGBA8 => vk::Format::R8G8B8A8_SRGB,
            Format::RGBA8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::BGRA8 => vk::Format::B8G8R8A8_SRGB,
            Format::BGRA8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::RGBA16F => vk::Format::R16G16B16A16_SFLOAT,
            Format::RGBA32F => vk::Format::R32G32B32A32_SFLOAT,
            Format::D24S8 => vk::Format::D24_UNORM_S8_UINT,
            Format::D32F => vk::Format::D32_SFLOAT,
        }
    }
}

impl From<LoadOp> for vk::AttachmentLoadOp {
    fn from(op: LoadOp) -> Self {
        match op {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

impl From<StoreOp> for vk::AttachmentStoreOp {
    fn from(op: StoreOp) -> Self {
        match op {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

impl From<SampleCount> for vk::SampleCountFlags {
    fn from(samples: SampleCount) -> Self {
        match samples {
            SampleCount::S1 => vk::SampleCountFlags::TYPE_1,
            SampleCount::S4 => vk::SampleCountFlags::TYPE_4,
        }
    }
}

impl From<IndexFormat> for vk::IndexType {
    fn from(fmt: IndexFormat) -> Self {
        match fmt {
            IndexFormat::Uint16 => vk::IndexType::UINT16,
            IndexFormat::Uint32 => vk::IndexType::UINT32,
        }
    }
}

impl From<AspectMask> for vk::ImageAspectFlags {
    fn from(value: AspectMask) -> Self {
        match value {
            AspectMask::Color => vk::ImageAspectFlags::COLOR,
            AspectMask::Depth => vk::ImageAspectFlags::DEPTH,
            AspectMask::Stencil => vk::ImageAspectFlags::STENCIL,
            AspectMask::DepthStencil => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        }
    }
}

impl From<Filter> for vk::Filter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

impl From<Filter> for vk::SamplerMipmapMode {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
            Filter::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

impl From<SamplerAddressMode> for vk::SamplerAddressMode {
    fn from(mode: SamplerAddressMode) -> Self {
        match mode {
            SamplerAddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            SamplerAddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            SamplerAddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            SamplerAddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

pub fn vk_buffer_usage(usage: crate::BufferUsages) -> vk::BufferUsageFlags {
    use crate::BufferUsages as U;
    let mut out = vk::BufferUsageFlags::empty();
    if usage.contains(U::COPY_SRC) {
        out |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(U::COPY_DST) {
        out |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(U::VERTEX) {
        out |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(U::INDEX) {
        out |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(U::UNIFORM) {
        out |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(U::STORAGE) {
        out |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(U::QUERY_RESOLVE) {
        out |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    out
}

pub fn vk_image_usage(usage: TextureUsages) -> vk::ImageUsageFlags {
    use TextureUsages as U;
    let mut out = vk::ImageUsageFlags::empty();
    if usage.contains(U::COPY_SRC) {
        out |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(U::COPY_DST) {
        out |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(U::SAMPLED) {
        out |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(U::STORAGE) {
        out |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(U::COLOR_ATTACHMENT) {
        out |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(U::DEPTH_STENCIL_ATTACHMENT) {
        out |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    out
}

/// Layout a texture is expected to rest in between passes, derived from its
/// declared usage. Attachment usage wins over sampling, sampling over copies.
pub fn final_layout_for_usage(usage: TextureUsages) -> vk::ImageLayout {
    use TextureUsages as U;
    if usage.contains(U::DEPTH_STENCIL_ATTACHMENT) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else if usage.contains(U::COLOR_ATTACHMENT) {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else if usage.contains(U::SAMPLED) {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else if usage.contains(U::STORAGE) {
        vk::ImageLayout::GENERAL
    } else if usage.contains(U::COPY_SRC) {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    } else if usage.contains(U::COPY_DST) {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    } else {
        vk::ImageLayout::GENERAL
    }
}

pub fn aspect_for_format(fmt: Format) -> vk::ImageAspectFlags {
    match fmt {
        Format::D24S8 => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        Format::D32F => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub fn mip_dimensions(dim: [u32; 3], level: u32) -> [u32; 3] {
    [
        (dim[0] >> level).max(1),
        (dim[1] >> level).max(1),
        (dim[2] >> level).max(1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextureUsages;

    #[test]
    fn attachment_usage_dominates_final_layout() {
        let usage = TextureUsages::SAMPLED | TextureUsages::COLOR_ATTACHMENT;
        assert_eq!(
            final_layout_for_usage(usage),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            final_layout_for_usage(TextureUsages::SAMPLED | TextureUsages::COPY_DST),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn mip_dimensions_never_reach_zero() {
        assert_eq!(mip_dimensions([256, 128, 1], 0), [256, 128, 1]);
        assert_eq!(mip_dimensions([256, 128, 1], 3), [32, 16, 1]);
        assert_eq!(mip_dimensions([256, 128, 1], 9), [1, 1, 1]);
    }
}
