use std::collections::HashMap;

use ash::vk;
use log::debug;
use smallvec::SmallVec;

use crate::{Format, LoadOp, RenderPassDesc, Result, SampleCount, StoreOp};

use super::ResourceRegistry;

/// Every field that affects native render pass creation. Two descriptors
/// hashing and comparing equal always resolve to the identical native pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassKey {
    pub colors: SmallVec<[ColorTargetKey; 4]>,
    pub depth_stencil: Option<DepthStencilKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetKey {
    pub format: Format,
    pub samples: SampleCount,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub final_layout: vk::ImageLayout,
    pub resolve: Option<ResolveTargetKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolveTargetKey {
    pub format: Format,
    pub final_layout: vk::ImageLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilKey {
    pub format: Format,
    pub samples: SampleCount,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
}

impl RenderPassKey {
    pub fn from_desc(desc: &RenderPassDesc, registry: &ResourceRegistry) -> Result<Self> {
        let mut colors = SmallVec::new();
        for color in &desc.color_attachments {
            let view = registry.texture_view(color.view)?;
            let texture = registry.texture(view.texture)?;
            let resolve = match color.resolve_view {
                Some(rv) => {
                    let view = registry.texture_view(rv)?;
                    let texture = registry.texture(view.texture)?;
                    Some(ResolveTargetKey {
                        format: texture.format,
                        final_layout: texture.final_layout,
                    })
                }
                None => None,
            };
            colors.push(ColorTargetKey {
                format: texture.format,
                samples: texture.sample_count,
                load_op: color.load_op,
                store_op: color.store_op,
                final_layout: texture.final_layout,
                resolve,
            });
        }
        let depth_stencil = match &desc.depth_stencil_attachment {
            Some(depth) => {
                let view = registry.texture_view(depth.view)?;
                let texture = registry.texture(view.texture)?;
                Some(DepthStencilKey {
                    format: texture.format,
                    samples: texture.sample_count,
                    depth_load_op: depth.depth_load_op,
                    depth_store_op: depth.depth_store_op,
                    stencil_load_op: depth.stencil_load_op,
                    stencil_store_op: depth.stencil_store_op,
                })
            }
            None => None,
        };
        Ok(Self {
            colors,
            depth_stencil,
        })
    }
}

/// Lookup-or-create cache of native render passes, keyed structurally.
/// Entries live until `clear` at device teardown; no eviction.
#[derive(Default)]
pub struct RenderPassCache {
    passes: HashMap<RenderPassKey, vk::RenderPass>,
}

impl RenderPassCache {
    pub fn get_or_create(
        &mut self,
        device: &ash::Device,
        key: &RenderPassKey,
    ) -> Result<vk::RenderPass> {
        self.get_or_create_with(key, |key| create_render_pass(device, key))
    }

    /// Cache lookup with creation injected, so cache identity is testable
    /// without a device.
    pub fn get_or_create_with(
        &mut self,
        key: &RenderPassKey,
        create: impl FnOnce(&RenderPassKey) -> Result<vk::RenderPass>,
    ) -> Result<vk::RenderPass> {
        if let Some(pass) = self.passes.get(key) {
            return Ok(*pass);
        }
        debug!("render pass cache miss ({} live)", self.passes.len());
        let pass = create(key)?;
        self.passes.insert(key.clone(), pass);
        Ok(pass)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn clear(&mut self, device: &ash::Device) {
        for (_, pass) in self.passes.drain() {
            unsafe { device.destroy_render_pass(pass, None) };
        }
    }
}

fn create_render_pass(device: &ash::Device, key: &RenderPassKey) -> Result<vk::RenderPass> {
    let mut attachments: SmallVec<[vk::AttachmentDescription; 8]> = SmallVec::new();
    let mut color_refs: SmallVec<[vk::AttachmentReference; 4]> = SmallVec::new();
    let mut resolve_refs: SmallVec<[vk::AttachmentReference; 4]> = SmallVec::new();
    let has_resolves = key.colors.iter().any(|c| c.resolve.is_some());

    for color in &key.colors {
        // Loaded content only survives if the image already sits in its
        // declared layout.
        let initial_layout = if color.load_op == LoadOp::Load {
            color.final_layout
        } else {
            vk::ImageLayout::UNDEFINED
        };
        color_refs.push(vk::AttachmentReference {
            attachment: attachments.len() as u32,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(color.format.into())
                .samples(color.samples.into())
                .load_op(color.load_op.into())
                .store_op(color.store_op.into())
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial_layout)
                .final_layout(color.final_layout)
                .build(),
        );
    }
    if has_resolves {
        for color in &key.colors {
            match color.resolve {
                Some(resolve) => {
                    resolve_refs.push(vk::AttachmentReference {
                        attachment: attachments.len() as u32,
                        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    });
                    attachments.push(
                        vk::AttachmentDescription::builder()
                            .format(resolve.format.into())
                            .samples(vk::SampleCountFlags::TYPE_1)
                            .load_op(vk::AttachmentLoadOp::DONT_CARE)
                            .store_op(vk::AttachmentStoreOp::STORE)
                            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                            .initial_layout(vk::ImageLayout::UNDEFINED)
                            .final_layout(resolve.final_layout)
                            .build(),
                    );
                }
                None => resolve_refs.push(vk::AttachmentReference {
                    attachment: vk::ATTACHMENT_UNUSED,
                    layout: vk::ImageLayout::UNDEFINED,
                }),
            }
        }
    }

    let depth_ref = key.depth_stencil.map(|depth| {
        let reference = vk::AttachmentReference {
            attachment: attachments.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let initial_layout = if depth.depth_load_op == LoadOp::Load {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        };
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(depth.format.into())
                .samples(depth.samples.into())
                .load_op(depth.depth_load_op.into())
                .store_op(depth.depth_store_op.into())
                .stencil_load_op(depth.stencil_load_op.into())
                .stencil_store_op(depth.stencil_store_op.into())
                .initial_layout(initial_layout)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );
        reference
    });

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if has_resolves {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    let subpasses = [subpass.build()];

    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses);

    let pass = unsafe { device.create_render_pass(&info, None) }?;
    Ok(pass)
}
