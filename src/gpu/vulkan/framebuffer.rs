use std::collections::HashMap;

use ash::vk;
use log::debug;
use smallvec::SmallVec;

use crate::{RenderPassDesc, Result};

use super::conversions::mip_dimensions;
use super::ResourceRegistry;

/// Identity of one native framebuffer: the pass it is compatible with, the
/// exact attachment views in order, and the dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub render_pass: vk::RenderPass,
    pub attachments: SmallVec<[vk::ImageView; 8]>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

impl FramebufferKey {
    /// Attachment order must match the render pass: colors, then resolves,
    /// then depth.
    pub fn from_desc(
        render_pass: vk::RenderPass,
        desc: &RenderPassDesc,
        registry: &ResourceRegistry,
    ) -> Result<Self> {
        let mut attachments = SmallVec::new();
        let mut width = 0;
        let mut height = 0;
        for color in &desc.color_attachments {
            let view = registry.texture_view(color.view)?;
            let texture = registry.texture(view.texture)?;
            let dim = mip_dimensions(texture.dim, view.base_mip_level);
            width = dim[0];
            height = dim[1];
            attachments.push(view.view);
        }
        let has_resolves = desc
            .color_attachments
            .iter()
            .any(|c| c.resolve_view.is_some());
        if has_resolves {
            for color in &desc.color_attachments {
                if let Some(rv) = color.resolve_view {
                    attachments.push(registry.texture_view(rv)?.view);
                }
            }
        }
        if let Some(depth) = &desc.depth_stencil_attachment {
            let view = registry.texture_view(depth.view)?;
            let texture = registry.texture(view.texture)?;
            let dim = mip_dimensions(texture.dim, view.base_mip_level);
            width = dim[0];
            height = dim[1];
            attachments.push(view.view);
        }
        Ok(Self {
            render_pass,
            attachments,
            width,
            height,
            layers: 1,
        })
    }
}

#[derive(Default)]
pub struct FramebufferCache {
    framebuffers: HashMap<FramebufferKey, vk::Framebuffer>,
}

impl FramebufferCache {
    pub fn get_or_create(
        &mut self,
        device: &ash::Device,
        key: &FramebufferKey,
    ) -> Result<vk::Framebuffer> {
        self.get_or_create_with(key, |key| {
            let info = vk::FramebufferCreateInfo::builder()
                .render_pass(key.render_pass)
                .attachments(&key.attachments)
                .width(key.width)
                .height(key.height)
                .layers(key.layers);
            let fb = unsafe { device.create_framebuffer(&info, None) }?;
            Ok(fb)
        })
    }

    pub fn get_or_create_with(
        &mut self,
        key: &FramebufferKey,
        create: impl FnOnce(&FramebufferKey) -> Result<vk::Framebuffer>,
    ) -> Result<vk::Framebuffer> {
        if let Some(fb) = self.framebuffers.get(key) {
            return Ok(*fb);
        }
        debug!("framebuffer cache miss ({} live)", self.framebuffers.len());
        let fb = create(key)?;
        self.framebuffers.insert(key.clone(), fb);
        Ok(fb)
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    pub fn clear(&mut self, device: &ash::Device) {
        for (_, fb) in self.framebuffers.drain() {
            unsafe { device.destroy_framebuffer(fb, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle as _;

    fn key(view: u64) -> FramebufferKey {
        FramebufferKey {
            render_pass: vk::RenderPass::from_raw(1),
            attachments: smallvec::smallvec![vk::ImageView::from_raw(view)],
            width: 640,
            height: 480,
            layers: 1,
        }
    }

    #[test]
    fn identity_follows_structural_equality() {
        let mut cache = FramebufferCache::default();
        let mut created = 0u64;
        let mut make = |cache: &mut FramebufferCache, k: &FramebufferKey| {
            cache
                .get_or_create_with(k, |_| {
                    created += 1;
                    Ok(vk::Framebuffer::from_raw(created))
                })
                .unwrap()
        };

        let a = make(&mut cache, &key(7));
        let b = make(&mut cache, &key(7));
        let c = make(&mut cache, &key(8));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);
    }
}
