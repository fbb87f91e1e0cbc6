use std::collections::HashMap;

use ash::vk;

use crate::utils::Handle;

use super::{Buffer, ResourceRegistry, Texture};
use crate::{BindingResource, BindingType, BufferBindingType, Command, Result, ShaderStages};

/// Stage/access a buffer use implies at one side of a hazard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUse {
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

/// Stage/access plus the image layout the use expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUse {
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
    pub layout: vk::ImageLayout,
}

/// Sealed read/write tables for one render or compute pass.
///
/// `produced` holds the pass's latest write per resource; `consumed` holds
/// the merged reads. Keys are resource handles, never raw native handles, so
/// identity survives value-equal descriptors.
#[derive(Debug, Default, Clone)]
pub struct PassResources {
    pub produced_buffers: HashMap<Handle<Buffer>, BufferUse>,
    pub consumed_buffers: HashMap<Handle<Buffer>, BufferUse>,
    pub produced_textures: HashMap<Handle<Texture>, TextureUse>,
    pub consumed_textures: HashMap<Handle<Texture>, TextureUse>,
}

impl PassResources {
    pub fn is_empty(&self) -> bool {
        self.produced_buffers.is_empty()
            && self.consumed_buffers.is_empty()
            && self.produced_textures.is_empty()
            && self.consumed_textures.is_empty()
    }
}

pub(crate) fn shader_stage_flags(stages: ShaderStages) -> vk::PipelineStageFlags {
    let mut out = vk::PipelineStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        out |= vk::PipelineStageFlags::VERTEX_SHADER;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        out |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        out |= vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    out
}

/// Single forward pass over a command stream that derives, per pass, which
/// resources are written and which are read, with the stage/access/layout
/// each use implies. Pure data derivation; no native calls.
#[derive(Default)]
pub struct ResourceTracker {
    passes: Vec<PassResources>,
    current: Option<PassResources>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, cmd: &Command, registry: &ResourceRegistry) -> Result<()> {
        match cmd {
            Command::BeginComputePass => {
                self.current = Some(PassResources::default());
            }
            Command::BeginRenderPass(desc) => {
                let mut pass = PassResources::default();
                for color in &desc.color_attachments {
                    // The written resource is the resolve target when one is
                    // declared; the msaa view is transient in that case.
                    let written = color.resolve_view.unwrap_or(color.view);
                    let view = registry.texture_view(written)?;
                    let texture = registry.texture(view.texture)?;
                    produce_texture(
                        &mut pass,
                        view.texture,
                        TextureUse {
                            stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                            access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                            layout: texture.final_layout,
                        },
                    );
                }
                if let Some(depth) = &desc.depth_stencil_attachment {
                    let view = registry.texture_view(depth.view)?;
                    let texture = registry.texture(view.texture)?;
                    produce_texture(
                        &mut pass,
                        view.texture,
                        TextureUse {
                            stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                            access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                            layout: texture.final_layout,
                        },
                    );
                }
                self.current = Some(pass);
            }
            Command::EndComputePass | Command::EndRenderPass => {
                if let Some(pass) = self.current.take() {
                    self.passes.push(pass);
                }
            }
            Command::SetBindGroup { group, .. } => {
                if self.current.is_some() {
                    self.track_bind_group(*group, registry)?;
                }
            }
            Command::SetVertexBuffer { buffer, .. } => {
                if let Some(pass) = self.current.as_mut() {
                    consume_buffer(
                        pass,
                        *buffer,
                        BufferUse {
                            stage: vk::PipelineStageFlags::VERTEX_INPUT,
                            access: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
                        },
                    );
                }
            }
            Command::SetIndexBuffer { buffer, .. } => {
                if let Some(pass) = self.current.as_mut() {
                    consume_buffer(
                        pass,
                        *buffer,
                        BufferUse {
                            stage: vk::PipelineStageFlags::VERTEX_INPUT,
                            access: vk::AccessFlags::INDEX_READ,
                        },
                    );
                }
            }
            // Copies and query resolves run outside the per-pass model; the
            // recorder synthesizes their transitions inline.
            _ => {}
        }
        Ok(())
    }

    /// Seal any open pass and hand back the ordered per-pass tables.
    pub fn finish(mut self) -> Vec<PassResources> {
        if let Some(pass) = self.current.take() {
            self.passes.push(pass);
        }
        self.passes
    }

    fn track_bind_group(
        &mut self,
        group: Handle<super::BindGroup>,
        registry: &ResourceRegistry,
    ) -> Result<()> {
        let group = registry.bind_group(group)?;
        let layout = registry.bind_group_layout(group.layout)?;
        let pass = self.current.as_mut().unwrap();

        for binding in &group.bindings {
            match binding {
                BindingResource::Buffer(b) => {
                    let Some(entry) = layout.entries.iter().find(|e| e.binding == b.index) else {
                        continue;
                    };
                    let stage = shader_stage_flags(entry.stages);
                    let ty = match entry.ty {
                        BindingType::Buffer { ty, .. } => ty,
                        _ => continue,
                    };
                    match ty {
                        BufferBindingType::Uniform => consume_buffer(
                            pass,
                            b.buffer,
                            BufferUse {
                                stage,
                                access: vk::AccessFlags::UNIFORM_READ,
                            },
                        ),
                        BufferBindingType::ReadOnlyStorage => consume_buffer(
                            pass,
                            b.buffer,
                            BufferUse {
                                stage,
                                access: vk::AccessFlags::SHADER_READ,
                            },
                        ),
                        BufferBindingType::Storage => {
                            consume_buffer(
                                pass,
                                b.buffer,
                                BufferUse {
                                    stage,
                                    access: vk::AccessFlags::SHADER_READ
                                        | vk::AccessFlags::SHADER_WRITE,
                                },
                            );
                            pass.produced_buffers.insert(
                                b.buffer,
                                BufferUse {
                                    stage,
                                    access: vk::AccessFlags::SHADER_WRITE,
                                },
                            );
                        }
                    }
                }
                BindingResource::Texture(t) => {
                    let Some(entry) = layout.entries.iter().find(|e| e.binding == t.index) else {
                        continue;
                    };
                    let stage = shader_stage_flags(entry.stages);
                    let view = registry.texture_view(t.view)?;
                    match entry.ty {
                        BindingType::SampledTexture => consume_texture(
                            pass,
                            view.texture,
                            TextureUse {
                                stage,
                                access: vk::AccessFlags::SHADER_READ,
                                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            },
                        ),
                        BindingType::StorageTexture => {
                            consume_texture(
                                pass,
                                view.texture,
                                TextureUse {
                                    stage,
                                    access: vk::AccessFlags::SHADER_READ
                                        | vk::AccessFlags::SHADER_WRITE,
                                    layout: vk::ImageLayout::GENERAL,
                                },
                            );
                            pass.produced_textures.insert(
                                view.texture,
                                TextureUse {
                                    stage,
                                    access: vk::AccessFlags::SHADER_WRITE,
                                    layout: vk::ImageLayout::GENERAL,
                                },
                            );
                        }
                        _ => {}
                    }
                }
                BindingResource::Sampler(_) => {}
            }
        }
        Ok(())
    }
}

fn consume_buffer(pass: &mut PassResources, handle: Handle<Buffer>, use_: BufferUse) {
    pass.consumed_buffers
        .entry(handle)
        .and_modify(|u| {
            u.stage |= use_.stage;
            u.access |= use_.access;
        })
        .or_insert(use_);
}

fn consume_texture(pass: &mut PassResources, handle: Handle<Texture>, use_: TextureUse) {
    pass.consumed_textures
        .entry(handle)
        .and_modify(|u| {
            u.stage |= use_.stage;
            u.access |= use_.access;
            u.layout = use_.layout;
        })
        .or_insert(use_);
}

fn produce_texture(pass: &mut PassResources, handle: Handle<Texture>, use_: TextureUse) {
    // Latest write wins.
    pass.produced_textures.insert(handle, use_);
}
