use std::fmt;

use ash::vk;

#[derive(Debug)]
pub struct VulkanError {
    res: vk::Result,
}

#[derive(Debug)]
pub enum GPUError {
    VulkanError(VulkanError),
    SlotError(),
    /// A bind group, draw, or dispatch was recorded before any pipeline.
    NoPipelineBound,
    /// A pass-scoped command was recorded outside a render/compute pass.
    NoActivePass,
    /// A creation info struct was inconsistent.
    ConfigError(&'static str),
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vulkan Error: {}", self.res)
    }
}

impl fmt::Display for GPUError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GPUError::VulkanError(e) => e.fmt(f),
            GPUError::SlotError() => write!(f, "Ran out of slots!"),
            GPUError::NoPipelineBound => write!(f, "No pipeline bound"),
            GPUError::NoActivePass => write!(f, "Command recorded outside of a pass"),
            GPUError::ConfigError(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for GPUError {}

impl From<vk::Result> for GPUError {
    fn from(res: vk::Result) -> Self {
        GPUError::VulkanError(VulkanError { res })
    }
}
