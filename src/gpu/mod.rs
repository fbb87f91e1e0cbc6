pub mod commands;
pub mod encoder;
pub mod error;
pub mod structs;
pub mod vulkan;

pub use commands::Command;
pub use encoder::{CommandEncoder, ComputePassEncoder, RenderPassEncoder};
pub use error::{GPUError, Result};
pub use structs::*;
pub use vulkan::*;
