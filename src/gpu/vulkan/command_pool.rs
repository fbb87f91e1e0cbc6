use ash::vk;

use crate::Result;

/// Recycling allocator for primary command buffers. Owned by the single
/// recording thread; never shared.
pub struct CommandPool {
    pool: vk::CommandPool,
    free: Vec<vk::CommandBuffer>,
}

impl CommandPool {
    pub fn new(device: &ash::Device, queue_family_index: u32) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);
        let pool = unsafe { device.create_command_pool(&info, None) }?;
        Ok(Self {
            pool,
            free: Vec::new(),
        })
    }

    pub fn acquire(&mut self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        if let Some(cmd) = self.free.pop() {
            unsafe {
                device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            }
            return Ok(cmd);
        }
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmds = unsafe { device.allocate_command_buffers(&info) }?;
        Ok(cmds[0])
    }

    pub fn recycle(&mut self, cmd: vk::CommandBuffer) {
        self.free.push(cmd);
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.pool, None) };
        self.free.clear();
    }
}

#[derive(Default)]
pub struct FencePool {
    free: Vec<vk::Fence>,
}

impl FencePool {
    pub fn acquire(&mut self, device: &ash::Device) -> Result<vk::Fence> {
        if let Some(fence) = self.free.pop() {
            return Ok(fence);
        }
        let fence =
            unsafe { device.create_fence(&vk::FenceCreateInfo::builder(), None) }?;
        Ok(fence)
    }

    /// Caller resets the fence before handing it back.
    pub fn recycle(&mut self, fence: vk::Fence) {
        self.free.push(fence);
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for fence in self.free.drain(..) {
            unsafe { device.destroy_fence(fence, None) };
        }
    }
}

#[derive(Default)]
pub struct SemaphorePool {
    free: Vec<vk::Semaphore>,
}

impl SemaphorePool {
    pub fn acquire(&mut self, device: &ash::Device) -> Result<vk::Semaphore> {
        if let Some(sem) = self.free.pop() {
            return Ok(sem);
        }
        let sem =
            unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::builder(), None) }?;
        Ok(sem)
    }

    pub fn recycle(&mut self, sem: vk::Semaphore) {
        self.free.push(sem);
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for sem in self.free.drain(..) {
            unsafe { device.destroy_semaphore(sem, None) };
        }
    }
}
