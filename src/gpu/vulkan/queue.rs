use ash::vk;
use log::debug;
use smallvec::SmallVec;

use crate::Result;

use super::inflight::InflightObjects;
use super::recorder::CommandRecorder;
use super::synchronizer::ResourceSynchronizer;
use super::{CommandBuffer, Device, VulkanSink};

/// Presentation half of a submit: the acquired swapchain image and the two
/// semaphores bridging acquire and present.
#[derive(Debug, Clone, Copy)]
pub struct PresentTarget {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub acquire_semaphore: vk::Semaphore,
    pub present_semaphore: vk::Semaphore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChainEntry {
    pub cmd: vk::CommandBuffer,
    pub waits: SmallVec<[(vk::Semaphore, vk::PipelineStageFlags); 2]>,
    pub signals: SmallVec<[vk::Semaphore; 1]>,
}

/// Link finished command buffers into a linear wait/signal chain: buffer `i`
/// waits on buffer `i-1`'s chain semaphore at color-attachment-output. Only
/// the last buffer touches the presentation semaphores.
pub(crate) fn build_submit_chain(
    buffers: &[(vk::CommandBuffer, Vec<(vk::Semaphore, vk::PipelineStageFlags)>)],
    chain_semaphores: &[vk::Semaphore],
    present: Option<(vk::Semaphore, vk::Semaphore)>,
) -> Vec<ChainEntry> {
    let n = buffers.len();
    let mut out = Vec::with_capacity(n);
    for (i, (cmd, own_waits)) in buffers.iter().enumerate() {
        let mut waits: SmallVec<[(vk::Semaphore, vk::PipelineStageFlags); 2]> =
            SmallVec::from_slice(own_waits);
        if i > 0 {
            waits.push((
                chain_semaphores[i - 1],
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ));
        }
        let mut signals: SmallVec<[vk::Semaphore; 1]> = SmallVec::new();
        if i + 1 < n {
            signals.push(chain_semaphores[i]);
        }
        if i + 1 == n {
            if let Some((acquire, present)) = present {
                waits.push((acquire, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
                signals.push(present);
            }
        }
        out.push(ChainEntry {
            cmd: *cmd,
            waits,
            signals,
        });
    }
    out
}

struct PerSubmit {
    wait_sems: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    cmds: [vk::CommandBuffer; 1],
    signals: Vec<vk::Semaphore>,
}

impl Device {
    /// Record and submit a chain of command buffers, blocking until the GPU
    /// has finished all of them.
    pub fn submit(&mut self, cmd_bufs: &mut [CommandBuffer]) -> Result<()> {
        self.submit_inner(cmd_bufs, None)
    }

    /// `submit` plus a swapchain present issued after the queue submit. The
    /// last buffer waits on the acquire semaphore and signals the present
    /// semaphore.
    pub fn submit_and_present(
        &mut self,
        cmd_bufs: &mut [CommandBuffer],
        target: &PresentTarget,
    ) -> Result<()> {
        self.submit_inner(cmd_bufs, Some(*target))
    }

    fn submit_inner(
        &mut self,
        cmd_bufs: &mut [CommandBuffer],
        present: Option<PresentTarget>,
    ) -> Result<()> {
        if cmd_bufs.is_empty() {
            return Ok(());
        }

        let mut inflight = InflightObjects::default();
        for cb in cmd_bufs.iter_mut() {
            let cmd = self.cmd_pool.acquire(&self.device)?;
            unsafe {
                self.device.begin_command_buffer(
                    cmd,
                    &vk::CommandBufferBeginInfo::builder()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )?;
            }
            let mut sink = VulkanSink::new(
                &self.device,
                cmd,
                &mut self.render_passes,
                &mut self.framebuffers,
            );
            let recorder = CommandRecorder::new(
                &mut sink,
                &self.registry,
                ResourceSynchronizer::new(cb.pass_resources.clone()),
            );
            recorder.record(&cb.commands)?;
            let used = sink.into_used();
            unsafe { self.device.end_command_buffer(cmd)? };

            cb.cmd = cmd;
            let mut objects = InflightObjects::gather(&cb.commands, &self.registry)?;
            objects.command_buffers.insert(cmd);
            objects.render_passes.extend(used.render_passes);
            objects.framebuffers.extend(used.framebuffers);
            inflight.merge(objects);
        }

        let mut chain_sems = Vec::new();
        for _ in 1..cmd_bufs.len() {
            chain_sems.push(self.semaphores.acquire(&self.device)?);
        }
        let buffers: Vec<_> = cmd_bufs
            .iter()
            .map(|cb| (cb.cmd, cb.waits.clone()))
            .collect();
        let chain = build_submit_chain(
            &buffers,
            &chain_sems,
            present.map(|p| (p.acquire_semaphore, p.present_semaphore)),
        );
        for entry in &chain {
            inflight.semaphores.extend(entry.signals.iter().copied());
        }

        let per: Vec<PerSubmit> = chain
            .iter()
            .map(|entry| PerSubmit {
                wait_sems: entry.waits.iter().map(|(s, _)| *s).collect(),
                wait_stages: entry.waits.iter().map(|(_, st)| *st).collect(),
                cmds: [entry.cmd],
                signals: entry.signals.to_vec(),
            })
            .collect();
        let submits: Vec<vk::SubmitInfo> = per
            .iter()
            .map(|p| {
                vk::SubmitInfo::builder()
                    .wait_semaphores(&p.wait_sems)
                    .wait_dst_stage_mask(&p.wait_stages)
                    .command_buffers(&p.cmds)
                    .signal_semaphores(&p.signals)
                    .build()
            })
            .collect();

        debug!(
            "submitting {} command buffer(s){}",
            cmd_bufs.len(),
            if present.is_some() { " with present" } else { "" }
        );

        let fence = self.fences.acquire(&self.device)?;
        self.inflight.add(fence, inflight);
        unsafe { self.device.queue_submit(self.queue, &submits, fence)? };

        if let Some(target) = present {
            let wait_sems = [target.present_semaphore];
            let swapchains = [target.swapchain];
            let indices = [target.image_index];
            let info = vk::PresentInfoKHR::builder()
                .wait_semaphores(&wait_sems)
                .swapchains(&swapchains)
                .image_indices(&indices);
            unsafe { self.swapchain_loader.queue_present(self.queue, &info)? };
        }

        unsafe {
            self.device.wait_for_fences(&[fence], true, u64::MAX)?;
            self.device.reset_fences(&[fence])?;
        }
        self.inflight.clear(fence);
        self.fences.recycle(fence);
        for sem in chain_sems {
            self.semaphores.recycle(sem);
        }
        for cb in cmd_bufs.iter_mut() {
            self.cmd_pool.recycle(cb.cmd);
            cb.cmd = vk::CommandBuffer::null();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle as _;

    fn fake_cmds(n: u64) -> Vec<(vk::CommandBuffer, Vec<(vk::Semaphore, vk::PipelineStageFlags)>)> {
        (1..=n)
            .map(|i| (vk::CommandBuffer::from_raw(i), Vec::new()))
            .collect()
    }

    #[test]
    fn three_buffers_chain_pairwise() {
        let chain_sems = [vk::Semaphore::from_raw(101), vk::Semaphore::from_raw(102)];
        let chain = build_submit_chain(&fake_cmds(3), &chain_sems, None);

        assert_eq!(chain.len(), 3);
        assert!(chain[0].waits.is_empty());
        assert_eq!(chain[0].signals.as_slice(), &[chain_sems[0]]);

        assert_eq!(
            chain[1].waits.as_slice(),
            &[(
                chain_sems[0],
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            )]
        );
        assert_eq!(chain[1].signals.as_slice(), &[chain_sems[1]]);

        assert_eq!(
            chain[2].waits.as_slice(),
            &[(
                chain_sems[1],
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            )]
        );
        assert!(chain[2].signals.is_empty());
    }

    #[test]
    fn only_the_last_buffer_touches_presentation_semaphores() {
        let chain_sems = [vk::Semaphore::from_raw(101), vk::Semaphore::from_raw(102)];
        let acquire = vk::Semaphore::from_raw(200);
        let present = vk::Semaphore::from_raw(201);
        let chain = build_submit_chain(&fake_cmds(3), &chain_sems, Some((acquire, present)));

        for entry in &chain[..2] {
            assert!(!entry.waits.iter().any(|(s, _)| *s == acquire));
            assert!(!entry.signals.contains(&present));
        }
        let last = &chain[2];
        assert!(last
            .waits
            .contains(&(acquire, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)));
        assert_eq!(last.signals.as_slice(), &[present]);
    }

    #[test]
    fn registered_waits_survive_chaining() {
        let mut buffers = fake_cmds(2);
        let external = vk::Semaphore::from_raw(300);
        buffers[0]
            .1
            .push((external, vk::PipelineStageFlags::VERTEX_INPUT));
        let chain_sems = [vk::Semaphore::from_raw(101)];
        let chain = build_submit_chain(&buffers, &chain_sems, None);

        assert_eq!(
            chain[0].waits.as_slice(),
            &[(external, vk::PipelineStageFlags::VERTEX_INPUT)]
        );
        assert_eq!(
            chain[1].waits.as_slice(),
            &[(
                chain_sems[0],
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            )]
        );
    }
}
