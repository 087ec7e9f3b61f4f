use ash::vk;

use crate::commands::barrier::GfxBarrier;
use crate::commands::command_list::GfxCommandList;
use crate::descriptors::view::GfxGpuDescriptorHandle;
use crate::pipelines::compute_pipeline::GfxComputePipeline;

/// 录制下来的一条命令
#[derive(Clone, Debug, PartialEq)]
pub enum GfxCommand {
    Barrier(Vec<GfxBarrier>),
    SetComputePipeline(vk::Pipeline),
    SetDescriptorHeap(GfxGpuDescriptorHandle),
    SetComputeRootConstants { slot: u32, data: Vec<u8> },
    SetComputeRootDescriptorTable { slot: u32, base: GfxGpuDescriptorHandle },
    Dispatch(glam::UVec3),
    BeginLabel(String),
    EndLabel,
}

/// 只在 CPU 上保存命令的命令列表
///
/// 配合 headless 设备使用，可以检查 pass 实际录制了什么。
#[derive(Default)]
pub struct GfxRecordingCommandList {
    commands: Vec<GfxCommand>,
    name: String,
}
// new & init
impl GfxRecordingCommandList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            commands: Vec::new(),
            name: name.into(),
        }
    }
}
// getters
impl GfxRecordingCommandList {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn commands(&self) -> &[GfxCommand] {
        &self.commands
    }

    /// 清空已录制的命令，开始下一帧
    #[inline]
    pub fn reset(&mut self) {
        self.commands.clear();
    }

    pub fn dispatches(&self) -> impl Iterator<Item = glam::UVec3> + '_ {
        self.commands.iter().filter_map(|cmd| match cmd {
            GfxCommand::Dispatch(group_count) => Some(*group_count),
            _ => None,
        })
    }

    #[inline]
    pub fn dispatch_count(&self) -> usize {
        self.dispatches().count()
    }

    pub fn barriers(&self) -> impl Iterator<Item = &GfxBarrier> + '_ {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                GfxCommand::Barrier(barriers) => Some(barriers.iter()),
                _ => None,
            })
            .flatten()
    }

    #[inline]
    pub fn barrier_count(&self) -> usize {
        self.barriers().count()
    }

    /// 每次 dispatch 时生效的 root constants
    pub fn dispatch_constants(&self) -> Vec<Vec<u8>> {
        let mut current: Option<&Vec<u8>> = None;
        let mut result = Vec::new();
        for cmd in &self.commands {
            match cmd {
                GfxCommand::SetComputeRootConstants { data, .. } => current = Some(data),
                GfxCommand::Dispatch(_) => result.push(current.cloned().unwrap_or_default()),
                _ => {}
            }
        }
        result
    }
}
impl GfxCommandList for GfxRecordingCommandList {
    fn resource_barrier(&mut self, barriers: &[GfxBarrier]) {
        if barriers.is_empty() {
            return;
        }
        self.commands.push(GfxCommand::Barrier(barriers.to_vec()));
    }

    fn set_compute_pipeline(&mut self, pipeline: &GfxComputePipeline) {
        self.commands.push(GfxCommand::SetComputePipeline(pipeline.handle()));
    }

    fn set_descriptor_heap(&mut self, gpu_base: GfxGpuDescriptorHandle) {
        self.commands.push(GfxCommand::SetDescriptorHeap(gpu_base));
    }

    fn set_compute_root_constants(&mut self, slot: u32, data: &[u8]) {
        self.commands.push(GfxCommand::SetComputeRootConstants {
            slot,
            data: data.to_vec(),
        });
    }

    fn set_compute_root_descriptor_table(&mut self, slot: u32, base: GfxGpuDescriptorHandle) {
        self.commands.push(GfxCommand::SetComputeRootDescriptorTable { slot, base });
    }

    fn dispatch(&mut self, group_count: glam::UVec3) {
        self.commands.push(GfxCommand::Dispatch(group_count));
    }

    fn begin_label(&mut self, label: &str) {
        self.commands.push(GfxCommand::BeginLabel(label.to_string()));
    }

    fn end_label(&mut self) {
        self.commands.push(GfxCommand::EndLabel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_empty_barrier_batch_is_skipped() {
        let mut cmd = GfxRecordingCommandList::new("test");
        cmd.resource_barrier(&[]);
        assert!(cmd.commands().is_empty());

        cmd.resource_barrier(&[
            GfxBarrier::UnorderedAccess {
                resource: Some(vk::Image::from_raw(1)),
            },
            GfxBarrier::UnorderedAccess { resource: None },
        ]);
        assert_eq!(cmd.commands().len(), 1);
        assert_eq!(cmd.barrier_count(), 2);
    }

    #[test]
    fn test_dispatch_constants() {
        let mut cmd = GfxRecordingCommandList::new("test");
        cmd.set_compute_root_constants(0, &[1, 2]);
        cmd.dispatch(glam::uvec3(1, 1, 1));
        cmd.dispatch(glam::uvec3(2, 1, 1));
        cmd.set_compute_root_constants(0, &[3]);
        cmd.dispatch(glam::uvec3(4, 4, 1));

        assert_eq!(cmd.dispatch_count(), 3);
        assert_eq!(cmd.dispatch_constants(), vec![vec![1, 2], vec![1, 2], vec![3]]);

        cmd.reset();
        assert_eq!(cmd.dispatch_count(), 0);
    }
}
