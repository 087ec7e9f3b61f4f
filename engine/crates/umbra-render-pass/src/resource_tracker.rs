//! 资源状态跟踪
//!
//! 跟踪器把状态转换请求变成 barrier，并立即更新资源上记录的状态。
//! 记录的状态是对 GPU 执行完命令列表之后状态的预测，它成立的前提是：
//! - 只有一个线程在录制命令
//! - 所有访问该资源的命令都提交到同一个 queue，按提交顺序执行
//!
//! barrier 先缓存在跟踪器中，在 `flush` 时作为一批提交给命令列表。

use std::collections::HashSet;

use ash::vk;
use umbra_gfx::commands::barrier::GfxBarrier;
use umbra_gfx::commands::command_list::GfxCommandList;
use umbra_gfx::error::{GfxError, GfxResult};
use umbra_gfx::resources::resource::GfxResource;
use umbra_gfx::resources::state::GfxResourceState;

#[derive(Default)]
pub struct ResourceStateTracker {
    /// 尚未提交到命令列表的 barrier
    pending: Vec<GfxBarrier>,

    /// 已经有 UAV 写入、但还没有被 barrier 隔开的资源
    unresolved_writes: HashSet<vk::Image>,

    transition_count: u64,
    uav_barrier_count: u64,
}
// new & init
impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }
}
// getters
impl ResourceStateTracker {
    #[inline]
    pub fn pending_barriers(&self) -> &[GfxBarrier] {
        &self.pending
    }

    /// 累计记录的状态转换 barrier 数量
    #[inline]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// 累计记录的 UAV barrier 数量
    #[inline]
    pub fn uav_barrier_count(&self) -> u64 {
        self.uav_barrier_count
    }

    #[inline]
    pub fn has_unresolved_write(&self, resource: &GfxResource) -> bool {
        self.unresolved_writes.contains(&resource.committed_resource())
    }
}
// 状态转换
impl ResourceStateTracker {
    /// 请求将资源转换到 `target` 状态
    ///
    /// 已经处于目标状态时什么都不做；否则记录一条 barrier 并更新资源的状态。
    ///
    /// # Errors
    /// 资源没有登记当前状态，或者 `target` 是非法的状态组合时，返回 `InvalidResourceState`
    pub fn transition(&mut self, resource: &GfxResource, target: GfxResourceState) -> GfxResult<()> {
        if !target.is_valid() {
            log::error!("invalid target state {:?} for `{}`", target, resource.name());
            return Err(GfxError::InvalidResourceState {
                resource: resource.name().to_string(),
            });
        }

        let current = resource.current_state().inspect_err(|_| {
            log::error!("transition requested on `{}` which has no registered state", resource.name());
        })?;
        if current == target {
            return Ok(());
        }

        log::trace!("transition `{}`: {:?} -> {:?}", resource.name(), current, target);
        self.pending.push(GfxBarrier::Transition {
            resource: resource.committed_resource(),
            before: current,
            after: target,
            mip_levels: resource.mip_levels(),
            storage_capable: resource.is_storage_capable(),
        });
        resource.commit_state(target);
        self.transition_count += 1;

        // 状态转换本身就是一次完整的同步
        self.unresolved_writes.remove(&resource.committed_resource());
        Ok(())
    }

    /// 在同一资源的前后两次 UAV 访问之间插入 barrier
    pub fn uav_barrier(&mut self, resource: &GfxResource) {
        self.pending.push(GfxBarrier::UnorderedAccess {
            resource: Some(resource.committed_resource()),
        });
        self.uav_barrier_count += 1;
        self.unresolved_writes.remove(&resource.committed_resource());
    }

    /// 记录一次对资源的 UAV 写入，之后的读写需要先调用 `resolve_hazard`
    #[inline]
    pub fn record_write(&mut self, resource: &GfxResource) {
        self.unresolved_writes.insert(resource.committed_resource());
    }

    /// 如果资源上有尚未同步的写入，插入 UAV barrier
    ///
    /// 返回是否插入了 barrier
    pub fn resolve_hazard(&mut self, resource: &GfxResource) -> bool {
        if !self.has_unresolved_write(resource) {
            return false;
        }
        self.uav_barrier(resource);
        true
    }

    /// 将缓存的 barrier 作为一批提交到命令列表
    pub fn flush(&mut self, cmd: &mut dyn GfxCommandList) {
        if self.pending.is_empty() {
            return;
        }
        cmd.resource_barrier(&self.pending);
        self.pending.clear();
    }
}
