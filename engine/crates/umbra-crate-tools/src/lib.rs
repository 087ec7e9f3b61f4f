//! 在各个 crate 之间共享的工具：日志初始化、路径管理、性能分析

pub mod init_log;
pub mod resource;

pub use tracy_client;

/// 打开一个 tracy span
///
/// 只有在 tracy client 已经启动时才会创建 span，否则为 `None`，
/// 因此在测试和 headless 场景下无需启动 profiler。
///
/// ```ignore
/// let _span = umbra_crate_tools::profile_span!("MipMapPass::process");
/// ```
#[macro_export]
macro_rules! profile_span {
    ($name:literal) => {
        $crate::tracy_client::Client::running()
            .map(|client| client.span($crate::tracy_client::span_location!($name), 0))
    };
}
