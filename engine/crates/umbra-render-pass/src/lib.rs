//! Render Pass 框架
//!
//! - [`resource_tracker`]：资源状态跟踪，生成 barrier
//! - [`shader_library`]：按路径缓存 shader，避免重复编译
//! - [`render_pass`]：固定输入输出数量的 pass，以及每帧的 pass 列表
//! - [`mip_map_pass`]：分批生成 mip 链的 compute pass
//!
//! # 前提
//!
//! 同一帧的所有 pass 在同一个线程上按固定顺序录制，命令列表提交到同一个 queue 按提交顺序执行。
//! 资源状态跟踪是对 GPU 执行结果的预测，多线程录制或多 queue 提交都会破坏这个前提。

pub mod mip_map_pass;
pub mod render_pass;
pub mod resource_tracker;
pub mod shader_library;
