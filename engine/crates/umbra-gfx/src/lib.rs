//! Umbra 的 GFX 层
//!
//! 对显式 GPU API 的一层薄封装，pass 框架只依赖这里的类型：
//! - [`device::GfxDevice`]：设备能力，由应用层持有
//! - [`descriptors`]：描述符堆以及索引到 handle 的计算
//! - [`resources`]：GPU 资源、资源状态、纹理库
//! - [`commands`]：barrier 与命令录制
//! - [`pipelines`]：compute pipeline 与 root signature

pub mod commands;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod pipelines;
pub mod resources;
