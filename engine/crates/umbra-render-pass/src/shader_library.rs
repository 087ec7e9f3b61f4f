//! Shader 库
//!
//! 以 shader 路径为 key 缓存编译好的 shader 和 pipeline，保证每个路径只编译一次。
//! 库由应用层显式持有，在构造 pass 时以引用传入，不存在全局状态。

use std::any::Any;
use std::collections::HashMap;
use std::ffi::CStr;
use std::rc::Rc;

use umbra_gfx::device::GfxDevice;
use umbra_gfx::error::{GfxError, GfxResult};
use umbra_gfx::pipelines::compute_pipeline::{GfxComputePipeline, GfxComputePipelineDesc, GfxRootSignatureDesc};

/// 可以放进 [`ShaderLibrary`] 的 shader
pub trait ShaderProgram: Any {
    /// 缓存的 key
    fn path(&self) -> &str;

    fn destroy(&mut self, device: &dyn GfxDevice);
}

/// 编译好的 compute shader
pub struct GfxComputeShader {
    pipeline: GfxComputePipeline,
}
// new & init
impl GfxComputeShader {
    pub fn new(
        device: &dyn GfxDevice,
        shader_path: impl Into<String>,
        entry_point: &'static CStr,
        root_signature: GfxRootSignatureDesc,
    ) -> GfxResult<Self> {
        let pipeline = GfxComputePipeline::new(
            device,
            GfxComputePipelineDesc {
                shader_path: shader_path.into(),
                entry_point,
                root_signature,
            },
        )?;
        Ok(Self { pipeline })
    }
}
// getters
impl GfxComputeShader {
    #[inline]
    pub fn pipeline(&self) -> &GfxComputePipeline {
        &self.pipeline
    }

    #[inline]
    pub fn root_signature(&self) -> &GfxRootSignatureDesc {
        self.pipeline.root_signature()
    }
}
impl ShaderProgram for GfxComputeShader {
    fn path(&self) -> &str {
        &self.pipeline.desc().shader_path
    }

    fn destroy(&mut self, device: &dyn GfxDevice) {
        self.pipeline.destroy(device);
    }
}

struct ShaderEntry {
    shader: Rc<dyn Any>,
    destroy: fn(Rc<dyn Any>, &dyn GfxDevice),
}

fn destroy_erased<T: ShaderProgram>(shader: Rc<dyn Any>, device: &dyn GfxDevice) {
    let Ok(shader) = shader.downcast::<T>() else {
        return;
    };
    match Rc::try_unwrap(shader) {
        Ok(mut shader) => shader.destroy(device),
        Err(shader) => log::warn!(
            "shader `{}` is still referenced by {} owners at shutdown",
            shader.path(),
            Rc::strong_count(&shader) - 1
        ),
    }
}

/// 进程内共享的 shader 缓存
///
/// 读多写少，每个 key 只插入一次；重复查询是幂等的。
#[derive(Default)]
pub struct ShaderLibrary {
    shaders: HashMap<String, ShaderEntry>,
    destroyed: bool,
}
// new & init
impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }
}
// destroy
impl ShaderLibrary {
    /// 释放所有 shader，需要在所有 pass 销毁之后调用
    pub fn destroy(mut self, device: &dyn GfxDevice) {
        for (path, entry) in self.shaders.drain() {
            log::info!("destroy shader: {}", path);
            (entry.destroy)(entry.shader, device);
        }
        self.destroyed = true;
    }
}
impl Drop for ShaderLibrary {
    fn drop(&mut self) {
        if !self.destroyed && !self.shaders.is_empty() {
            log::warn!("ShaderLibrary dropped without destroy, {} shaders leaked", self.shaders.len());
        }
    }
}
// 查询
impl ShaderLibrary {
    #[inline]
    pub fn exists(&self, path: &str) -> bool {
        self.shaders.contains_key(path)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    /// 类型不匹配时返回 `None`
    pub fn get_as<T: ShaderProgram>(&self, path: &str) -> Option<Rc<T>> {
        self.shaders.get(path).and_then(|entry| entry.shader.clone().downcast::<T>().ok())
    }

    fn get_checked<T: ShaderProgram>(&self, path: &str) -> GfxResult<Rc<T>> {
        self.get_as::<T>(path)
            .ok_or_else(|| GfxError::Shader(format!("`{path}` is registered with a different shader type")))
    }
}
// 注册
impl ShaderLibrary {
    /// 注册一个 shader，每个路径只能注册一次
    ///
    /// 路径已经存在时会销毁传入的 shader，并返回已经注册的那个。
    pub fn add<T: ShaderProgram>(&mut self, device: &dyn GfxDevice, mut shader: T) -> GfxResult<Rc<T>> {
        let path = shader.path().to_string();
        if self.exists(&path) {
            log::warn!("shader `{}` already registered, discarding the duplicate", path);
            shader.destroy(device);
            return self.get_checked::<T>(&path);
        }

        let shader = Rc::new(shader);
        self.shaders.insert(
            path,
            ShaderEntry {
                shader: shader.clone(),
                destroy: destroy_erased::<T>,
            },
        );
        Ok(shader)
    }

    /// 查询 shader，不存在时通过 `create` 编译并注册
    pub fn get_or_create<T: ShaderProgram>(
        &mut self,
        path: &str,
        create: impl FnOnce() -> GfxResult<T>,
    ) -> GfxResult<Rc<T>> {
        if self.exists(path) {
            return self.get_checked::<T>(path);
        }

        let shader = Rc::new(create()?);
        if shader.path() != path {
            log::warn!("shader created for `{}` reports path `{}`", path, shader.path());
        }
        self.shaders.insert(
            path.to_string(),
            ShaderEntry {
                shader: shader.clone(),
                destroy: destroy_erased::<T>,
            },
        );
        Ok(shader)
    }
}
