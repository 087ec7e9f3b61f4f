use std::rc::Rc;

use slotmap::SlotMap;

use crate::device::GfxDevice;
use crate::error::GfxResult;
use crate::resources::resource::{GfxResource, GfxTextureDesc};
use crate::resources::state::GfxResourceState;

slotmap::new_key_type! {
    pub struct GfxTextureHandle;
}

/// 纹理库
///
/// 负责创建纹理，并和引用纹理的 pass 共享所有权。
/// 纹理的销毁是延迟的：`retire` 之后需要等到提交时的帧完成（fence），
/// 并且没有任何 pass 再持有它时才会真正释放。
pub struct GfxTextureLibrary {
    textures: SlotMap<GfxTextureHandle, Rc<GfxResource>>,

    /// 待销毁队列 (resource, retire 时的 frame id)
    pending_destroy: Vec<(Rc<GfxResource>, u64)>,

    destroyed: bool,
}
impl Default for GfxTextureLibrary {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl GfxTextureLibrary {
    pub fn new() -> Self {
        Self {
            textures: SlotMap::with_key(),
            pending_destroy: Vec::new(),
            destroyed: false,
        }
    }
}
// destroy
impl GfxTextureLibrary {
    /// 应用关闭时调用，此时 GPU 已经空闲
    pub fn destroy(mut self, device: &dyn GfxDevice) {
        for (_, texture) in self.textures.drain() {
            device.destroy_texture(texture.committed_resource());
        }
        for (texture, _) in self.pending_destroy.drain(..) {
            device.destroy_texture(texture.committed_resource());
        }
        self.destroyed = true;
    }
}
impl Drop for GfxTextureLibrary {
    fn drop(&mut self) {
        if !self.destroyed {
            log::warn!("GfxTextureLibrary dropped without destroy, {} textures leaked", self.textures.len());
        }
    }
}
// 资源 API
impl GfxTextureLibrary {
    pub fn create_texture(
        &mut self,
        device: &dyn GfxDevice,
        desc: GfxTextureDesc,
        initial_state: GfxResourceState,
        name: impl Into<String>,
    ) -> GfxResult<GfxTextureHandle> {
        let name = name.into();
        let image = device.create_texture(&desc, initial_state, &name)?;
        log::info!(
            "create texture `{}`: {}x{}, {} mips, {:?}",
            name,
            desc.extent.width,
            desc.extent.height,
            desc.mip_levels,
            desc.format
        );

        let resource = GfxResource::new(image, desc, Some(initial_state), name);
        Ok(self.textures.insert(Rc::new(resource)))
    }

    #[inline]
    pub fn get(&self, handle: GfxTextureHandle) -> Option<Rc<GfxResource>> {
        self.textures.get(handle).cloned()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending_destroy.len()
    }

    /// 将纹理移出纹理库，等待 `frame_id` 对应的命令列表执行完成后再释放
    pub fn retire(&mut self, handle: GfxTextureHandle, frame_id: u64) {
        if let Some(texture) = self.textures.remove(handle) {
            log::debug!("retire texture `{}` at frame {}", texture.name(), frame_id);
            self.pending_destroy.push((texture, frame_id));
        }
    }

    /// 释放已经过期的纹理
    ///
    /// 只有 retire 时的帧 <= `completed_frame_id`，并且纹理库持有最后一个引用时才会释放
    pub fn cleanup(&mut self, device: &dyn GfxDevice, completed_frame_id: u64) {
        self.pending_destroy.retain(|(texture, frame_id)| {
            let releasable = *frame_id <= completed_frame_id && Rc::strong_count(texture) == 1;
            if releasable {
                log::info!("destroy texture `{}` (retired at frame {})", texture.name(), frame_id);
                device.destroy_texture(texture.committed_resource());
            }
            !releasable
        });
    }
}
