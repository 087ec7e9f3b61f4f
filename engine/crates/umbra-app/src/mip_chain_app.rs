use std::rc::Rc;

use ash::vk;
use umbra_crate_tools::profile_span;
use umbra_gfx::commands::command_list::GfxCommandList;
use umbra_gfx::device::GfxDevice;
use umbra_gfx::error::{GfxError, GfxResult};
use umbra_gfx::resources::resource::{GfxResource, GfxTextureDesc};
use umbra_gfx::resources::state::GfxResourceState;
use umbra_gfx::resources::texture_library::GfxTextureLibrary;
use umbra_render_pass::mip_map_pass::{MipMapPass, MipMapPassDesc};
use umbra_render_pass::render_pass::{FramePassList, RenderCamera, RenderPassContext};
use umbra_render_pass::resource_tracker::ResourceStateTracker;
use umbra_render_pass::shader_library::ShaderLibrary;

/// 为若干张纹理生成 mip 链的 headless 应用
///
/// 纹理以 `COPY_DEST` 状态创建（等价于刚刚上传完 mip 0），每帧为每张纹理执行一次 mip 生成。
pub struct MipChainApp<D: GfxDevice> {
    device: D,
    shader_library: ShaderLibrary,
    texture_library: GfxTextureLibrary,
    passes: FramePassList,
    tracker: ResourceStateTracker,

    frame_id: u64,
    mip_pass_desc: MipMapPassDesc,
}
// new & init
impl<D: GfxDevice> MipChainApp<D> {
    pub fn new(device: D, mip_pass_desc: MipMapPassDesc) -> Self {
        Self {
            device,
            shader_library: ShaderLibrary::new(),
            texture_library: GfxTextureLibrary::new(),
            passes: FramePassList::new(),
            tracker: ResourceStateTracker::new(),
            frame_id: 0,
            mip_pass_desc,
        }
    }

    /// 创建一张带完整 mip 链的纹理，并为它添加一个 mip 生成 pass
    pub fn add_texture(&mut self, name: &str, width: u32, height: u32) -> GfxResult<Rc<GfxResource>> {
        let desc = GfxTextureDesc::new_2d_with_mips(width, height, vk::Format::R8G8B8A8_UNORM);
        let handle = self.texture_library.create_texture(&self.device, desc, GfxResourceState::COPY_DEST, name)?;
        let texture = self.texture_library.get(handle).ok_or_else(|| GfxError::InvalidResourceState {
            resource: name.to_string(),
        })?;
        let pass = MipMapPass::new(&self.device, &mut self.shader_library, texture.clone(), self.mip_pass_desc.clone())?;
        self.passes.add(pass);

        Ok(texture)
    }
}
// destroy
impl<D: GfxDevice> MipChainApp<D> {
    /// 需要在 GPU 空闲之后调用
    pub fn destroy(self) -> D {
        let Self {
            device,
            shader_library,
            texture_library,
            passes,
            ..
        } = self;

        passes.destroy(&device);
        shader_library.destroy(&device);
        texture_library.destroy(&device);
        log::info!("mip chain app destroyed");
        device
    }
}
// getters
impl<D: GfxDevice> MipChainApp<D> {
    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn tracker(&self) -> &ResourceStateTracker {
        &self.tracker
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.texture_library.len()
    }
}
// 帧
impl<D: GfxDevice> MipChainApp<D> {
    /// 把一帧的所有 pass 录制到 `cmd`
    ///
    /// `completed_frame_id` 是 GPU 已经执行完成的最新一帧，用于释放延迟销毁的纹理
    pub fn render_frame(&mut self, cmd: &mut dyn GfxCommandList, completed_frame_id: Option<u64>) -> GfxResult<()> {
        let _span = profile_span!("MipChainApp::render_frame");

        if let Some(completed) = completed_frame_id {
            self.texture_library.cleanup(&self.device, completed);
        }

        let mut ctx = RenderPassContext {
            device: &self.device,
            cmd,
            tracker: &mut self.tracker,
            frame_id: self.frame_id,
        };
        self.passes.execute(&mut ctx, &(), &RenderCamera::default())?;

        log::info!(
            "frame {} recorded: {} passes, {} transitions, {} uav barriers so far",
            self.frame_id,
            self.passes.len(),
            self.tracker.transition_count(),
            self.tracker.uav_barrier_count()
        );
        self.frame_id += 1;
        Ok(())
    }
}
