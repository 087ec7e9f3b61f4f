//! 固定输入输出数量的 Render Pass
//!
//! 输入输出的数量是类型的一部分（const generics），绑定数量不对的资源在编译期就会报错。
//! 每一帧由 [`FramePassList`] 按照固定顺序在同一个录制线程上调用各个 pass 的 `process`。

use std::rc::Rc;

use umbra_crate_tools::profile_span;
use umbra_gfx::commands::command_list::GfxCommandList;
use umbra_gfx::device::GfxDevice;
use umbra_gfx::error::GfxResult;
use umbra_gfx::pipelines::compute_pipeline::GfxRootSignatureDesc;
use umbra_gfx::resources::resource::GfxResource;
use umbra_gfx::resources::state::GfxResourceState;

use crate::resource_tracker::ResourceStateTracker;
use crate::shader_library::GfxComputeShader;

/// pass 执行时可以访问的帧上下文
pub struct RenderPassContext<'a> {
    pub device: &'a dyn GfxDevice,
    pub cmd: &'a mut dyn GfxCommandList,
    pub tracker: &'a mut ResourceStateTracker,
    pub frame_id: u64,
}
impl RenderPassContext<'_> {
    /// 把跟踪器中缓存的 barrier 提交到命令列表
    #[inline]
    pub fn flush_barriers(&mut self) {
        self.tracker.flush(&mut *self.cmd);
    }
}

/// 场景，pass 框架不解释它的结构
pub trait RenderScene {
    fn label(&self) -> &str {
        "scene"
    }
}
impl RenderScene for () {}

/// 相机数据
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderCamera {
    pub view: glam::Mat4,
    pub projection: glam::Mat4,
    pub position: glam::Vec3,
}
impl Default for RenderCamera {
    fn default() -> Self {
        Self {
            view: glam::Mat4::IDENTITY,
            projection: glam::Mat4::IDENTITY,
            position: glam::Vec3::ZERO,
        }
    }
}

/// 所有 pass 的公共接口
pub trait RenderPass {
    fn name(&self) -> &str;

    /// 每帧调用一次
    ///
    /// 返回之前需要把所有访问过的资源留在确定的状态；
    /// 出错时不做任何恢复，错误直接交给调用方。
    fn process(
        &mut self,
        ctx: &mut RenderPassContext,
        scene: &dyn RenderScene,
        camera: &RenderCamera,
    ) -> GfxResult<()>;

    fn destroy(self: Box<Self>, device: &dyn GfxDevice);
}

/// pass 的公共部分：绑定的输入输出资源、compute shader 以及 inline constants
///
/// - `INPUTS` / `OUTPUTS`：绑定的资源数量，构造后不会改变
/// - `D`：每次 dispatch 上传的参数块
pub struct RenderPassBase<const INPUTS: usize, const OUTPUTS: usize, D: bytemuck::Pod> {
    name: String,
    inputs: [Rc<GfxResource>; INPUTS],
    outputs: [Rc<GfxResource>; OUTPUTS],
    shader: Rc<GfxComputeShader>,
    pass_data: D,
}
// new & init
impl<const INPUTS: usize, const OUTPUTS: usize, D: bytemuck::Pod> RenderPassBase<INPUTS, OUTPUTS, D> {
    pub const INPUT_COUNT: usize = INPUTS;
    pub const OUTPUT_COUNT: usize = OUTPUTS;

    pub fn new(
        name: impl Into<String>,
        inputs: [Rc<GfxResource>; INPUTS],
        outputs: [Rc<GfxResource>; OUTPUTS],
        shader: Rc<GfxComputeShader>,
        pass_data: D,
    ) -> Self {
        let name = name.into();
        debug_assert!(
            size_of::<D>() as u32 <= shader.root_signature().constants_size,
            "pass data of `{name}` does not fit in the inline constants"
        );
        log::info!("create render pass `{}`: {} inputs, {} outputs", name, INPUTS, OUTPUTS);

        Self {
            name,
            inputs,
            outputs,
            shader,
            pass_data,
        }
    }
}
// getters
impl<const INPUTS: usize, const OUTPUTS: usize, D: bytemuck::Pod> RenderPassBase<INPUTS, OUTPUTS, D> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn inputs(&self) -> &[Rc<GfxResource>; INPUTS] {
        &self.inputs
    }

    #[inline]
    pub fn outputs(&self) -> &[Rc<GfxResource>; OUTPUTS] {
        &self.outputs
    }

    #[inline]
    pub fn shader(&self) -> &Rc<GfxComputeShader> {
        &self.shader
    }

    #[inline]
    pub fn root_signature(&self) -> &GfxRootSignatureDesc {
        self.shader.root_signature()
    }

    #[inline]
    pub fn pass_data(&self) -> &D {
        &self.pass_data
    }

    #[inline]
    pub fn pass_data_mut(&mut self) -> &mut D {
        &mut self.pass_data
    }
}
// 绑定
impl<const INPUTS: usize, const OUTPUTS: usize, D: bytemuck::Pod> RenderPassBase<INPUTS, OUTPUTS, D> {
    /// 重新绑定输入，返回之前绑定的资源
    pub fn bind_inputs(&mut self, inputs: [Rc<GfxResource>; INPUTS]) -> [Rc<GfxResource>; INPUTS] {
        std::mem::replace(&mut self.inputs, inputs)
    }

    /// 重新绑定输出，返回之前绑定的资源
    pub fn bind_outputs(&mut self, outputs: [Rc<GfxResource>; OUTPUTS]) -> [Rc<GfxResource>; OUTPUTS] {
        std::mem::replace(&mut self.outputs, outputs)
    }

    /// 所有输入转换到 `state`
    pub fn transition_inputs(&self, tracker: &mut ResourceStateTracker, state: GfxResourceState) -> GfxResult<()> {
        self.inputs.iter().try_for_each(|input| tracker.transition(input, state))
    }

    /// 所有输出转换到 `state`
    pub fn transition_outputs(&self, tracker: &mut ResourceStateTracker, state: GfxResourceState) -> GfxResult<()> {
        self.outputs.iter().try_for_each(|output| tracker.transition(output, state))
    }
}
// 命令录制
impl<const INPUTS: usize, const OUTPUTS: usize, D: bytemuck::Pod> RenderPassBase<INPUTS, OUTPUTS, D> {
    #[inline]
    pub fn bind_pipeline(&self, cmd: &mut dyn GfxCommandList) {
        cmd.set_compute_pipeline(self.shader.pipeline());
    }

    /// 以 inline constants 的形式上传参数块
    #[inline]
    pub fn upload_pass_data(&self, cmd: &mut dyn GfxCommandList) {
        cmd.set_compute_root_constants(GfxRootSignatureDesc::CONSTANTS_SLOT, bytemuck::bytes_of(&self.pass_data));
    }
}

/// 一帧中按顺序执行的 pass 列表
#[derive(Default)]
pub struct FramePassList {
    passes: Vec<Box<dyn RenderPass>>,
}
// new & init
impl FramePassList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pass: impl RenderPass + 'static) {
        self.add_boxed(Box::new(pass));
    }

    pub fn add_boxed(&mut self, pass: Box<dyn RenderPass>) {
        log::info!("add pass `{}` at position {}", pass.name(), self.passes.len());
        self.passes.push(pass);
    }
}
// destroy
impl FramePassList {
    pub fn destroy(self, device: &dyn GfxDevice) {
        for pass in self.passes {
            pass.destroy(device);
        }
    }
}
// getters
impl FramePassList {
    #[inline]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }
}
// 执行
impl FramePassList {
    /// 按添加顺序执行所有 pass
    ///
    /// 每个 pass 执行之后检查设备状态，遇到第一个错误就停止。
    /// 所有错误都是致命的：记录日志之后交给调用方，剩下的 pass 不会执行。
    pub fn execute(
        &mut self,
        ctx: &mut RenderPassContext,
        scene: &dyn RenderScene,
        camera: &RenderCamera,
    ) -> GfxResult<()> {
        let _span = profile_span!("FramePassList::execute");

        ctx.device.status().inspect_err(|err| {
            log::error!("frame {} aborted before any pass: {}", ctx.frame_id, err);
        })?;

        for pass in &mut self.passes {
            ctx.cmd.begin_label(pass.name());
            let result = pass.process(ctx, scene, camera).and_then(|_| ctx.device.status());
            ctx.cmd.end_label();

            if let Err(err) = result {
                log::error!("pass `{}` failed at frame {}: {}", pass.name(), ctx.frame_id, err);
                // 跟踪器中的状态已经提交，命令列表需要包含对应的 barrier
                ctx.flush_barriers();
                return Err(err);
            }
        }

        ctx.flush_barriers();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use umbra_gfx::commands::barrier::GfxBarrier;
    use umbra_gfx::commands::recording::{GfxCommand, GfxRecordingCommandList};
    use umbra_gfx::device::headless::GfxHeadlessDevice;
    use umbra_gfx::error::GfxError;
    use umbra_gfx::resources::resource::GfxTextureDesc;

    const ROOT_SIGNATURE: GfxRootSignatureDesc = GfxRootSignatureDesc {
        constants_size: 16,
        srv_table_width: 1,
        uav_table_width: 1,
    };

    fn texture(raw: u64, state: GfxResourceState) -> Rc<GfxResource> {
        let desc = GfxTextureDesc::new_2d_with_mips(8, 8, vk::Format::R8G8B8A8_UNORM);
        Rc::new(GfxResource::new(vk::Image::from_raw(raw), desc, Some(state), format!("tex-{raw}")))
    }

    fn shader(device: &GfxHeadlessDevice) -> Rc<GfxComputeShader> {
        Rc::new(GfxComputeShader::new(device, "copy.spv", c"main", ROOT_SIGNATURE).unwrap())
    }

    /// 把输入拷贝到输出的 pass，记录执行顺序
    struct CopyPass {
        base: RenderPassBase<1, 1, [u32; 4]>,
        log: Rc<RefCell<Vec<String>>>,
        fail: bool,
    }
    impl RenderPass for CopyPass {
        fn name(&self) -> &str {
            self.base.name()
        }

        fn process(
            &mut self,
            ctx: &mut RenderPassContext,
            _scene: &dyn RenderScene,
            _camera: &RenderCamera,
        ) -> GfxResult<()> {
            self.log.borrow_mut().push(self.name().to_string());
            self.base.transition_inputs(ctx.tracker, GfxResourceState::NON_PIXEL_SHADER_READ)?;
            if self.fail {
                return Err(GfxError::DeviceLost);
            }

            self.base.transition_outputs(ctx.tracker, GfxResourceState::UNORDERED_ACCESS)?;
            ctx.flush_barriers();

            self.base.bind_pipeline(ctx.cmd);
            self.base.upload_pass_data(ctx.cmd);
            ctx.cmd.dispatch(glam::uvec3(1, 1, 1));

            self.base.transition_outputs(ctx.tracker, GfxResourceState::ALL_SHADER_READ)
        }

        fn destroy(self: Box<Self>, device: &dyn GfxDevice) {
            destroy_shader(self.base, device);
        }
    }

    fn copy_pass(
        device: &GfxHeadlessDevice,
        name: &str,
        input: Rc<GfxResource>,
        output: Rc<GfxResource>,
        log: &Rc<RefCell<Vec<String>>>,
        fail: bool,
    ) -> CopyPass {
        CopyPass {
            base: RenderPassBase::new(name, [input], [output], shader(device), [0; 4]),
            log: log.clone(),
            fail,
        }
    }

    fn destroy_shader<const I: usize, const O: usize>(base: RenderPassBase<I, O, [u32; 4]>, device: &dyn GfxDevice) {
        let RenderPassBase { shader, .. } = base;
        if let Ok(mut shader) = Rc::try_unwrap(shader) {
            crate::shader_library::ShaderProgram::destroy(&mut shader, device);
        }
    }

    #[test]
    fn test_arity_is_part_of_the_type() {
        assert_eq!(RenderPassBase::<1, 1, [u32; 4]>::INPUT_COUNT, 1);
        assert_eq!(RenderPassBase::<2, 0, [u32; 4]>::INPUT_COUNT, 2);
        assert_eq!(RenderPassBase::<2, 0, [u32; 4]>::OUTPUT_COUNT, 0);
    }

    #[test]
    fn test_rebind_and_pass_data() {
        let device = GfxHeadlessDevice::new();
        let a = texture(1, GfxResourceState::COMMON);
        let b = texture(2, GfxResourceState::COMMON);
        let mut base = RenderPassBase::<1, 0, [u32; 4]>::new("rebind", [a.clone()], [], shader(&device), [0; 4]);

        let [old] = base.bind_inputs([b.clone()]);
        assert!(Rc::ptr_eq(&old, &a));
        assert!(Rc::ptr_eq(&base.inputs()[0], &b));

        base.pass_data_mut()[2] = 7;
        let mut cmd = GfxRecordingCommandList::new("test");
        base.upload_pass_data(&mut cmd);
        assert_eq!(cmd.commands()[0], GfxCommand::SetComputeRootConstants {
            slot: GfxRootSignatureDesc::CONSTANTS_SLOT,
            data: bytemuck::bytes_of(&[0u32, 0, 7, 0]).to_vec(),
        });

        destroy_shader(base, &device);
        assert_eq!(device.live_pipeline_count(), 0);
    }

    #[test]
    fn test_passes_run_in_order_and_leave_terminal_state() {
        let device = GfxHeadlessDevice::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let albedo = texture(1, GfxResourceState::COPY_DEST);
        let blurred = texture(2, GfxResourceState::COMMON);
        let sharpened = texture(3, GfxResourceState::COMMON);

        let mut passes = FramePassList::new();
        passes.add(copy_pass(&device, "blur", albedo.clone(), blurred.clone(), &log, false));
        passes.add(copy_pass(&device, "sharpen", blurred.clone(), sharpened.clone(), &log, false));
        assert_eq!(passes.pass_names(), vec!["blur", "sharpen"]);

        let mut cmd = GfxRecordingCommandList::new("frame");
        let mut tracker = ResourceStateTracker::new();
        let mut ctx = RenderPassContext {
            device: &device,
            cmd: &mut cmd,
            tracker: &mut tracker,
            frame_id: 0,
        };
        passes.execute(&mut ctx, &(), &RenderCamera::default()).unwrap();

        assert_eq!(*log.borrow(), vec!["blur", "sharpen"]);
        assert_eq!(sharpened.current_state(), Ok(GfxResourceState::ALL_SHADER_READ));
        assert_eq!(blurred.current_state(), Ok(GfxResourceState::NON_PIXEL_SHADER_READ));
        assert!(tracker.pending_barriers().is_empty());
        assert_eq!(cmd.dispatch_count(), 2);
        assert_eq!(cmd.commands().first(), Some(&GfxCommand::BeginLabel("blur".to_string())));

        passes.destroy(&device);
        assert_eq!(device.live_pipeline_count(), 0);
    }

    #[test]
    fn test_first_error_stops_the_frame() {
        let device = GfxHeadlessDevice::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let mut passes = FramePassList::new();
        let common = GfxResourceState::COMMON;
        let input = texture(1, common);
        passes.add(copy_pass(&device, "a", input.clone(), texture(2, common), &log, true));
        passes.add(copy_pass(&device, "b", texture(3, common), texture(4, common), &log, false));

        let mut cmd = GfxRecordingCommandList::new("frame");
        let mut tracker = ResourceStateTracker::new();
        let mut ctx = RenderPassContext {
            device: &device,
            cmd: &mut cmd,
            tracker: &mut tracker,
            frame_id: 3,
        };
        assert_eq!(passes.execute(&mut ctx, &(), &RenderCamera::default()), Err(GfxError::DeviceLost));
        assert_eq!(*log.borrow(), vec!["a"]);
        assert_eq!(cmd.dispatch_count(), 0);

        // 失败之前请求的转换也要录制到命令列表中
        assert!(tracker.pending_barriers().is_empty());
        assert_eq!(input.current_state(), Ok(GfxResourceState::NON_PIXEL_SHADER_READ));
        assert_eq!(cmd.barriers().copied().collect::<Vec<_>>(), vec![GfxBarrier::Transition {
            resource: input.committed_resource(),
            before: common,
            after: GfxResourceState::NON_PIXEL_SHADER_READ,
            mip_levels: input.mip_levels(),
            storage_capable: input.is_storage_capable(),
        }]);

        passes.destroy(&device);
    }

    #[test]
    fn test_device_lost_aborts_frame() {
        let device = GfxHeadlessDevice::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let mut passes = FramePassList::new();
        let input = texture(1, GfxResourceState::COMMON);
        passes.add(copy_pass(&device, "single", input.clone(), texture(2, GfxResourceState::COMMON), &log, false));
        device.simulate_device_lost();

        let mut cmd = GfxRecordingCommandList::new("frame");
        let mut tracker = ResourceStateTracker::new();
        let mut ctx = RenderPassContext {
            device: &device,
            cmd: &mut cmd,
            tracker: &mut tracker,
            frame_id: 0,
        };
        assert_eq!(passes.execute(&mut ctx, &(), &RenderCamera::default()), Err(GfxError::DeviceLost));
        assert!(log.borrow().is_empty());
        assert_eq!(input.current_state(), Ok(GfxResourceState::COMMON));

        passes.destroy(&device);
    }
}
