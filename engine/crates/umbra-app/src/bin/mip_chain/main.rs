use anyhow::Context;
use umbra_app::mip_chain_app::MipChainApp;
use umbra_crate_tools::init_log::init_log;
use umbra_gfx::commands::recording::GfxRecordingCommandList;
use umbra_gfx::device::headless::GfxHeadlessDevice;
use umbra_render_pass::mip_map_pass::MipMapPassDesc;

/// 模拟的 frames in flight 数量
const FRAMES_IN_FLIGHT: u64 = 2;

const FRAME_COUNT: u64 = 4;

fn panic_handler(info: &std::panic::PanicHookInfo) {
    log::error!("{}", info);
}

fn run() -> anyhow::Result<()> {
    let mut app = MipChainApp::new(GfxHeadlessDevice::new(), MipMapPassDesc::default());

    let albedo = app.add_texture("albedo", 2048, 2048).context("create albedo mip chain")?;
    let normal = app.add_texture("normal", 1024, 512).context("create normal mip chain")?;
    log::info!(
        "{} textures, {} passes, {} pipelines compiled",
        app.texture_count(),
        app.pass_count(),
        app.device().compiled_pipeline_count()
    );

    for frame in 0..FRAME_COUNT {
        let mut cmd = GfxRecordingCommandList::new(format!("frame-{frame}"));
        let completed = frame.checked_sub(FRAMES_IN_FLIGHT);
        app.render_frame(&mut cmd, completed).with_context(|| format!("record frame {frame}"))?;
        log::info!("frame {}: {} dispatches, {} barriers", frame, cmd.dispatch_count(), cmd.barrier_count());
        tracy_client::frame_mark();
    }

    log::info!("albedo: {} mips in {:?}", albedo.mip_levels(), albedo.current_state()?);
    log::info!("normal: {} mips in {:?}", normal.mip_levels(), normal.current_state()?);

    drop((albedo, normal));
    let device = app.destroy();
    log::info!(
        "end run. live textures: {}, live pipelines: {}",
        device.live_texture_count(),
        device.live_pipeline_count()
    );
    Ok(())
}

fn main() {
    std::panic::set_hook(Box::new(panic_handler));

    init_log();
    tracy_client::Client::start();
    tracy_client::set_thread_name!("MipChainThread");

    if let Err(err) = run() {
        log::error!("fatal: {:#}", err);
        std::process::exit(1);
    }
}
