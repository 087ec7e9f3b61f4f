use std::io::Write;

/// 日志格式：带颜色的 level，时间戳，以及灰色的源码位置
fn format_record(buf: &mut env_logger::fmt::Formatter, record: &log::Record) -> std::io::Result<()> {
    let info_style = buf
        .default_level_style(log::Level::Info)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
    let warn_style = buf
        .default_level_style(log::Level::Warn)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
    let error_style = buf
        .default_level_style(log::Level::Error)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

    let level_style = match record.level() {
        log::Level::Info => info_style,
        log::Level::Warn => warn_style,
        log::Level::Error => error_style,
        _ => buf.default_level_style(record.level()),
    };
    let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

    let line = record.line().unwrap_or(!0);
    let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
    let time = chrono::Local::now().format("%Y/%m/%d %H:%M:%S");
    let level = record.level();
    let module = record.module_path().unwrap_or("");

    writeln!(
        buf,
        "{level_style}[{time}] {level}: {}{level_style:#}\n\t {grey_style}In {module} At {file}:{line}{grey_style:#}",
        record.args()
    )
}

/// 初始化全局 logger
///
/// 默认级别为 Info，可以通过 `RUST_LOG` 环境变量覆盖
pub fn init_log() {
    env_logger::Builder::new()
        .format(format_record)
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// 测试中使用的 logger，输出会被 test harness 捕获
///
/// 可以重复调用，只有第一次生效
pub fn init_log_for_test() {
    let _ = env_logger::Builder::new()
        .format(format_record)
        .filter(None, log::LevelFilter::Debug)
        .parse_default_env()
        .is_test(true)
        .try_init();
}
