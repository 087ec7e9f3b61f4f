use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let shader = UmbraPath::shader_build_path_str("pp/mipmap.slang"); // shader/.build/pp/mipmap.slang.spv
/// ```
pub struct UmbraPath {}
impl UmbraPath {
    /// 获取 `shader/.build/` 目录下的着色器路径（编译后的 SPIR-V）
    ///
    /// 返回的字符串同时也是 ShaderLibrary 的 key
    pub fn shader_build_path_str(filename: &str) -> String {
        let shader_path = Self::shader_root_path().join(".build").join(filename);
        let mut shader_build_path = shader_path.to_string_lossy().into_owned();
        shader_build_path.push_str(".spv");
        shader_build_path
    }

    pub fn shader_root_path() -> PathBuf {
        Self::workspace_path().join("shader")
    }

    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // engine/crates/umbra-crate-tools -> workspace root
        Path::new(env!("CARGO_MANIFEST_DIR")).ancestors().nth(3).map(Path::to_path_buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_build_path() {
        let path = UmbraPath::shader_build_path_str("pp/mipmap.slang");
        assert!(path.ends_with("mipmap.slang.spv"));
        assert!(path.contains(".build"));
        assert_eq!(path, UmbraPath::shader_build_path_str("pp/mipmap.slang"));
    }
}
