use std::path::{Path, PathBuf};

/// 场景 id 中需要去掉的容器文件后缀
///
/// 4CAT 导出的场景 id 形如 `7295526580741229825.mp4_scene_1`，
/// 而缩略图文件名不包含 `.mp4` 部分
pub const CONTAINER_SUFFIX: &str = ".mp4";

/// 缩略图文件的扩展名
pub const THUMBNAIL_EXT: &str = "jpeg";

/// 根据视频 id 和场景 id 推导缩略图的预期路径
///
/// 路径格式：`<frames_dir>/<video_id>/<cleaned_scene_id>.jpeg`，
/// 其中 `cleaned_scene_id` 是去掉容器后缀之后的场景 id。
/// 纯函数，不做任何 I/O；文件是否存在由调用方（推理客户端）检查
pub fn thumbnail_path(frames_dir: &Path, video_id: &str, scene_id: &str) -> PathBuf {
    let cleaned_id = scene_id.replace(CONTAINER_SUFFIX, "");
    frames_dir
        .join(video_id)
        .join(format!("{}.{}", cleaned_id, THUMBNAIL_EXT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_path() {
        let path = thumbnail_path(
            Path::new("/data/frames"),
            "7295526580741229825",
            "7295526580741229825.mp4_scene_1",
        );
        assert_eq!(
            path,
            PathBuf::from("/data/frames/7295526580741229825/7295526580741229825_scene_1.jpeg")
        );
    }

    #[test]
    fn test_thumbnail_path_idempotent() {
        // 已经清理过的场景 id 推导出相同的路径
        let frames = Path::new("/data/frames");
        let with_suffix = thumbnail_path(frames, "X", "X.mp4_scene_1");
        let without_suffix = thumbnail_path(frames, "X", "X_scene_1");
        assert_eq!(with_suffix, without_suffix);
    }
}
