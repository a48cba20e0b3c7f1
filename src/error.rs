use std::path::PathBuf;
use thiserror::Error;

/// 标注流水线的错误类型
///
/// 三种错误都会直接终止整个批量标注（除非调用方选择跳过失败的场景）：
/// - `InvalidInput`: 输入校验失败（图片扩展名不支持、提示词为空等）
/// - `NotFound`: 缩略图文件不存在
/// - `Inference`: 推理请求过程中的任何失败（网络、模型、超时），
///   保留原始错误描述，不区分临时性和永久性失败
#[derive(Debug, Error)]
pub enum AnnotateError {
    /// 输入校验失败
    #[error("无效的输入: {0}")]
    InvalidInput(String),

    /// 图片文件不存在
    #[error("文件不存在: {}", .0.display())]
    NotFound(PathBuf),

    /// 推理请求失败
    #[error("推理请求失败: {0}")]
    Inference(String),
}
