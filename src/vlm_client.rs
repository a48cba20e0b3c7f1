use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as base64_engine;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::AnnotateError;

/// 支持的图片扩展名（不区分大小写）
pub const VALID_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// 推理能力的抽象：一张图片 + 一段提示词 -> 一段文本预测
///
/// 批量标注器只依赖这个 trait，便于在测试中替换为 mock
#[async_trait]
pub trait Predictor {
    async fn predict(
        &self,
        image_path: &Path,
        prompt: &str,
        model_name: &str,
    ) -> Result<String, AnnotateError>;
}

/// 校验一次推理请求的输入
///
/// 按顺序检查：扩展名 -> 文件存在性 -> 提示词非空。
/// 任何一项失败都会在发起网络请求之前返回错误
pub fn validate_request(image_path: &Path, prompt: &str) -> Result<(), AnnotateError> {
    // 裸点文件（如 ".jpg"）没有扩展名，同样按无效输入处理
    let extension = image_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    if !VALID_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AnnotateError::InvalidInput(format!(
            "不支持的图片扩展名: {}（支持的扩展名: {:?}）",
            image_path.display(),
            VALID_EXTENSIONS
        )));
    }

    if !image_path.exists() {
        return Err(AnnotateError::NotFound(image_path.to_path_buf()));
    }

    if prompt.trim().is_empty() {
        return Err(AnnotateError::InvalidInput(
            "提示词不能为空或仅包含空白字符".to_string(),
        ));
    }

    Ok(())
}

/// VLM 推理客户端
///
/// 对接 LM Studio 本地服务的 OpenAI 兼容接口（/v1/chat/completions）。
/// 每次调用发起一轮单条用户消息的对话：提示词文本 + 内嵌 base64 图片。
/// 不重试、不限流，也不给单次请求设置超时——模型挂起时整个流水线会一直阻塞
pub struct VlmClient {
    client: Client,
    /// 服务的基础地址，例如 http://localhost:1234/v1
    endpoint: String,
}

/// chat/completions 请求体
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

/// 消息内容分片：文本或图片
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// chat/completions 响应体（只解析需要的字段）
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl VlmClient {
    /// 创建新的推理客户端
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// 根据扩展名确定图片的 Content-Type
    fn guess_mime_type(image_path: &Path) -> &'static str {
        let ext = image_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "webp" => "image/webp",
            _ => "application/octet-stream",
        }
    }

    /// 将图片文件编码为 data URL
    fn encode_image(image_path: &Path) -> Result<String, AnnotateError> {
        let bytes = fs::read(image_path).map_err(|e| {
            AnnotateError::Inference(format!("读取图片失败: {}: {}", image_path.display(), e))
        })?;
        let mime_type = Self::guess_mime_type(image_path);
        Ok(format!(
            "data:{};base64,{}",
            mime_type,
            base64_engine.encode(&bytes)
        ))
    }
}

#[async_trait]
impl Predictor for VlmClient {
    /// 对一张图片执行一次推理，返回模型的原始文本输出
    ///
    /// 输出不做任何校验或归一化——是否匹配预期标签由下游自行判断。
    /// 推理过程中的任何失败（网络、状态码、解析）统一映射为
    /// `AnnotateError::Inference` 并保留原始错误描述
    async fn predict(
        &self,
        image_path: &Path,
        prompt: &str,
        model_name: &str,
    ) -> Result<String, AnnotateError> {
        // 先校验输入，失败时不发起任何网络请求
        validate_request(image_path, prompt)?;

        let image_url = Self::encode_image(image_path)?;

        let request = ChatRequest {
            model: model_name,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url },
                    },
                ],
            }],
        };

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        debug!("正在请求推理服务: {} (模型: {})", url, model_name);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnnotateError::Inference(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnnotateError::Inference(format!(
                "推理服务返回错误状态: {} - {}",
                status, error_text
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AnnotateError::Inference(format!("读取推理响应失败: {}", e)))?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| AnnotateError::Inference(format!("解析推理响应失败: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AnnotateError::Inference("推理响应中没有任何结果".to_string()))
    }
}
