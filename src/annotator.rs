use anyhow::{Context, Result};
use chrono::Local;
use std::path::Path;
use tracing::{info, warn};

use crate::dataset::SceneTable;
use crate::error::AnnotateError;
use crate::run_log::ProgressSink;
use crate::thumbnail::thumbnail_path;
use crate::vlm_client::Predictor;

/// 每处理多少个场景向运行日志写一次进度
const CHECKPOINT_INTERVAL: usize = 50;

/// 单个场景失败时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// 遇到第一个失败立即终止整个批量（默认行为）
    FailFast,
    /// 跳过失败的场景并记录，继续处理后面的场景
    SkipFailed,
}

/// 一个处理失败的场景
#[derive(Debug)]
pub struct SceneFailure {
    pub scene_id: String,
    pub error: AnnotateError,
}

/// 一次批量标注的结果汇总
#[derive(Debug)]
pub struct BatchSummary {
    /// 成功处理的场景数
    pub processed: usize,
    /// 数据集总行数
    pub total: usize,
    /// 跳过的失败场景（仅在 SkipFailed 策略下非空）
    pub failures: Vec<SceneFailure>,
}

/// 批量标注参数
pub struct BatchRequest<'a> {
    /// 缩略图根目录
    pub frames_dir: &'a Path,
    /// 提示词（已经过确认）
    pub prompt: &'a str,
    /// 预测结果写入的目标列名
    pub column_name: &'a str,
    /// 模型名，原样传给推理服务
    pub model_name: &'a str,
    /// 失败处理策略
    pub policy: FailurePolicy,
}

/// 对数据集中的每个场景执行推理并把结果写回目标列
///
/// 按视频 id 首次出现的顺序逐个视频处理，视频内按原表顺序逐个场景处理。
/// 严格串行：同一时刻只有一个推理请求在途。
/// FailFast 策略下第一个失败会立即向上传播，此前已写入内存表的预测
/// 不会丢失，但是否落盘由调用方决定
pub async fn annotate_batch(
    table: &mut SceneTable,
    client: &dyn Predictor,
    request: &BatchRequest<'_>,
    sink: &mut dyn ProgressSink,
) -> Result<BatchSummary> {
    let video_ids = table.video_ids();
    let total = table.len();
    let column_idx = table.ensure_column(request.column_name);

    info!(
        "🎬 开始批量标注: {} 个视频, 共 {} 个场景, 目标列: {}",
        video_ids.len(),
        total,
        request.column_name
    );

    let mut counter = 0usize;
    let mut failures = Vec::new();

    for video_id in video_ids {
        let scene_ids = table.scene_ids_for(&video_id);
        for scene_id in scene_ids {
            let image_path = thumbnail_path(request.frames_dir, &video_id, &scene_id);

            let prediction = match client
                .predict(&image_path, request.prompt, request.model_name)
                .await
            {
                Ok(prediction) => prediction,
                Err(error) => match request.policy {
                    FailurePolicy::FailFast => {
                        return Err(anyhow::Error::new(error))
                            .with_context(|| format!("场景标注失败: {}", scene_id));
                    }
                    FailurePolicy::SkipFailed => {
                        warn!("⚠️  跳过场景 {}: {}", scene_id, error);
                        failures.push(SceneFailure { scene_id, error });
                        continue;
                    }
                },
            };

            counter += 1;
            info!(
                "Prediction of {}: {} ({}/{})",
                scene_id, prediction, counter, total
            );

            if counter % CHECKPOINT_INTERVAL == 0 {
                let time_now = Local::now().format("%Y-%m-%d %H:%M:%S");
                sink.append_line(&format!(
                    "{} - {}/{} scenes processed. ",
                    time_now, counter, total
                ))?;
            }

            table.set_value(&scene_id, column_idx, &prediction)?;
        }
    }

    info!("✅ 批量标注完成: {}/{} 个场景成功", counter, total);
    if !failures.is_empty() {
        warn!("⚠️  共跳过 {} 个失败的场景", failures.len());
    }

    Ok(BatchSummary {
        processed: counter,
        total,
        failures,
    })
}
