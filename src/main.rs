use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use vlm_annotate::{
    annotate_batch, AnnotateConfig, BatchRequest, ConfigLoader, FailurePolicy, FileLog, NullLog,
    ProgressSink, RunRecorder, SceneTable, VlmClient,
};

/// VLM 场景标注工具 - 用视觉语言模型批量标注视频场景缩略图
#[derive(Parser, Debug)]
#[command(name = "vlm-annotate")]
#[command(about = "VLM 场景标注工具：逐场景调用本地推理服务，把预测写回元数据表", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 对整个场景元数据表执行一次标注运行
    Annotate {
        /// 场景元数据 CSV 路径（需包含 url 和 id 两列）
        #[arg(short, long)]
        data: PathBuf,

        /// 缩略图根目录（<frames>/<视频 id>/<场景 id>.jpeg）
        #[arg(short, long)]
        frames: PathBuf,

        /// 预测结果写入的目标列名
        #[arg(short, long)]
        column: String,

        /// 提示词文本（已确认，不再交互）
        #[arg(long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// 从文件读取提示词
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// 模型名
        /// 可通过环境变量 VLM_ANNOTATE_MODEL 或配置文件设置
        #[arg(short, long)]
        model: Option<String>,

        /// 推理服务地址（LM Studio 的 OpenAI 兼容接口）
        /// 可通过环境变量 VLM_ANNOTATE_ENDPOINT 或配置文件设置
        #[arg(long)]
        endpoint: Option<String>,

        /// 配置文件路径（可选，支持 .ini 格式）
        /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
        #[arg(long)]
        config: Option<PathBuf>,

        /// 纯文本运行日志路径（可选）
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// 运行历史 CSV 路径（可选）
        #[arg(long)]
        run_log: Option<PathBuf>,

        /// 标注结果输出路径（默认覆盖输入文件）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 跳过失败的场景继续处理（默认遇到第一个失败立即终止）
        #[arg(long)]
        skip_failures: bool,
    },
    /// 在指定位置生成默认配置文件
    InitConfig {
        /// 配置文件输出路径
        #[arg(default_value = "vlm-annotate.ini")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Commands::Annotate {
            data,
            frames,
            column,
            prompt,
            prompt_file,
            model,
            endpoint,
            config: config_file,
            log_file,
            run_log,
            output,
            skip_failures,
        } => {
            let config = ConfigLoader::load_config(
                config_file.as_deref(),
                endpoint,
                model,
                log_file,
                run_log,
            )
            .context("加载配置失败")?;

            let prompt = resolve_prompt(prompt, prompt_file)?;

            run_annotation(RunArgs {
                data,
                frames,
                column,
                prompt,
                output,
                skip_failures,
                config,
            })
            .await
            .context("标注运行失败")?;
        }
        Commands::InitConfig { path } => {
            ConfigLoader::create_default_config(&path).context("创建配置文件失败")?;
            println!("默认配置已写入: {}", path.display());
        }
    }

    Ok(())
}

/// 一次标注运行的全部输入
struct RunArgs {
    data: PathBuf,
    frames: PathBuf,
    column: String,
    prompt: String,
    output: Option<PathBuf>,
    skip_failures: bool,
    config: AnnotateConfig,
}

/// 解析提示词来源：命令行参数或文件
///
/// 交互式确认由调用方在外部完成，这里拿到的提示词视为已确认
fn resolve_prompt(prompt: Option<String>, prompt_file: Option<PathBuf>) -> Result<String> {
    match (prompt, prompt_file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("读取提示词文件失败: {}", path.display()))?;
            Ok(text.trim().to_string())
        }
        (None, None) => anyhow::bail!("必须通过 --prompt 或 --prompt-file 提供提示词"),
    }
}

async fn run_annotation(args: RunArgs) -> Result<()> {
    let mut table = SceneTable::from_csv(&args.data)?;
    let file_name = args
        .data
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| args.data.display().to_string());
    info!("📄 已读取场景元数据: {} ({} 行)", file_name, table.len());

    let mut sink: Box<dyn ProgressSink> = match &args.config.log_file {
        Some(path) => Box::new(FileLog::new(path)),
        None => Box::new(NullLog),
    };

    let recorder = RunRecorder::begin(
        sink.as_mut(),
        &args.column,
        &args.config.model,
        &args.prompt,
    )?;

    info!(
        "🤖 正在请求模型 '{}' (服务地址: {})",
        args.config.model, args.config.endpoint
    );

    let client = VlmClient::new(&args.config.endpoint);
    let policy = if args.skip_failures {
        FailurePolicy::SkipFailed
    } else {
        FailurePolicy::FailFast
    };
    let request = BatchRequest {
        frames_dir: &args.frames,
        prompt: &args.prompt,
        column_name: &args.column,
        model_name: &args.config.model,
        policy,
    };

    // 批量中途失败时直接向上传播：数据集不落盘，日志只留下开始块
    let summary = annotate_batch(&mut table, &client, &request, sink.as_mut()).await?;

    let output_path = args.output.unwrap_or_else(|| args.data.clone());
    table.to_csv(&output_path)?;
    info!(
        "💾 标注结果已写入: {} (目标列: {})",
        output_path.display(),
        args.column
    );

    let entry = recorder.finish(sink.as_mut(), args.config.run_log.as_deref())?;

    info!(
        "🎉 完成！共处理 {}/{} 个场景, 耗时 {}",
        summary.processed, summary.total, entry.elapsed_time
    );
    for failure in &summary.failures {
        info!("  • 已跳过 {}: {}", failure.scene_id, failure.error);
    }

    Ok(())
}
