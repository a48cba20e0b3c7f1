use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// 纯文本运行日志的抽象：一条一条往后追加
///
/// 显式传入批量标注器和运行记录器，替代原先的全局日志句柄
pub trait ProgressSink {
    /// 追加一行文本（自动补换行）
    fn append_line(&mut self, line: &str) -> Result<()>;
}

/// 写入文件的运行日志
///
/// 每次写入时以追加模式打开文件，文件不存在则创建
pub struct FileLog {
    path: PathBuf,
}

impl FileLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProgressSink for FileLog {
    fn append_line(&mut self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("打开运行日志失败: {}", self.path.display()))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("写入运行日志失败: {}", self.path.display()))?;
        Ok(())
    }
}

/// 丢弃所有输出的运行日志（未配置日志文件时使用）
pub struct NullLog;

impl ProgressSink for NullLog {
    fn append_line(&mut self, _line: &str) -> Result<()> {
        Ok(())
    }
}

/// 一次标注运行的记录，追加到运行历史 CSV 中
///
/// 创建后不再修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    /// 目标列名
    pub column: String,
    /// 使用的模型
    pub model: String,
    /// 完整提示词
    pub prompt: String,
    /// 开始时间
    pub start_time: String,
    /// 结束时间
    pub end_time: String,
    /// 总耗时
    pub elapsed_time: String,
}

/// 格式化时间戳（精确到微秒）
pub fn format_timestamp(time: DateTime<Local>) -> String {
    time.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// 格式化耗时为 `H:MM:SS[.微秒]`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_seconds = elapsed.num_seconds();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let micros = elapsed.subsec_nanos() / 1000;

    if micros == 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}:{:02}.{:06}", hours, minutes, seconds, micros)
    }
}

/// 读取运行历史 CSV，追加一条记录后整表重写
///
/// 文件不存在时从空表开始
pub fn append_run_entry(path: &Path, entry: &RunLogEntry) -> Result<()> {
    let mut entries: Vec<RunLogEntry> = if path.exists() {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("读取运行历史失败: {}", path.display()))?;
        reader
            .deserialize()
            .collect::<std::result::Result<_, _>>()
            .context("解析运行历史记录失败")?
    } else {
        Vec::new()
    };

    entries.push(entry.clone());

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("写入运行历史失败: {}", path.display()))?;
    for e in &entries {
        writer.serialize(e).context("序列化运行历史记录失败")?;
    }
    writer.flush().context("刷新运行历史输出失败")?;

    Ok(())
}

/// 运行记录器：为一次标注运行写入开始和结束标记
///
/// 不捕获批量标注的失败——批量中途失败时结束标记不会被写入，
/// 运行历史也不会更新，日志中只留下一个没有配对结束块的开始块
pub struct RunRecorder {
    column: String,
    model: String,
    prompt: String,
    start_time: DateTime<Local>,
}

impl RunRecorder {
    /// 开始一次运行：向日志写入开始块
    pub fn begin(
        sink: &mut dyn ProgressSink,
        column: &str,
        model: &str,
        prompt: &str,
    ) -> Result<Self> {
        let start_time = Local::now();

        sink.append_line("")?;
        sink.append_line(&format!("VLM Annotation for column: {} ", column))?;
        sink.append_line(&format!("Model: {} ", model))?;
        sink.append_line(&format!("Prompt: {} ", prompt))?;
        sink.append_line(&format!("Start time: {} ", format_timestamp(start_time)))?;
        sink.append_line("")?;
        sink.append_line("--Log Started--")?;

        info!("⏱️  开始标注: {}", format_timestamp(start_time));

        Ok(Self {
            column: column.to_string(),
            model: model.to_string(),
            prompt: prompt.to_string(),
            start_time,
        })
    }

    /// 运行的开始时间
    pub fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    /// 结束一次运行：写入结束标记并构建运行记录
    ///
    /// 配置了运行历史文件时将记录追加到历史表中
    pub fn finish(
        self,
        sink: &mut dyn ProgressSink,
        history_path: Option<&Path>,
    ) -> Result<RunLogEntry> {
        let end_time = Local::now();
        let elapsed = end_time - self.start_time;

        let entry = RunLogEntry {
            column: self.column,
            model: self.model,
            prompt: self.prompt,
            start_time: format_timestamp(self.start_time),
            end_time: format_timestamp(end_time),
            elapsed_time: format_elapsed(elapsed),
        };

        // 先落盘运行历史，结束标记最后写入文本日志
        if let Some(path) = history_path {
            append_run_entry(path, &entry)?;
            info!("📋 运行记录已追加到: {}", path.display());
        }

        sink.append_line(&format!("End time: {}", entry.end_time))?;
        sink.append_line("----------")?;
        sink.append_line("")?;

        info!("⏱️  标注结束: {}", entry.end_time);

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::seconds(323)), "0:05:23");
        assert_eq!(
            format_elapsed(Duration::seconds(3600 * 2 + 61) + Duration::microseconds(123456)),
            "2:01:01.123456"
        );
    }

    #[test]
    fn test_file_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");

        let mut log = FileLog::new(&path);
        log.append_line("first").unwrap();
        log.append_line("second").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_recorder_brackets_run() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("run.log");
        let history_path = dir.path().join("history.csv");

        let mut log = FileLog::new(&log_path);
        let recorder =
            RunRecorder::begin(&mut log, "location_vlm", "qwen2.5-vl-7b-instruct", "prompt")
                .unwrap();
        let entry = recorder.finish(&mut log, Some(&history_path)).unwrap();

        assert_eq!(entry.column, "location_vlm");
        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("VLM Annotation for column: location_vlm"));
        assert!(content.contains("--Log Started--"));
        assert!(content.contains("End time: "));

        // 历史表中应当恰好有一条记录
        let mut reader = csv::Reader::from_path(&history_path).unwrap();
        let entries: Vec<RunLogEntry> =
            reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].model, "qwen2.5-vl-7b-instruct");
    }

    /// 写入时立刻失败的日志，用于检验 finish 内部的写入顺序
    struct FailingLog;

    impl ProgressSink for FailingLog {
        fn append_line(&mut self, _line: &str) -> Result<()> {
            Err(anyhow::anyhow!("日志不可写"))
        }
    }

    #[test]
    fn test_history_appended_before_end_line() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("run.log");
        let history_path = dir.path().join("history.csv");

        let mut log = FileLog::new(&log_path);
        let recorder = RunRecorder::begin(&mut log, "c", "m", "p").unwrap();

        // 结束标记写入失败时，运行历史应当已经落盘
        let mut failing = FailingLog;
        assert!(recorder.finish(&mut failing, Some(&history_path)).is_err());

        let mut reader = csv::Reader::from_path(&history_path).unwrap();
        let entries: Vec<RunLogEntry> =
            reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].column, "c");
    }

    #[test]
    fn test_append_run_entry_rewrites_whole_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");

        let entry = RunLogEntry {
            column: "c1".to_string(),
            model: "m".to_string(),
            prompt: "p".to_string(),
            start_time: "2024-01-01 00:00:00.000000".to_string(),
            end_time: "2024-01-01 00:05:00.000000".to_string(),
            elapsed_time: "0:05:00".to_string(),
        };
        append_run_entry(&path, &entry).unwrap();

        let mut second = entry.clone();
        second.column = "c2".to_string();
        append_run_entry(&path, &second).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let entries: Vec<RunLogEntry> =
            reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].column, "c1");
        assert_eq!(entries[1].column, "c2");
    }
}
