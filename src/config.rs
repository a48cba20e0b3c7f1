use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

/// 默认的推理服务地址（LM Studio 本地开发服务器）
pub const DEFAULT_ENDPOINT: &str = "http://localhost:1234/v1";
/// 默认的视觉语言模型
pub const DEFAULT_MODEL: &str = "qwen2.5-vl-7b-instruct";

/// 标注运行配置
#[derive(Debug, Clone)]
pub struct AnnotateConfig {
    /// 推理服务的基础地址
    pub endpoint: String,
    /// 模型名
    pub model: String,
    /// 纯文本运行日志路径（可选）
    pub log_file: Option<PathBuf>,
    /// 运行历史 CSV 路径（可选）
    pub run_log: Option<PathBuf>,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            log_file: None,
            run_log: None,
        }
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(
        config_file: Option<&Path>,
        endpoint: Option<String>,
        model: Option<String>,
        log_file: Option<PathBuf>,
        run_log: Option<PathBuf>,
    ) -> Result<AnnotateConfig> {
        // 1. 先加载配置文件（如果存在）
        let file_config = if let Some(config_path) = config_file {
            Self::load_from_file(config_path).ok()
        } else {
            // 尝试从默认位置加载
            Self::load_from_default_locations().ok()
        };

        // 2. 加载环境变量
        let (env_endpoint, env_model, env_log_file, env_run_log) = Self::load_from_env();

        // 3. 合并配置（优先级：命令行 > 环境变量 > 配置文件 > 默认值）
        let config = AnnotateConfig {
            endpoint: endpoint
                .or(env_endpoint)
                .or(file_config.as_ref().map(|c| c.endpoint.clone()))
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: model
                .or(env_model)
                .or(file_config.as_ref().map(|c| c.model.clone()))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            log_file: log_file
                .or(env_log_file)
                .or(file_config.as_ref().and_then(|c| c.log_file.clone())),
            run_log: run_log
                .or(env_run_log)
                .or(file_config.as_ref().and_then(|c| c.run_log.clone())),
        };

        Ok(config)
    }

    /// 从环境变量加载配置（返回 Option 值，表示是否从环境变量中读取到）
    fn load_from_env() -> (
        Option<String>,
        Option<String>,
        Option<PathBuf>,
        Option<PathBuf>,
    ) {
        (
            env::var("VLM_ANNOTATE_ENDPOINT").ok(),
            env::var("VLM_ANNOTATE_MODEL").ok(),
            env::var("VLM_ANNOTATE_LOG_FILE").ok().map(PathBuf::from),
            env::var("VLM_ANNOTATE_RUN_LOG").ok().map(PathBuf::from),
        )
    }

    /// 从 INI 配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<AnnotateConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut config_parser = configparser::ini::Ini::new();
        config_parser
            .load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        // 尝试从 [vlm_annotate] 节读取，如果没有则使用 [DEFAULT] 节
        let endpoint = config_parser
            .get("vlm_annotate", "endpoint")
            .or_else(|| config_parser.get("DEFAULT", "endpoint"))
            .filter(|v| !v.is_empty());

        let model = config_parser
            .get("vlm_annotate", "model")
            .or_else(|| config_parser.get("DEFAULT", "model"))
            .filter(|v| !v.is_empty());

        let log_file = config_parser
            .get("vlm_annotate", "log_file")
            .or_else(|| config_parser.get("DEFAULT", "log_file"))
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let run_log = config_parser
            .get("vlm_annotate", "run_log")
            .or_else(|| config_parser.get("DEFAULT", "run_log"))
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(AnnotateConfig {
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            log_file,
            run_log,
        })
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<AnnotateConfig> {
        // 1. 当前目录的 vlm-annotate.ini
        let current_dir_config = PathBuf::from("vlm-annotate.ini");
        if current_dir_config.exists() {
            return Self::load_from_file(&current_dir_config);
        }

        // 2. 当前目录的 .vlm-annotate.ini
        let hidden_config = PathBuf::from(".vlm-annotate.ini");
        if hidden_config.exists() {
            return Self::load_from_file(&hidden_config);
        }

        // 3. 用户主目录的 .vlm-annotate.ini
        if let Some(home) = env::var_os("HOME") {
            let home_config = PathBuf::from(home).join(".vlm-annotate.ini");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        // 4. /etc/vlm-annotate.ini (Linux/macOS)
        let etc_config = PathBuf::from("/etc/vlm-annotate.ini");
        if etc_config.exists() {
            return Self::load_from_file(&etc_config);
        }

        Err(anyhow::anyhow!("未找到配置文件"))
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let mut config_parser = configparser::ini::Ini::new();
        config_parser.set(
            "vlm_annotate",
            "endpoint",
            Some(DEFAULT_ENDPOINT.to_string()),
        );
        config_parser.set("vlm_annotate", "model", Some(DEFAULT_MODEL.to_string()));
        config_parser.set("vlm_annotate", "log_file", Some("".to_string()));
        config_parser.set("vlm_annotate", "run_log", Some("".to_string()));

        config_parser
            .write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vlm-annotate.ini");
        std::fs::write(
            &path,
            "[vlm_annotate]\nendpoint = http://10.0.0.2:1234/v1\nmodel = some-vlm\nlog_file = /tmp/run.log\n",
        )
        .unwrap();

        let config = ConfigLoader::load_config(Some(&path), None, None, None, None).unwrap();
        assert_eq!(config.endpoint, "http://10.0.0.2:1234/v1");
        assert_eq!(config.model, "some-vlm");
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/run.log")));
        assert_eq!(config.run_log, None);
    }

    #[test]
    fn test_cli_args_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vlm-annotate.ini");
        std::fs::write(&path, "[vlm_annotate]\nmodel = file-model\n").unwrap();

        let config = ConfigLoader::load_config(
            Some(&path),
            None,
            Some("cli-model".to_string()),
            None,
            None,
        )
        .unwrap();
        assert_eq!(config.model, "cli-model");
        // 文件未指定的字段回落到默认值
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_create_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vlm-annotate.ini");
        ConfigLoader::create_default_config(&path).unwrap();

        let config = ConfigLoader::load_config(Some(&path), None, None, None, None).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.log_file, None);
    }
}
