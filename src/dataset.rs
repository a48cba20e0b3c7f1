use anyhow::{Context, Result};
use std::path::Path;

/// 视频 id 列名（4CAT 导出格式）
pub const VIDEO_ID_COLUMN: &str = "url";
/// 场景 id 列名（4CAT 导出格式）
pub const SCENE_ID_COLUMN: &str = "id";

/// 场景元数据表
///
/// 从 CSV 加载整表到内存，逐单元格原地修改，最后整表写回。
/// 除目标标注列外，所有原始列和行都原样保留
#[derive(Debug, Clone)]
pub struct SceneTable {
    /// 表头
    headers: Vec<String>,
    /// 数据行（与表头等长，新增列时补空字符串）
    rows: Vec<Vec<String>>,
    /// 视频 id 列的下标
    video_id_idx: usize,
    /// 场景 id 列的下标
    scene_id_idx: usize,
}

impl SceneTable {
    /// 从表头和数据行构建场景表
    ///
    /// 要求表中包含 `url`（视频 id）和 `id`（场景 id）两列
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        let video_id_idx = headers
            .iter()
            .position(|h| h == VIDEO_ID_COLUMN)
            .with_context(|| format!("场景元数据缺少 {} 列", VIDEO_ID_COLUMN))?;
        let scene_id_idx = headers
            .iter()
            .position(|h| h == SCENE_ID_COLUMN)
            .with_context(|| format!("场景元数据缺少 {} 列", SCENE_ID_COLUMN))?;

        Ok(Self {
            headers,
            rows,
            video_id_idx,
            scene_id_idx,
        })
    }

    /// 从 CSV 文件加载场景表
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("读取场景元数据失败: {}", path.display()))?;

        let headers: Vec<String> = reader
            .headers()
            .context("读取 CSV 表头失败")?
            .iter()
            .map(String::from)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context("读取 CSV 数据行失败")?;
            rows.push(record.iter().map(String::from).collect());
        }

        Self::new(headers, rows)
    }

    /// 将场景表写回 CSV 文件
    pub fn to_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("写入场景元数据失败: {}", path.display()))?;

        writer
            .write_record(&self.headers)
            .context("写入 CSV 表头失败")?;
        for row in &self.rows {
            writer.write_record(row).context("写入 CSV 数据行失败")?;
        }
        writer.flush().context("刷新 CSV 输出失败")?;

        Ok(())
    }

    /// 表中的行数
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 表头列表
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// 查找列的下标
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// 查找或新增一列，返回列下标
    ///
    /// 新增列时为每一行补上空字符串，保证行与表头等长
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.headers.len() - 1
    }

    /// 按首次出现的顺序返回去重后的视频 id 列表
    pub fn video_ids(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for row in &self.rows {
            let video_id = &row[self.video_id_idx];
            if !seen.contains(video_id) {
                seen.push(video_id.clone());
            }
        }
        seen
    }

    /// 返回某个视频的全部场景 id，保持原表中的相对顺序
    pub fn scene_ids_for(&self, video_id: &str) -> Vec<String> {
        self.rows
            .iter()
            .filter(|row| row[self.video_id_idx] == video_id)
            .map(|row| row[self.scene_id_idx].clone())
            .collect()
    }

    /// 将值写入场景 id 对应行的指定列
    pub fn set_value(&mut self, scene_id: &str, column_idx: usize, value: &str) -> Result<()> {
        let scene_id_idx = self.scene_id_idx;
        let row = self
            .rows
            .iter_mut()
            .find(|row| row[scene_id_idx] == scene_id)
            .with_context(|| format!("场景 id 不存在: {}", scene_id))?;
        row[column_idx] = value.to_string();
        Ok(())
    }

    /// 读取场景 id 对应行的指定列的值（测试和调试用）
    pub fn value(&self, scene_id: &str, column: &str) -> Option<&str> {
        let column_idx = self.column_index(column)?;
        self.rows
            .iter()
            .find(|row| row[self.scene_id_idx] == scene_id)
            .map(|row| row[column_idx].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> SceneTable {
        SceneTable::new(
            vec![
                "url".to_string(),
                "id".to_string(),
                "duration".to_string(),
            ],
            vec![
                vec!["A".to_string(), "A.mp4_scene_1".to_string(), "1.5".to_string()],
                vec!["A".to_string(), "A.mp4_scene_2".to_string(), "2.0".to_string()],
                vec!["B".to_string(), "B.mp4_scene_1".to_string(), "0.8".to_string()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_missing_required_column() {
        let result = SceneTable::new(
            vec!["url".to_string(), "duration".to_string()],
            vec![],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_video_ids_first_seen_order() {
        let table = SceneTable::new(
            vec!["url".to_string(), "id".to_string()],
            vec![
                vec!["B".to_string(), "B.mp4_scene_1".to_string()],
                vec!["A".to_string(), "A.mp4_scene_1".to_string()],
                vec!["B".to_string(), "B.mp4_scene_2".to_string()],
            ],
        )
        .unwrap();
        assert_eq!(table.video_ids(), vec!["B", "A"]);
        assert_eq!(
            table.scene_ids_for("B"),
            vec!["B.mp4_scene_1", "B.mp4_scene_2"]
        );
    }

    #[test]
    fn test_ensure_column_and_set_value() {
        let mut table = sample_table();
        let idx = table.ensure_column("location_vlm");
        // 再次调用返回同一列
        assert_eq!(table.ensure_column("location_vlm"), idx);
        table.set_value("A.mp4_scene_2", idx, "Indoor").unwrap();
        assert_eq!(table.value("A.mp4_scene_2", "location_vlm"), Some("Indoor"));
        assert_eq!(table.value("A.mp4_scene_1", "location_vlm"), Some(""));
        // 原有列不受影响
        assert_eq!(table.value("A.mp4_scene_2", "duration"), Some("2.0"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_set_value_unknown_scene() {
        let mut table = sample_table();
        let idx = table.ensure_column("location_vlm");
        assert!(table.set_value("C.mp4_scene_1", idx, "Indoor").is_err());
    }

    #[test]
    fn test_csv_round_trip_preserves_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenes.csv");

        let mut table = sample_table();
        let idx = table.ensure_column("location_vlm");
        table.set_value("A.mp4_scene_1", idx, "Outdoor").unwrap();
        table.to_csv(&path).unwrap();

        let reloaded = SceneTable::from_csv(&path).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(
            reloaded.headers(),
            &["url", "id", "duration", "location_vlm"]
        );
        assert_eq!(reloaded.value("A.mp4_scene_1", "location_vlm"), Some("Outdoor"));
        assert_eq!(reloaded.value("B.mp4_scene_1", "duration"), Some("0.8"));
    }
}
