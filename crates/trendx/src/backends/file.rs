//! 📂 The file backend: NDJSON or CSV in, NDJSON out.
//!
//! 🎬 *[someone exported the metrics table to a file "just for a second".]*
//! *[that was eight months ago. the file is now load-bearing.]*
//!
//! `FileSource` reads one JSON object per line (or one CSV row per line, with a header)
//! and pulls an id and a view count out of configurable fields, so a warehouse export with
//! `sku` / `item_viewed` columns, or a spreadsheet dump with `Sku` / `Item Viewed`, works
//! without a preprocessing step. View counts go through the same coercion as everything
//! else: `"1,234"` is 1234, `null` is 0, `"lots"` is also 0.
//!
//! `write_results_ndjson` is the other direction: dump a scored run to disk for humans
//! and spreadsheets to argue over.
//!
//! ⚠️ Blank lines are skipped. Malformed lines (and CSV files missing the id column) are NOT; they fail the read with a line number,
//! because silently dropping a product is worse than loudly refusing to run. 🦆

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, trace, warn};

use crate::backends::MetricsSource;
use crate::common::{MetricRecord, ScoreResult};
use crate::error::SyncError;
use crate::scoring::coerce_view_count;

/// 🗂️ What the metrics file looks like on disk.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Ndjson,
    /// header row required; `id_field` / `views_field` name columns
    Csv,
}

// -- 📂 config lives next to the backend that reads it
#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    pub file_name: String,
    #[serde(default)]
    pub format: FileFormat,
    /// 🏷️ Which JSON field holds the item id.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// 👀 Which JSON field holds the view count.
    #[serde(default = "default_views_field")]
    pub views_field: String,
}

fn default_id_field() -> String {
    "item_id".to_string()
}

fn default_views_field() -> String {
    "view_count".to_string()
}

impl FileSourceConfig {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            format: FileFormat::default(),
            id_field: default_id_field(),
            views_field: default_views_field(),
        }
    }
}

/// 📂 Reads the whole file on every fetch. There is no cursor and no cache.
#[derive(Debug, Clone)]
pub struct FileSource {
    config: FileSourceConfig,
}

impl FileSource {
    pub fn new(config: FileSourceConfig) -> Self {
        Self { config }
    }

    /// 📖 Every keyed record in the file, in file order.
    async fn read_all(&self) -> Result<Vec<MetricRecord>, SyncError> {
        match self.config.format {
            FileFormat::Ndjson => self.read_ndjson().await,
            FileFormat::Csv => self.read_csv().await,
        }
    }

    async fn read_ndjson(&self) -> Result<Vec<MetricRecord>, SyncError> {
        let file = File::open(&self.config.file_name).await.map_err(|e| {
            SyncError::source_unavailable(format!(
                "could not open '{}': {e}",
                self.config.file_name
            ))
        })?;
        let mut lines = BufReader::new(file).lines();

        let mut records = Vec::new();
        let mut skipped = 0usize;
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await.map_err(|e| {
            SyncError::source_unavailable(format!(
                "read error in '{}' after line {line_no}: {e}",
                self.config.file_name
            ))
        })? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line).map_err(|e| {
                SyncError::query_failed(format!(
                    "'{}' line {line_no} is not valid JSON: {e}",
                    self.config.file_name
                ))
            })?;
            match self.record_from_value(&value) {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }

        self.log_read(records.len(), skipped);
        Ok(records)
    }

    /// 📊 CSV with a header row. The csv crate is sync, so the file is read whole first.
    async fn read_csv(&self) -> Result<Vec<MetricRecord>, SyncError> {
        let name = &self.config.file_name;
        let bytes = tokio::fs::read(name)
            .await
            .map_err(|e| SyncError::source_unavailable(format!("could not open '{name}': {e}")))?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(bytes.as_slice());

        let headers = reader
            .headers()
            .map_err(|e| SyncError::query_failed(format!("'{name}' has no readable CSV header: {e}")))?
            .clone();
        let column = |field: &str| headers.iter().position(|h| h == field);
        let id_col = column(&self.config.id_field).ok_or_else(|| {
            SyncError::query_failed(format!(
                "'{name}' has no '{}' column (columns: {})",
                self.config.id_field,
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        })?;
        let views_col = column(&self.config.views_field);
        if views_col.is_none() {
            warn!(
                "⚠️ '{name}' has no '{}' column, every view count will be 0",
                self.config.views_field
            );
        }

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (row, result) in reader.records().enumerate() {
            // -- row 1 is the header, humans count from there
            let row_no = row + 2;
            let record = result
                .map_err(|e| SyncError::query_failed(format!("'{name}' row {row_no} is not valid CSV: {e}")))?;
            let item_id = record.get(id_col).unwrap_or_default();
            if item_id.is_empty() {
                skipped += 1;
                continue;
            }
            let view_count = views_col
                .and_then(|col| record.get(col))
                .map_or(0, |raw| coerce_view_count(&Value::String(raw.to_string())));
            records.push(MetricRecord::new(item_id, view_count));
        }

        self.log_read(records.len(), skipped);
        Ok(records)
    }

    fn log_read(&self, read: usize, skipped: usize) {
        if skipped > 0 {
            warn!(
                "⚠️ Skipped {skipped} rows in '{}' with no usable '{}'",
                self.config.file_name, self.config.id_field
            );
        }
        debug!("📂 Read {read} records from '{}'", self.config.file_name);
    }

    fn record_from_value(&self, value: &Value) -> Option<MetricRecord> {
        let item_id = match value.get(&self.config.id_field)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        if item_id.is_empty() {
            return None;
        }
        let view_count = value
            .get(&self.config.views_field)
            .map_or(0, coerce_view_count);
        Some(MetricRecord::new(item_id, view_count))
    }
}

#[async_trait]
impl MetricsSource for FileSource {
    async fn fetch_eligible_metrics(&self) -> Result<Vec<MetricRecord>, SyncError> {
        self.read_all().await
    }

    async fn lookup_item(&self, item_id: &str) -> Result<Option<MetricRecord>, SyncError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|r| r.item_id == item_id))
    }
}

/// 💾 Write every scored result as one NDJSON line. Returns how many lines were written.
pub async fn write_results_ndjson(path: &Path, results: &[ScoreResult]) -> Result<usize> {
    let file = File::create(path)
        .await
        .with_context(|| format!("💀 Could not create '{}'. The disk said no.", path.display()))?;
    let mut writer = BufWriter::new(file);
    for result in results {
        let mut line = serde_json::to_string(result)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
    }
    trace!("🎬 final flush, the BufWriter empties its soul to disk");
    // -- async Drop is not a thing, so no flush means the tail of the file stays in memory
    writer.flush().await.with_context(|| {
        format!(
            "💀 Error flushing '{}'. The bytes were SO close to the disk.",
            path.display()
        )
    })?;
    info!("💾 Exported {} results to '{}'", results.len(), path.display());
    Ok(results.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_ndjson(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("💀 temp file");
        file.write_all(contents.as_bytes()).expect("💀 temp write");
        file
    }

    fn source_for(file: &tempfile::NamedTempFile) -> FileSource {
        FileSource::new(FileSourceConfig::new(file.path().to_string_lossy()))
    }

    #[tokio::test]
    async fn the_one_where_the_export_is_messy_but_readable() {
        let file = temp_ndjson(concat!(
            r#"{"item_id": "A", "view_count": 0}"#, "\n",
            "\n",
            r#"{"item_id": "B", "view_count": "1,234"}"#, "\n",
            r#"{"item_id": 42, "view_count": null}"#, "\n",
            r#"{"item_id": "", "view_count": 5}"#, "\n",
            r#"{"item_id": "C"}"#, "\n",
        ));
        let records = source_for(&file).fetch_eligible_metrics().await.unwrap();
        assert_eq!(
            records,
            vec![
                MetricRecord::new("A", 0),
                MetricRecord::new("B", 1_234),
                MetricRecord::new("42", 0),
                MetricRecord::new("C", 0),
            ]
        );
    }

    #[tokio::test]
    async fn the_one_where_the_columns_have_warehouse_names() {
        let file = temp_ndjson("{\"sku\": \"SKU-9\", \"item_viewed\": 99}\n");
        let mut config = FileSourceConfig::new(file.path().to_string_lossy());
        config.id_field = "sku".to_string();
        config.views_field = "item_viewed".to_string();
        let records = FileSource::new(config).fetch_eligible_metrics().await.unwrap();
        assert_eq!(records, vec![MetricRecord::new("SKU-9", 99)]);
    }

    #[tokio::test]
    async fn the_one_where_the_spreadsheet_export_drops_right_in() {
        let file = temp_ndjson(concat!(
            "Sku,Item Viewed,Name\n",
            "SKU-1,0,Lamp\n",
            "SKU-2,\"1,234\",Rug\n",
            " SKU-3 ,,Sofa\n",
            ",7,Ghost\n",
        ));
        let mut config = FileSourceConfig::new(file.path().to_string_lossy());
        config.format = FileFormat::Csv;
        config.id_field = "Sku".to_string();
        config.views_field = "Item Viewed".to_string();
        let source = FileSource::new(config);

        let records = source.fetch_eligible_metrics().await.unwrap();
        assert_eq!(
            records,
            vec![
                MetricRecord::new("SKU-1", 0),
                MetricRecord::new("SKU-2", 1_234),
                MetricRecord::new("SKU-3", 0),
            ]
        );
        assert_eq!(source.lookup_item("SKU-2").await.unwrap(), Some(MetricRecord::new("SKU-2", 1_234)));
    }

    #[tokio::test]
    async fn the_one_where_the_csv_has_no_id_column() {
        let file = temp_ndjson("name,views\nLamp,3\n");
        let mut config = FileSourceConfig::new(file.path().to_string_lossy());
        config.format = FileFormat::Csv;
        let err = FileSource::new(config).fetch_eligible_metrics().await.unwrap_err();
        assert_eq!(err.kind(), "query_failed");
        assert!(err.to_string().contains("no 'item_id' column"));
    }

    #[tokio::test]
    async fn the_one_where_line_three_is_a_liar() {
        let file = temp_ndjson("{\"item_id\": \"A\"}\n{\"item_id\": \"B\"}\n{not json\n");
        let err = source_for(&file).fetch_eligible_metrics().await.unwrap_err();
        assert_eq!(err.kind(), "query_failed");
        assert!(err.to_string().contains("line 3"));
    }

    #[tokio::test]
    async fn the_one_where_the_file_was_never_there() {
        let source = FileSource::new(FileSourceConfig::new("/definitely/not/here.ndjson"));
        let err = source.fetch_eligible_metrics().await.unwrap_err();
        assert_eq!(err.kind(), "source_unavailable");
    }

    #[tokio::test]
    async fn the_one_where_lookup_finds_the_one() {
        let file = temp_ndjson("{\"item_id\": \"A\", \"view_count\": 1}\n{\"item_id\": \"B\", \"view_count\": 2}\n");
        let source = source_for(&file);
        assert_eq!(source.lookup_item("B").await.unwrap(), Some(MetricRecord::new("B", 2)));
        assert_eq!(source.lookup_item("Z").await.unwrap(), None);
    }

    #[tokio::test]
    async fn the_one_where_results_land_on_disk_one_per_line() {
        let dir = tempfile::tempdir().expect("💀 temp dir");
        let path = dir.path().join("scores.ndjson");
        let results = vec![
            ScoreResult {
                item_id: "A".into(),
                view_count: 3,
                trending_score: 84.948_500_216_800_94,
            },
            ScoreResult {
                item_id: "B".into(),
                view_count: 9_999,
                trending_score: 0.0,
            },
        ];
        assert_eq!(write_results_ndjson(&path, &results).await.unwrap(), 2);

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            serde_json::json!({"item_id": "A", "view_count": 3, "trending_score": 84.95})
        );
    }
}
