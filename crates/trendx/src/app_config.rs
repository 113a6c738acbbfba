//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 4am, right before the cron fires) 🦆
//!
//! 🏗️ Powered by Figment: `TRENDX_*` environment variables first, then an optional TOML
//! file on top. Nested keys in env vars use a double underscore:
//!
//! ```text
//! TRENDX_RUN__MODE=apply
//! TRENDX_INDEX_CONFIG__ELASTICSEARCH__URL=https://search.internal:9200
//! ```

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{
    ElasticsearchIndexConfig, FileSourceConfig, InMemoryIndexConfig, WarehouseSourceConfig,
};
use crate::bulk::DEFAULT_CHUNK_SIZE;
use crate::common::MetricRecord;
use crate::scoring::{DEFAULT_DECAY_FACTOR, DEFAULT_MAX_SCORE};

/// 🎯 The index every product search reads from, unless told otherwise.
pub const DEFAULT_INDEX: &str = "skus_product_pool_v3";

/// 📦 One struct to rule them all: where metrics come from, where scores go, how the run behaves.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source_config: SourceConfig,
    pub index_config: IndexConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// 🚰 Where view counts come from.
#[derive(Debug, Deserialize, Clone)]
// -- lowercase aliases because figment lowercases env var keys on the way in
pub enum SourceConfig {
    #[serde(alias = "warehouse")]
    Warehouse(WarehouseSourceConfig),
    #[serde(alias = "file")]
    File(FileSourceConfig),
    #[serde(alias = "in_memory", alias = "inmemory")]
    InMemory(Vec<MetricRecord>),
}

/// 🕳️ Where trending scores go.
#[derive(Debug, Deserialize, Clone)]
pub enum IndexConfig {
    #[serde(alias = "elasticsearch")]
    Elasticsearch(ElasticsearchIndexConfig),
    #[serde(alias = "in_memory", alias = "inmemory")]
    InMemory(InMemoryIndexConfig),
}

/// 🎛️ The per-run knobs. Every one of these can also be overridden from the CLI.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RunConfig {
    #[serde(default = "default_max_score")]
    pub max_score: f64,
    #[serde(default = "default_decay_factor", alias = "factor")]
    pub decay_factor: f64,
    /// `dry_run` or `apply`. Parsed (and rejected) at validation time, not at load time,
    /// so a typo shows up as an `invalid_parameters` report instead of a config crash.
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_index", alias = "es_index")]
    pub index: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub include_views_count: bool,
    #[serde(default = "default_index_parallelism", alias = "parallelism")]
    pub index_parallelism: usize,
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_max_score() -> f64 {
    DEFAULT_MAX_SCORE
}

fn default_decay_factor() -> f64 {
    DEFAULT_DECAY_FACTOR
}

// -- dry run unless someone says otherwise, loudly, on purpose
fn default_mode() -> String {
    "dry_run".to_string()
}

fn default_index() -> String {
    DEFAULT_INDEX.to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_index_parallelism() -> usize {
    1
}

fn default_show_progress() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_score: default_max_score(),
            decay_factor: default_decay_factor(),
            mode: default_mode(),
            index: default_index(),
            chunk_size: default_chunk_size(),
            include_views_count: false,
            index_parallelism: default_index_parallelism(),
            show_progress: default_show_progress(),
        }
    }
}

/// 🚀 Load the config: from a file, from env vars, or from the sheer power of hoping.
///
/// - `None` → `TRENDX_*` env vars only.
/// - `Some(path)` → env vars + TOML file, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("TRENDX_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (TRENDX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (TRENDX_*). \
                 No file was provided, this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        // 🧪 Figment wants TOML from disk, like it's method acting.
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create test config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    #[test]
    fn the_one_where_the_run_section_is_optional() {
        let config_file = write_test_config(
            r#"
            [source_config.File]
            file_name = "metrics.ndjson"

            [index_config.Elasticsearch]
            url = "http://localhost:9200"
            "#,
        );

        let app_config = load_config(Some(config_file.path()))
            .expect("💀 Defaults should fill in the whole run section.");

        assert_eq!(app_config.run, RunConfig::default());
        assert_eq!(app_config.run.index, "skus_product_pool_v3");
        assert_eq!(app_config.run.chunk_size, 500);
        assert_eq!(app_config.run.mode, "dry_run");
        match app_config.index_config {
            IndexConfig::Elasticsearch(es) => {
                assert_eq!(es.request_timeout_secs, 30);
                assert_eq!(es.connect_timeout_secs, 10);
                assert!(!es.doc_as_upsert);
            }
            honestly_who_knows => panic!(
                "💀 Expected Elasticsearch index config, but serde took us to {:?}. Plot twist energy.",
                honestly_who_knows
            ),
        }
    }

    #[test]
    fn the_one_where_the_old_knob_names_still_work() {
        let config_file = write_test_config(
            r#"
            [run]
            factor = 30.0
            es_index = "skus_staging"
            parallelism = 4
            mode = "apply"
            include_views_count = true

            [source_config.Warehouse]
            url = "postgres://reader@warehouse:5439/analytics"

            [index_config.InMemory]
            "#,
        );

        let app_config = load_config(Some(config_file.path()))
            .expect("💀 Aliases should parse. The witness protection paperwork was valid.");

        assert_eq!(app_config.run.decay_factor, 30.0);
        assert_eq!(app_config.run.index, "skus_staging");
        assert_eq!(app_config.run.index_parallelism, 4);
        assert_eq!(app_config.run.mode, "apply");
        assert!(app_config.run.include_views_count);
        match app_config.source_config {
            SourceConfig::Warehouse(w) => {
                assert!(w.query.contains("app_status = 'Live'"));
            }
            other => panic!("💀 Expected a warehouse source, got {other:?}"),
        }
        assert!(matches!(
            app_config.index_config,
            IndexConfig::InMemory(InMemoryIndexConfig {
                accept_new_documents: true
            })
        ));
    }

    #[test]
    fn the_one_where_in_memory_records_ride_along_in_the_toml() {
        let config_file = write_test_config(
            r#"
            [[source_config.InMemory]]
            item_id = "A"
            view_count = 0

            [[source_config.InMemory]]
            item_id = "B"

            [index_config.InMemory]
            "#,
        );

        let app_config = load_config(Some(config_file.path())).expect("💀 in-memory records should parse");
        match app_config.source_config {
            SourceConfig::InMemory(records) => {
                assert_eq!(records, vec![MetricRecord::new("A", 0), MetricRecord::new("B", 0)]);
            }
            other => panic!("💀 Expected in-memory records, got {other:?}"),
        }
    }

    #[test]
    fn the_one_where_the_file_is_a_lie() {
        let result = load_config(Some(Path::new("/definitely/not/a/real/trendx.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn the_one_where_env_vars_shout_but_serde_listens() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TRENDX_SOURCE_CONFIG__FILE__FILE_NAME", "metrics.ndjson");
            jail.set_env("TRENDX_INDEX_CONFIG__ELASTICSEARCH__URL", "http://localhost:9200");
            jail.set_env("TRENDX_RUN__CHUNK_SIZE", "250");

            let app_config = load_config(None).map_err(|e| format!("{e:#}"))?;
            assert_eq!(app_config.run.chunk_size, 250);
            assert!(matches!(app_config.source_config, SourceConfig::File(ref f) if f.file_name == "metrics.ndjson"));
            Ok(())
        });
    }
}
