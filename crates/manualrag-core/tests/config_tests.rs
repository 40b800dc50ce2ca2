use std::fs;
use std::path::Path;

use manualrag_core::config::{resolve_with_base, CategoryConfig, ChunkingConfig, Config, Settings};
use tempfile::TempDir;

#[test]
fn defaults_apply_without_files() {
    let tmp = TempDir::new().unwrap();
    let settings = Config::load_from(tmp.path(), "dev").unwrap().settings().unwrap();
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.fusion.rrf_k, 60.0);
    assert_eq!(settings.dedup.similarity_threshold, 0.85);
    assert_eq!(settings.chunking.child_max_chars, 2400);
    assert_eq!(settings.chunking.child_overlap_chars, 400);
}

#[test]
fn env_overlay_overrides_base_file() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("config.toml"),
        "[fusion]\nrrf_k = 30.0\n\n[storage]\ndata_dir = \"/var/lib/manualrag\"\n",
    )
    .unwrap();
    fs::write(tmp.path().join("config.prod.toml"), "[fusion]\nkeyword_weight = 0.7\n").unwrap();

    let config = Config::load_from(tmp.path(), "prod").unwrap();
    let settings = config.settings().unwrap();
    assert_eq!(settings.fusion.rrf_k, 30.0);
    assert_eq!(settings.fusion.keyword_weight, 0.7);
    assert_eq!(settings.fusion.embedding_weight, 0.5);
    assert_eq!(config.get::<String>("storage.data_dir").unwrap(), "/var/lib/manualrag");
}

#[test]
fn invalid_values_fail_validation() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("config.toml"),
        "[chunking]\nchild_max_chars = 100\nchild_overlap_chars = 150\n",
    )
    .unwrap();
    assert!(Config::load_from(tmp.path(), "dev").unwrap().settings().is_err());

    let chunking = ChunkingConfig { child_overlap_chars: 0, ..ChunkingConfig::default() };
    assert!(chunking.validate().is_ok());
}

#[test]
fn category_rules_match_filename_case_insensitively() {
    let categories = CategoryConfig::default();
    assert_eq!(categories.categorize("DUSTER_2019.txt"), "Dacia Duster");
    assert_eq!(categories.categorize("owners_manual.txt"), "Dacia General");
}

#[test]
fn storage_paths_resolve_against_base() {
    let settings = Settings::default();
    let base = Path::new("/srv/app");
    assert_eq!(settings.storage.docstore_path(base), Path::new("/srv/app/data/docstore.json"));
    assert_eq!(resolve_with_base(base, "/abs/dir"), Path::new("/abs/dir"));
}
