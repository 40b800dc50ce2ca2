//! Loads extracted manual text from disk.
//!
//! Each `.txt` file is one source document; form feeds (`\x0c`, as emitted by
//! pdftotext) separate pages. Files are identified by the blake3 hash of
//! their raw bytes and tagged with a category from the filename rules.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::CategoryConfig;
use crate::types::{PageText, SourceDocument};

const PAGE_BREAK: char = '\x0c';

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: SourceDocument,
    pub path: PathBuf,
    pub pages: Vec<PageText>,
}

pub struct DocumentLoader {
    categories: CategoryConfig,
}

impl DocumentLoader {
    pub fn new(categories: CategoryConfig) -> Self { Self { categories } }

    pub fn load_directory(&self, data_dir: &Path) -> Result<Vec<LoadedDocument>> {
        self.load_directory_limited(data_dir, usize::MAX)
    }

    pub fn load_directory_limited(&self, data_dir: &Path, limit: usize) -> Result<Vec<LoadedDocument>> {
        let mut files = self.list_txt_files(data_dir);
        if files.is_empty() {
            info!(dir = %data_dir.display(), "no .txt files found");
            return Ok(vec![]);
        }
        if files.len() > limit {
            files.truncate(limit);
            info!(limit, "limited number of files");
        }
        files.iter().map(|path| self.load_file(path)).collect()
    }

    pub fn load_file(&self, file_path: &Path) -> Result<LoadedDocument> {
        let bytes = fs::read(file_path).with_context(|| format!("reading {}", file_path.display()))?;
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.display().to_string());
        let document = SourceDocument::from_bytes(filename.clone(), self.categories.categorize(&filename), &bytes);
        let text = String::from_utf8_lossy(&bytes);
        let pages = split_pages(&text);
        debug!(file = %filename, pages = pages.len(), "loaded document");
        Ok(LoadedDocument { document, path: file_path.to_path_buf(), pages })
    }

    fn list_txt_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut txt_files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("txt"))
            .collect();
        txt_files.sort();
        txt_files
    }
}

/// Pages are numbered from 1; a file without form feeds is a single page.
pub fn split_pages(text: &str) -> Vec<PageText> {
    text.split(PAGE_BREAK)
        .enumerate()
        .map(|(i, page)| PageText::new(i as u32 + 1, page))
        .collect()
}
