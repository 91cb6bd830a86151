#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Daily sales with a date column, a numeric amount and a dominant region.
pub const SALES_CSV: &str = "\
date,region,amount,channel
2024-01-01,seoul,100,web
2024-01-02,seoul,110,web
2024-01-03,seoul,95,store
2024-01-04,seoul,105,web
2024-01-05,busan,98,
2024-01-06,seoul,102,web
2024-01-07,seoul,400,
2024-01-08,seoul,420,store
2024-01-09,seoul,390,
2024-01-10,seoul,410,
";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.temp_dir.path().join("cache")
    }
}
