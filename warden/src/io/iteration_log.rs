//! Per-iteration artifacts under `.warden/iterations/<id>/`.
//!
//! Product output for humans reviewing a run: always written, independent of
//! `RUST_LOG`. Nothing here is read back by the warden.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct IterationArtifacts {
    dir: PathBuf,
}

impl IterationArtifacts {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one artifact. A repeated name gets a numbered suffix so every
    /// retry within the iteration is kept.
    pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create iteration dir {}", self.dir.display()))?;
        let mut path = self.dir.join(name);
        let mut n = 2;
        while path.exists() {
            let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
            let numbered = if ext.is_empty() {
                format!("{stem}.{n}")
            } else {
                format!("{stem}.{n}.{ext}")
            };
            path = self.dir.join(numbered);
            n += 1;
        }
        fs::write(&path, contents).with_context(|| format!("write artifact {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_names_get_numbered() {
        let temp = tempfile::tempdir().expect("tempdir");
        let artifacts = IterationArtifacts::new(temp.path().join("000001"));
        let first = artifacts.write("response.txt", "one").expect("write");
        let second = artifacts.write("response.txt", "two").expect("write");
        assert_eq!(first.file_name().and_then(|n| n.to_str()), Some("response.txt"));
        assert_eq!(second.file_name().and_then(|n| n.to_str()), Some("response.2.txt"));
        assert_eq!(fs::read_to_string(second).expect("read"), "two");
    }
}
