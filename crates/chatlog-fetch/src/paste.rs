//! Paste collaborator: hosts a rendered transcript and reports where.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum PasteError {
    #[error("writing paste {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("paste rejected: {0}")]
    Rejected(String),
}

pub type PasteCallback = Box<dyn FnOnce(Result<String, PasteError>) + Send>;

/// Accepts an owned body and reports the hosted location through `done`.
pub trait PasteUpload: Send + Sync {
    fn upload(&self, body: Vec<u8>, done: PasteCallback);
}

/// Writes each paste to its own file in `dir` and reports the file path.
#[derive(Debug)]
pub struct FilePaste {
    dir: PathBuf,
    seq: AtomicU64,
}

impl FilePaste {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    fn write(&self, body: &[u8]) -> Result<PathBuf, PasteError> {
        let io = |path: &PathBuf| {
            let path = path.clone();
            move |source| PasteError::Io { path, source }
        };
        std::fs::create_dir_all(&self.dir).map_err(io(&self.dir))?;
        let name = format!(
            "paste-{}-{}.txt",
            chrono::Utc::now().timestamp_millis(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        );
        let path = self.dir.join(name);
        std::fs::write(&path, body).map_err(io(&path))?;
        Ok(path)
    }
}

impl PasteUpload for FilePaste {
    fn upload(&self, body: Vec<u8>, done: PasteCallback) {
        let result = self.write(&body).map(|path| {
            tracing::debug!(path = %path.display(), bytes = body.len(), "paste written");
            path.display().to_string()
        });
        done(result);
    }
}
