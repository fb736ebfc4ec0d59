//! Local filesystem store: directory provisioning and atomic downloads.
//!
//! Downloads stream into a numbered temporary file inside the scratch
//! directory and are renamed into place only after the whole body has been
//! written and flushed. A crash or network error mid-transfer therefore
//! never leaves a half-written file at the destination, so `exists()` on
//! a later run only ever sees complete files.

use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use pictor_common::{PictorError, Result};

/// Scratch area for in-flight downloads, relative to the image directory.
/// Keeping it on the same filesystem keeps the final rename atomic.
pub const SCRATCH_SUBDIR: &str = ".temp/downloads";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Create `path` (and parents) if absent. Idempotent.
pub fn ensure_directory(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Downloads files into an image directory through a scratch area.
#[derive(Debug, Clone)]
pub struct FileStore {
    client: reqwest::Client,
    scratch_dir: PathBuf,
}

impl FileStore {
    pub fn new(client: reqwest::Client, image_dir: &Path) -> Result<Self> {
        let scratch_dir = image_dir.join(SCRATCH_SUBDIR);
        ensure_directory(&scratch_dir)?;
        Ok(Self {
            client,
            scratch_dir,
        })
    }

    /// Fetch `url` and atomically place the bytes at `dest`.
    ///
    /// On any network or I/O failure the temporary file is removed and the
    /// error propagates; `dest` is either fully populated or absent.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let tmp = self
            .scratch_dir
            .join(format!("dl-{}", TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)));

        if let Err(e) = self.fetch_to(url, &tmp).await {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        if let Err(e) = std::fs::rename(&tmp, dest) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(url = %url, dest = %dest.display(), "downloaded");
        Ok(())
    }

    async fn fetch_to(&self, url: &str, tmp: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PictorError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PictorError::Network(format!(
                "{}: status {}",
                url,
                response.status()
            )));
        }

        let mut file = std::fs::File::create(tmp)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PictorError::Network(e.to_string()))?;
            file.write_all(&chunk)?;
        }
        file.sync_all()?;

        Ok(())
    }
}
