//! A [`Transport`] that copies files into a directory tree.
//!
//! Each attempt streams the source into a hidden `.part` file next to the
//! target and moves it into place once complete, so a destination never
//! holds a half-written file under its real name. Unless told to overwrite,
//! the move never replaces a file that appeared while the copy ran.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use docdrop_protocol::{DestinationDirective, JobId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::transport::{ProgressSink, RawFailure, TransferFuture, TransferRequest, Transport};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Copies uploads below `root`; the request destination is a path relative
/// to it.
pub struct LocalDirTransport {
    root: PathBuf,
    chunk_size: usize,
    max_file_size: Option<u64>,
    /// Partial files of in-flight attempts, removed on abort.
    partials: Mutex<HashMap<JobId, PathBuf>>,
}

impl LocalDirTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: None,
            partials: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Refuses files larger than `bytes`, like a store with an upload cap.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partials(&self) -> MutexGuard<'_, HashMap<JobId, PathBuf>> {
        self.partials.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn copy(&self, request: TransferRequest, progress: ProgressSink) -> Result<(), RawFailure> {
        if let Some(limit) = self.max_file_size
            && request.size_bytes > limit
        {
            return Err(RawFailure::TooLarge {
                size: request.size_bytes,
            });
        }
        let source = request.source.clone().ok_or_else(|| {
            RawFailure::Other(format!("no source file for '{}'", request.file_name))
        })?;

        let dir = self.destination_dir(&request.destination)?;
        tokio::fs::create_dir_all(&dir).await?;
        if request.directive == DestinationDirective::Normal
            && tokio::fs::try_exists(dir.join(&request.file_name)).await?
        {
            return Err(RawFailure::AlreadyExists {
                name: request.file_name.clone(),
            });
        }
        let part = dir.join(format!(".{}.{}.part", request.file_name, request.job_id));

        self.partials().insert(request.job_id.clone(), part.clone());
        let result = match self.write_part(&source, &part, &request, &progress).await {
            Ok(()) => commit(&dir, &part, &request.file_name, request.directive).await,
            Err(e) => Err(e),
        };
        self.partials().remove(&request.job_id);

        match result {
            Ok(target) => {
                info!(
                    job = %request.job_id,
                    target = %target.display(),
                    "file stored"
                );
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn write_part(
        &self,
        source: &Path,
        part: &Path,
        request: &TransferRequest,
        progress: &ProgressSink,
    ) -> Result<(), RawFailure> {
        let mut reader = tokio::fs::File::open(source).await?;
        let mut writer = tokio::fs::File::create(part).await?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut loaded = 0u64;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            loaded += n as u64;
            progress.report(loaded, request.size_bytes);
        }
        writer.flush().await?;
        writer.sync_all().await?;
        debug!(job = %request.job_id, bytes = loaded, "part file written");
        Ok(())
    }

    fn destination_dir(&self, destination: &str) -> Result<PathBuf, RawFailure> {
        let mut dir = self.root.clone();
        for component in Path::new(destination).components() {
            match component {
                Component::Normal(part) => dir.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(RawFailure::PermissionDenied(format!(
                        "destination '{destination}' leaves the store"
                    )));
                }
            }
        }
        Ok(dir)
    }
}

impl Transport for LocalDirTransport {
    fn transfer(&self, request: TransferRequest, progress: ProgressSink) -> TransferFuture<'_> {
        Box::pin(self.copy(request, progress))
    }

    fn abort(&self, job_id: &JobId) {
        if let Some(part) = self.partials().remove(job_id) {
            match std::fs::remove_file(&part) {
                Ok(()) => debug!(job = %job_id, "partial upload removed"),
                Err(e) => debug!(job = %job_id, error = %e, "no partial upload to remove"),
            }
        }
    }
}

/// Moves a finished part file to its final name. Only `Overwrite` may
/// replace an existing file; the other directives publish with a hard link,
/// which fails atomically when the name is already taken.
async fn commit(
    dir: &Path,
    part: &Path,
    name: &str,
    directive: DestinationDirective,
) -> Result<PathBuf, RawFailure> {
    let target = dir.join(name);
    match directive {
        DestinationDirective::Overwrite => {
            tokio::fs::rename(part, &target).await?;
            Ok(target)
        }
        DestinationDirective::Normal => match link_new(part, &target).await {
            Ok(()) => Ok(target),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(RawFailure::AlreadyExists {
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        },
        DestinationDirective::Rename => {
            let mut candidate = target;
            let mut n = 0u32;
            loop {
                match link_new(part, &candidate).await {
                    Ok(()) => return Ok(candidate),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        n += 1;
                        candidate = dir.join(alternate_name(name, n));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

async fn link_new(part: &Path, target: &Path) -> io::Result<()> {
    tokio::fs::hard_link(part, target).await?;
    if let Err(e) = tokio::fs::remove_file(part).await {
        debug!(part = %part.display(), error = %e, "part file left after commit");
    }
    Ok(())
}

/// `report.pdf` -> `report (2).pdf`; dotfiles and extensionless names get
/// the suffix at the end.
pub fn alternate_name(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({n}){}", &name[..dot], &name[dot..]),
        _ => format!("{name} ({n})"),
    }
}
