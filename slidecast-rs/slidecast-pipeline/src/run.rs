use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// The directory that owns every artifact of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDir {
    pub id: u32,
    pub path: PathBuf,
}

impl RunDir {
    pub fn join(&self, file_name: impl AsRef<Path>) -> PathBuf {
        self.path.join(file_name)
    }
}

impl fmt::Display for RunDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} ({})", self.id, self.path.display())
    }
}

/// Create `<output_root>/<id>` with an id one past the highest existing run.
///
/// Creation is exclusive, so a directory that another process grabbed first is
/// skipped rather than shared.
pub fn allocate_run_dir(output_root: &Path) -> io::Result<RunDir> {
    fs::create_dir_all(output_root)?;
    let mut id = next_run_id(output_root)?;

    loop {
        let path = output_root.join(id.to_string());
        match fs::create_dir(&path) {
            Ok(()) => return Ok(RunDir { id, path }),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                id = id.checked_add(1).ok_or_else(|| {
                    io::Error::other(format!("run ids exhausted in {}", output_root.display()))
                })?;
            }
            Err(error) => return Err(error),
        }
    }
}

fn next_run_id(output_root: &Path) -> io::Result<u32> {
    let mut next = 0u32;
    for entry in fs::read_dir(output_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(id) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        {
            next = next.max(id.saturating_add(1));
        }
    }
    Ok(next)
}
