use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);
pub const TEMP_PREFIX: &str = ".painel.tmp.";

pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path `{}` has no parent directory", path.display()),
        )
    })?;
    fs::create_dir_all(parent)?;

    let tmp_path = temp_sibling(parent, path)?;
    let result = write_then_rename(&tmp_path, path, parent, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_then_rename(tmp_path: &Path, path: &Path, parent: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_file = OpenOptions::new().create_new(true).write(true).open(tmp_path)?;
    tmp_file.write_all(bytes)?;
    tmp_file.flush()?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    match fs::rename(tmp_path, path) {
        Ok(()) => {}
        Err(err) => {
            if !path.exists() {
                return Err(err);
            }
            fs::remove_file(path)?;
            fs::rename(tmp_path, path)?;
        }
    }
    sync_parent_dir(parent)
}

#[cfg(unix)]
fn sync_parent_dir(parent: &Path) -> io::Result<()> {
    File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_parent: &Path) -> io::Result<()> {
    Ok(())
}

fn temp_sibling(parent: &Path, final_path: &Path) -> io::Result<PathBuf> {
    let file_name = final_path
        .file_name()
        .and_then(|value| value.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid target filename"))?;
    let epoch_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| io::Error::other(err.to_string()))?
        .as_nanos();
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    Ok(parent.join(format!(
        "{TEMP_PREFIX}{file_name}.{epoch_nanos}.{}.{counter}",
        std::process::id()
    )))
}
