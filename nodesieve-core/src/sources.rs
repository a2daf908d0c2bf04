// Subscription list loading and the failed-fetch record

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read subscription list {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to update subscription list {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Subscription URLs from list text: one per line, blank lines and
/// `#` comments skipped
pub fn parse_subscription_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Load subscription URLs from a file
pub fn load_subscription_urls(path: &Path) -> Result<Vec<String>, SourceError> {
    let content = fs::read_to_string(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_subscription_list(&content))
}

/// Comment out every line of the list that holds one of `failed` by
/// prefixing it with `# `. Nothing else in the file changes, and the file
/// is rewritten through a temp file so it is never left half written.
///
/// Returns the number of lines commented out.
pub fn mark_failed_subscriptions(path: &Path, failed: &[&str]) -> Result<usize, SourceError> {
    if failed.is_empty() {
        return Ok(0);
    }

    let content = fs::read_to_string(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut marked = 0;
    let mut updated = String::with_capacity(content.len() + failed.len() * 2);
    for line in content.split_inclusive('\n') {
        let stripped = line.trim();
        if !stripped.starts_with('#') && failed.contains(&stripped) {
            updated.push_str("# ");
            marked += 1;
        }
        updated.push_str(line);
    }

    if marked == 0 {
        return Ok(0);
    }

    write_atomically(path, &updated).map_err(|source| SourceError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(marked)
}

fn write_atomically(path: &Path, content: &str) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
