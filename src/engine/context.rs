//! Build context packaging

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use ignore::WalkBuilder;
use std::path::Path;
use tracing::{debug, trace};

pub const DOCKERIGNORE: &str = ".dockerignore";

/// Pack `root` into a gzip'd tar honoring `.dockerignore` and `.gitignore`,
/// then add the rendered Dockerfile as `dockerfile_name`.
pub fn package_context(root: &Path, dockerfile_name: &str, dockerfile: &str) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive.mode(tar::HeaderMode::Deterministic);

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .add_custom_ignore_filename(DOCKERIGNORE)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|e| e.file_name() != ".git")
        .build();

    let mut files = 0usize;
    for entry in walker {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .context("Failed to strip context root")?;
        if relative == Path::new(dockerfile_name) {
            continue;
        }
        trace!(file = %relative.display(), "Adding to build context");
        archive
            .append_path_with_name(path, relative)
            .with_context(|| format!("Failed to add {} to build context", relative.display()))?;
        files += 1;
    }

    let mut header = tar::Header::new_gnu();
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    archive
        .append_data(&mut header, dockerfile_name, dockerfile.as_bytes())
        .context("Failed to add Dockerfile to build context")?;

    let encoder = archive.into_inner().context("Failed to finish build context")?;
    let bytes = encoder.finish().context("Failed to compress build context")?;
    debug!(files, bytes = bytes.len(), "Packaged build context");
    Ok(bytes)
}
