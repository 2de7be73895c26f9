//! Disk I/O and file lifecycle.
//!
//! Preallocates temp files (fallocate on Linux when available, else set_len),
//! supports concurrent offset writes (pwrite), fsync policy, and atomic
//! finalize (rename from `.part` to final name).

mod builder;
mod writer;

pub use builder::StorageWriterBuilder;
pub use writer::StorageWriter;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &std::path::Path) -> std::path::PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(".part");
    std::path::PathBuf::from(o)
}

/// Removes whatever a cancelled or deleted task left behind: the partial
/// `.part` scratch file and, if it somehow made it to the final name, the
/// finalized file too.
/// Best-effort: a missing file is not an error.
pub fn remove_artifacts(final_path: &std::path::Path) {
    let temp = temp_path(final_path);
    let _ = std::fs::remove_file(&temp);
    let _ = std::fs::remove_file(final_path);
}
