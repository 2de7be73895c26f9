//! Compares stored task metadata with a fresh HEAD result for safe resume.

mod error;

use crate::fetch_head::HeadResult;

pub use error::{ValidationError, ValidationErrorKind};

/// Metadata recorded from a task's prior HEAD probe, read straight off
/// `Task` (`total`, `etag`, `last_modified`) rather than a persisted row:
/// this check only matters within the lifetime of one process, before the
/// worker commits to resuming instead of restarting from offset 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredMetadata<'a> {
    pub total_size: Option<u64>,
    pub etag: Option<&'a str>,
    pub last_modified: Option<&'a str>,
}

/// Returns Ok(()) if a resume can safely reuse on-disk progress against the
/// current HEAD result.
///
/// If nothing was stored yet (first probe for this task), returns Ok(()) so
/// the caller proceeds with segment planning. Otherwise compares ETag,
/// Last-Modified, and size; returns Err(ValidationError) if any differ.
pub fn validate_for_resume(
    stored: StoredMetadata<'_>,
    head: &HeadResult,
) -> Result<(), ValidationError> {
    let has_stored = stored.total_size.is_some() || stored.etag.is_some() || stored.last_modified.is_some();

    if !has_stored {
        return Ok(());
    }

    let etag_changed = match (stored.etag, head.etag.as_deref()) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    };

    let last_modified_changed = match (stored.last_modified, head.last_modified.as_deref()) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    };

    let size_changed = match (stored.total_size, head.content_length) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    };

    if etag_changed || last_modified_changed || size_changed {
        return Err(ValidationError {
            kind: ValidationErrorKind::RemoteChanged {
                etag_changed,
                last_modified_changed,
                size_changed,
            },
        });
    }

    Ok(())
}
