//! Safe resume: re-validate ETag/Last-Modified/size before resuming.
//!
//! Before a worker reuses on-disk progress for a task, it probes the URL and
//! compares the result with the task's last-known metadata. If anything
//! changed, the worker restarts from offset 0 instead of trusting the
//! partial file.

mod validate;

pub use validate::{validate_for_resume, StoredMetadata, ValidationError, ValidationErrorKind};
