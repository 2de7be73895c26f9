//! `ddm import-har <path>` – create job from HAR file.

use anyhow::Result;
use ddm_core::engine::SubmitRequest;
use ddm_core::facade::JobFacade;
use ddm_core::har;
use std::path::Path;

pub async fn run_import_har(facade: &JobFacade, path: &Path, allow_cookies: bool) -> Result<()> {
    let spec = har::resolve_har(path, allow_cookies)?;
    let has_headers = !spec.headers.is_empty();
    let dir = std::env::current_dir().unwrap_or_default();
    let req = SubmitRequest {
        url: spec.url.clone(),
        destination_dir: dir,
        headers: spec.headers,
        ..Default::default()
    };
    let id = facade.submit(req).await?;
    println!("Added job {id} for URL: {}", spec.url);
    if allow_cookies && has_headers {
        println!("  (cookies included; stored with job)");
    }
    Ok(())
}
