//! `ddm add <url>` – add a new download job.

use anyhow::Result;
use ddm_core::engine::SubmitRequest;
use ddm_core::facade::JobFacade;
use ddm_core::task::Priority;
use std::path::Path;

pub async fn run_add(facade: &JobFacade, url: &str, dir: &Path, priority: Option<Priority>) -> Result<()> {
    let req = SubmitRequest {
        url: url.to_string(),
        destination_dir: dir.to_path_buf(),
        priority,
        ..Default::default()
    };
    let id = facade.submit(req).await?;
    println!("Added job {id} for URL: {url}");
    Ok(())
}
