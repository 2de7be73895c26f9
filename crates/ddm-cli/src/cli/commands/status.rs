//! `ddm status` – show status of all jobs.

use anyhow::Result;
use ddm_core::engine::TaskFilter;
use ddm_core::facade::JobFacade;

pub async fn run_status(facade: &JobFacade) -> Result<()> {
    let jobs = facade.list_jobs(&TaskFilter::default()).await?;
    if jobs.is_empty() {
        println!("No jobs in database.");
    } else {
        println!("{:<6} {:<12} {:<10} {}", "ID", "STATE", "SIZE", "URL");
        for j in jobs {
            let size_str = j.task.total.map(|s| format!("{s}")).unwrap_or_else(|| "-".to_string());
            println!(
                "{:<6} {:<12} {:<10} {}",
                j.job_id,
                format!("{:?}", j.task.state).to_lowercase(),
                size_str,
                j.task.url
            );
        }
    }
    Ok(())
}
