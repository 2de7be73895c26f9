//! `ddm resume <id>` – resume a paused job.

use anyhow::Result;
use ddm_core::facade::JobFacade;

use crate::cli::control_socket;

pub async fn run_resume(facade: &JobFacade, id: i64) -> Result<()> {
    facade.resume(id).await?;
    if let Ok(path) = ddm_core::config::control_socket_path() {
        let _ = control_socket::send_command(&path, &format!("resume {id}")).await;
    }
    println!("Resumed job {id}");
    Ok(())
}
