//! `ddm pause <id>` – pause a job.

use anyhow::Result;
use ddm_core::facade::JobFacade;

use crate::cli::control_socket;

pub async fn run_pause(facade: &JobFacade, id: i64) -> Result<()> {
    facade.pause(id).await?;
    if let Ok(path) = ddm_core::config::control_socket_path() {
        let _ = control_socket::send_command(&path, &format!("pause {id}")).await;
    }
    println!("Paused job {id}");
    Ok(())
}
