//! `ddm remove <id>` – remove a job.

use anyhow::Result;
use ddm_core::facade::JobFacade;

use crate::cli::control_socket;

pub async fn run_remove(facade: &JobFacade, id: i64) -> Result<()> {
    if let Ok(path) = ddm_core::config::control_socket_path() {
        let _ = control_socket::send_command(&path, &format!("cancel {id}")).await;
    }
    facade.delete(id).await?;
    println!("Removed job {id}");
    Ok(())
}
