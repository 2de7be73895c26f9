//! `ddm priority <id> <level>` – change a job's priority.

use anyhow::Result;
use ddm_core::facade::JobFacade;
use ddm_core::task::Priority;

use crate::cli::control_socket;

pub async fn run_priority(facade: &JobFacade, id: i64, level: Priority) -> Result<()> {
    facade.set_priority(id, level).await?;
    if let Ok(path) = ddm_core::config::control_socket_path() {
        let _ = control_socket::send_command(&path, &format!("priority {id} {}", level.as_str())).await;
    }
    println!("Set priority of job {id} to {}", level.as_str());
    Ok(())
}
