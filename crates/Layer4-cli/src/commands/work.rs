//! `wpokctl work ...`

use super::open_service;
use crate::report::{self, ExitStatus};
use std::io::Write;
use tokio::sync::mpsc;
use wpok_foundation::WpokConfig;
use wpok_task::{watch_work, TaskService, WatchEvent, WatchOptions, WorkId};

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchArgs {
    pub timeout_secs: u64,
    pub idle_secs: u64,
    pub json: bool,
}

/// `work watch <workId>`
pub async fn watch(
    config: &WpokConfig,
    work_id: &str,
    args: WatchArgs,
) -> anyhow::Result<ExitStatus> {
    let work_id = WorkId::parse(work_id)?;
    let options = WatchOptions::from_secs(args.timeout_secs, args.idle_secs);

    let (tx, mut rx) = mpsc::unbounded_channel::<WatchEvent>();
    let json = args.json;
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            let _ = stdout.write_all(report::watch_event(&event, json).as_bytes());
            let _ = stdout.flush();
        }
    });

    let service = open_service(config)?;
    let result = watch_work(&service, &work_id, options, &tx).await;
    service.close().await?;

    drop(tx);
    let _ = printer.await;
    if !json {
        // Finish the progress line
        println!();
    }

    Ok(report::work_outcome(&result?).emit())
}

/// `work status <workId>`
pub async fn status(config: &WpokConfig, work_id: &str) -> anyhow::Result<ExitStatus> {
    let work_id = WorkId::parse(work_id)?;

    let service = open_service(config)?;
    let result = service.work_status(&work_id).await;
    service.close().await?;

    let status = result?;
    println!(
        "Work {}: {}/{} done, {} pending",
        work_id,
        status.done(),
        status.total,
        status.pending
    );
    Ok(ExitStatus::Success)
}
