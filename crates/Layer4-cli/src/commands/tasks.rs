//! `wpokctl tasks ...`

use super::open_service;
use crate::report::{self, ExitStatus};
use std::path::Path;
use wpok_foundation::WpokConfig;
use wpok_task::{
    load_and_validate_manifest, wait_for_many, wait_for_task, BatchOptions, Manifest, TaskId,
    TaskService, WaitOptions,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    pub batch: bool,
    pub wait: bool,
    pub timeout_secs: u64,
    pub fail_fast: bool,
}

/// `tasks create -f <file>`
pub async fn create(
    config: &WpokConfig,
    file: &Path,
    options: CreateOptions,
) -> anyhow::Result<ExitStatus> {
    let manifest = match load_and_validate_manifest(file) {
        Ok(manifest) => manifest,
        Err(e) => return Ok(report::manifest_error(&e).emit()),
    };

    let service = open_service(config)?;
    let result = submit(&service, &manifest, options).await;
    service.close().await?;
    result
}

async fn submit<S: TaskService>(
    service: &S,
    manifest: &Manifest,
    options: CreateOptions,
) -> anyhow::Result<ExitStatus> {
    if !options.batch {
        let task_id = service.create_task(manifest).await?;
        println!("{}", report::created_single(&task_id));
        if !options.wait {
            return Ok(ExitStatus::Success);
        }

        let outcome =
            wait_for_task(service, &task_id, WaitOptions::from_secs(options.timeout_secs)).await?;
        return Ok(report::single_outcome(&outcome).emit());
    }

    let task_ids = service.create_tasks_batch(manifest).await?;
    for line in report::created_batch(&task_ids) {
        println!("{}", line);
    }
    if !options.wait {
        return Ok(ExitStatus::Success);
    }

    let batch_options = BatchOptions::from_secs(options.timeout_secs, options.fail_fast);
    let outcome = wait_for_many(service, &task_ids, batch_options).await?;
    Ok(report::batch_outcome(&outcome).emit())
}

/// `tasks watch <taskId>`
pub async fn watch(
    config: &WpokConfig,
    task_id: &str,
    timeout_secs: u64,
) -> anyhow::Result<ExitStatus> {
    let task_id = TaskId::parse(task_id)?;
    tracing::debug!("Watching task {} of work {}", task_id, task_id.work_id());

    let service = open_service(config)?;
    let result = wait_for_task(&service, &task_id, WaitOptions::from_secs(timeout_secs)).await;
    service.close().await?;

    Ok(report::single_outcome(&result?).emit())
}

/// `tasks complete <taskId> --code <n>`
pub async fn complete(
    config: &WpokConfig,
    task_id: &str,
    code: i32,
) -> anyhow::Result<ExitStatus> {
    let task_id = TaskId::parse(task_id)?;

    let service = open_service(config)?;
    let result = service.complete_task(&task_id, code).await;
    service.close().await?;

    if result? {
        println!("Recorded exit code {} for {}", code, task_id);
    } else {
        eprintln!("Task {} already reported; keeping its first exit code", task_id);
    }
    Ok(ExitStatus::Success)
}
