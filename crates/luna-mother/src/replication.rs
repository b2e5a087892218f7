// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Journal handlers that replay task submissions from sibling controllers.
//!
//! `OSImage.<verb>` runs on the master; a backup instead parks a
//! `sync_osimage_with_master` placeholder that the osimage drain promotes
//! into the housekeeper queue. `Control.<verb>` is master-only.

use std::sync::Arc;

use luna_core::types::subsystem;
use luna_core::{LunaError, TaskDescriptor, TaskVerb};
use luna_journal::{FunctionRegistry, HaController, JournalCall};
use strum::IntoEnumIterator;
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::queue::NewTask;
use crate::submission::{TaskSubmission, journal_function};

/// Register a handler for every replicated verb.
pub fn register_task_handlers(
    registry: &FunctionRegistry,
    ha: Arc<HaController>,
    dispatcher: Dispatcher,
) {
    for verb in TaskVerb::iter() {
        let Some(home) = verb.home_subsystem() else {
            continue;
        };
        let Some((key, _)) = journal_function(home, verb) else {
            continue;
        };
        let ha = ha.clone();
        let dispatcher = dispatcher.clone();
        registry.register(key, move |call: JournalCall| {
            let ha = ha.clone();
            let dispatcher = dispatcher.clone();
            async move {
                let submission: TaskSubmission = call.body()?;
                replay(&ha, &dispatcher, home, &submission).await
            }
        });
    }
}

async fn replay(
    ha: &HaController,
    dispatcher: &Dispatcher,
    home: &'static str,
    submission: &TaskSubmission,
) -> Result<(), LunaError> {
    let request_id = Uuid::new_v4().to_string();

    if home == subsystem::OSIMAGE && !ha.is_master().await? {
        let image = submission.descriptor()?.object().to_string();
        let sync = TaskDescriptor::single(TaskVerb::SyncOsimageWithMaster, image)?;
        let parked = dispatcher
            .queue()
            .add_task(NewTask::new(sync, subsystem::OSIMAGE, request_id).parked())
            .await?;
        debug!(task_id = parked.task_id, outcome = %parked.outcome, "image sync parked");
        dispatcher.drain(subsystem::OSIMAGE);
        return Ok(());
    }

    let task = submission.to_task(home, &request_id)?;
    let object = task.descriptor.object().to_string();
    let enqueued = dispatcher.queue().add_task(task).await?;
    info!(verb = %submission.verb, object = %object, outcome = %enqueued.outcome, "replicated task queued");
    if enqueued.is_added() {
        dispatcher
            .dispatch_new(home, enqueued.task_id, &object, &request_id)
            .await?;
    }
    Ok(())
}
