// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Composite task expansion.

use luna_core::{LunaError, TaskDescriptor, TaskVerb, VerbKind};

/// Ordered phases of a composite, followed by the `close_task` that removes
/// the composite row once every phase has run.
///
/// Every phase but the last carries `noeof` so the status stream stays open
/// until the pipeline finishes.
pub fn expand(composite: &TaskDescriptor, composite_id: i64) -> Result<Vec<TaskDescriptor>, LunaError> {
    if composite.verb.kind() != VerbKind::Composite {
        return Err(LunaError::InvalidTask(format!(
            "{} is not a composite task",
            composite.verb
        )));
    }

    let param = |i: usize| composite.param(i).unwrap_or_default().to_string();
    let image = composite.object().to_string();

    let mut phases = match composite.verb {
        TaskVerb::PackNBuildOsimage => Vec::new(),
        TaskVerb::CloneNPackNBuildOsimage => vec![TaskDescriptor::new(
            TaskVerb::CloneOsimage,
            vec![param(0), param(1)],
        )?],
        TaskVerb::GrabNPackNBuildOsimage => vec![TaskDescriptor::new(
            TaskVerb::GrabOsimage,
            vec![param(0), param(1)],
        )?],
        other => {
            return Err(LunaError::InvalidTask(format!("no expansion for {other}")));
        }
    };
    phases.push(TaskDescriptor::single(TaskVerb::PackOsimage, image.clone())?);
    phases.push(TaskDescriptor::single(TaskVerb::BuildOsimage, image.clone())?);
    phases.push(TaskDescriptor::single(TaskVerb::ProvisionOsimage, image)?);

    let last = phases.len() - 1;
    let mut expanded: Vec<TaskDescriptor> = phases
        .into_iter()
        .enumerate()
        .map(|(i, phase)| phase.with_noeof(i != last))
        .collect();
    expanded.push(TaskDescriptor::single(
        TaskVerb::CloseTask,
        composite_id.to_string(),
    )?);
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(phases: &[TaskDescriptor]) -> Vec<String> {
        phases.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn pack_n_build_has_three_phases_and_close() {
        let composite: TaskDescriptor = "pack_n_build_osimage:img1".parse().unwrap();
        let phases = expand(&composite, 7).unwrap();
        assert_eq!(
            strings(&phases),
            vec![
                "pack_osimage:img1:noeof",
                "build_osimage:img1:noeof",
                "provision_osimage:img1",
                "close_task:7",
            ]
        );
    }

    #[test]
    fn clone_phases_target_the_new_image() {
        let composite: TaskDescriptor = "clone_n_pack_n_build_osimage:compute:gpu".parse().unwrap();
        let phases = expand(&composite, 3).unwrap();
        assert_eq!(
            strings(&phases),
            vec![
                "clone_osimage:compute:gpu:noeof",
                "pack_osimage:gpu:noeof",
                "build_osimage:gpu:noeof",
                "provision_osimage:gpu",
                "close_task:3",
            ]
        );
    }

    #[test]
    fn grab_starts_from_the_node() {
        let composite: TaskDescriptor = "grab_n_pack_n_build_osimage:node001:img2".parse().unwrap();
        let phases = expand(&composite, 9).unwrap();
        assert_eq!(phases[0].to_string(), "grab_osimage:node001:img2:noeof");
        assert_eq!(phases[1].to_string(), "pack_osimage:img2:noeof");
        assert_eq!(phases.len(), 5);
    }

    #[test]
    fn leaf_cannot_be_expanded() {
        let leaf: TaskDescriptor = "pack_osimage:img1".parse().unwrap();
        assert!(expand(&leaf, 1).is_err());
    }
}
