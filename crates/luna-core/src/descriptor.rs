// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task descriptor grammar.
//!
//! A queue row carries its work as an opaque string: the verb followed by
//! colon-separated positional parameters and an optional trailing `noeof`
//! flag, e.g. `clone_osimage:compute:compute-gpu:noeof`. [`TaskDescriptor`]
//! is the structured form used everywhere except the `task` column itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::error::LunaError;
use crate::types::subsystem;

/// Flag appended to a descriptor when the leaf must not close the status stream.
pub const NOEOF_FLAG: &str = "noeof";

/// Every verb the coordinator understands.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskVerb {
    // composites
    PackNBuildOsimage,
    CloneNPackNBuildOsimage,
    GrabNPackNBuildOsimage,
    // osimage leaves
    PackOsimage,
    BuildOsimage,
    ProvisionOsimage,
    CloneOsimage,
    GrabOsimage,
    UnpackOsimage,
    PushOsimageToNode,
    PushOsimageToGroup,
    // housekeeper leaves
    CleanupOldFile,
    CleanupOldProvisioning,
    SyncOsimageWithMaster,
    RestartService,
    // control leaves
    PowerOn,
    PowerOff,
    PowerReset,
    /// Accounting task that deletes a finished composite.
    CloseTask,
}

/// How the coordinator treats a verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbKind {
    Composite,
    Leaf,
    Close,
}

impl TaskVerb {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn kind(&self) -> VerbKind {
        match self {
            TaskVerb::PackNBuildOsimage
            | TaskVerb::CloneNPackNBuildOsimage
            | TaskVerb::GrabNPackNBuildOsimage => VerbKind::Composite,
            TaskVerb::CloseTask => VerbKind::Close,
            _ => VerbKind::Leaf,
        }
    }

    /// Verbs that expand into phases instead of running themselves.
    pub fn composites() -> impl Iterator<Item = TaskVerb> {
        TaskVerb::iter().filter(|verb| verb.kind() == VerbKind::Composite)
    }

    /// The subsystem whose coordinator executes this verb.
    ///
    /// `None` means the verb is valid in every subsystem (`close_task`).
    pub fn home_subsystem(&self) -> Option<&'static str> {
        match self {
            TaskVerb::PackNBuildOsimage
            | TaskVerb::CloneNPackNBuildOsimage
            | TaskVerb::GrabNPackNBuildOsimage
            | TaskVerb::PackOsimage
            | TaskVerb::BuildOsimage
            | TaskVerb::ProvisionOsimage
            | TaskVerb::CloneOsimage
            | TaskVerb::GrabOsimage
            | TaskVerb::UnpackOsimage
            | TaskVerb::PushOsimageToNode
            | TaskVerb::PushOsimageToGroup => Some(subsystem::OSIMAGE),
            TaskVerb::CleanupOldFile
            | TaskVerb::CleanupOldProvisioning
            | TaskVerb::SyncOsimageWithMaster
            | TaskVerb::RestartService => Some(subsystem::HOUSEKEEPER),
            TaskVerb::PowerOn | TaskVerb::PowerOff | TaskVerb::PowerReset => {
                Some(subsystem::CONTROL)
            }
            TaskVerb::CloseTask => None,
        }
    }

    /// Number of positional parameters the verb requires.
    pub fn arity(&self) -> usize {
        match self {
            TaskVerb::CloneNPackNBuildOsimage
            | TaskVerb::GrabNPackNBuildOsimage
            | TaskVerb::CloneOsimage
            | TaskVerb::GrabOsimage
            | TaskVerb::PushOsimageToNode
            | TaskVerb::PushOsimageToGroup => 2,
            _ => 1,
        }
    }

    /// Index of the parameter naming the object the verb mutates.
    ///
    /// Clone and grab write the second parameter (the new image), pushes
    /// target the node or group rather than the image.
    fn target_index(&self) -> usize {
        match self.arity() {
            2 => 1,
            _ => 0,
        }
    }

    pub fn belongs_to(&self, subsystem: &str) -> bool {
        self.home_subsystem().is_none_or(|home| home == subsystem)
    }
}

/// Structured form of a queue row's `task` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub verb: TaskVerb,
    pub params: Vec<String>,
    /// Leaf must not append `EOF` on success; later phases will.
    pub noeof: bool,
}

impl TaskDescriptor {
    /// Build a descriptor, validating arity and parameter characters.
    pub fn new(verb: TaskVerb, params: Vec<String>) -> Result<Self, LunaError> {
        if params.len() != verb.arity() {
            return Err(LunaError::InvalidTask(format!(
                "{verb} takes {} parameter(s), got {}",
                verb.arity(),
                params.len()
            )));
        }
        if let Some(param) = params.iter().find(|p| !is_plain_word(p)) {
            return Err(LunaError::InvalidTask(format!(
                "parameter `{param}` of {verb} may only contain letters, digits, '.', '_', '/' and '-' and must not start with '-'"
            )));
        }
        Ok(Self {
            verb,
            params,
            noeof: false,
        })
    }

    /// Shorthand for single-object verbs.
    pub fn single(verb: TaskVerb, object: impl Into<String>) -> Result<Self, LunaError> {
        Self::new(verb, vec![object.into()])
    }

    pub fn with_noeof(mut self, noeof: bool) -> Self {
        self.noeof = noeof;
        self
    }

    /// The object this task mutates; the de-duplication and parallelism key.
    pub fn object(&self) -> &str {
        self.params
            .get(self.verb.target_index())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

impl fmt::Display for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb.as_str())?;
        for param in &self.params {
            write!(f, ":{param}")?;
        }
        if self.noeof {
            write!(f, ":{NOEOF_FLAG}")?;
        }
        Ok(())
    }
}

impl FromStr for TaskDescriptor {
    type Err = LunaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = s.split(':').collect();
        let verb_str = parts.remove(0);
        let verb = TaskVerb::from_str(verb_str)
            .map_err(|_| LunaError::InvalidTask(format!("unknown verb `{verb_str}` in `{s}`")))?;
        let noeof = parts.last() == Some(&NOEOF_FLAG) && parts.len() > verb.arity();
        if noeof {
            parts.pop();
        }
        let params = parts.into_iter().map(str::to_string).collect();
        Ok(Self::new(verb, params)?.with_noeof(noeof))
    }
}

/// Whether `word` is safe to use as a task parameter.
///
/// Parameters end up on operator command lines, so only names and paths made
/// of `[A-Za-z0-9._/-]` pass, and none may look like an option.
pub fn is_plain_word(word: &str) -> bool {
    !word.is_empty()
        && !word.starts_with('-')
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'))
}

/// Parse a deferral such as `30s`, `15m`, `1h` or `2d`.
pub fn parse_delay(when: &str) -> Result<chrono::Duration, LunaError> {
    let when = when.trim();
    let split = when
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(when.len());
    let (amount, unit) = when.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| LunaError::InvalidTask(format!("invalid delay `{when}`")))?;
    let delay = match unit {
        "s" | "" => chrono::Duration::seconds(amount),
        "m" => chrono::Duration::minutes(amount),
        "h" => chrono::Duration::hours(amount),
        "d" => chrono::Duration::days(amount),
        _ => {
            return Err(LunaError::InvalidTask(format!(
                "invalid delay unit `{unit}` in `{when}`"
            )));
        }
    };
    Ok(delay)
}
