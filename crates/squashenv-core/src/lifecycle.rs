use serde::Serialize;
use std::fmt;

/// Mount state of the canonical path, as read from the mount table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountState {
    Unmounted,
    Mounted,
}

impl MountState {
    pub fn from_mounted(mounted: bool) -> Self {
        if mounted {
            Self::Mounted
        } else {
            Self::Unmounted
        }
    }

    pub fn is_mounted(self) -> bool {
        self == Self::Mounted
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmounted => f.write_str("unmounted"),
            Self::Mounted => f.write_str("mounted"),
        }
    }
}

/// What has to happen to get from one mount state to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Noop,
    Mount,
    Unmount,
}

/// Mount and unmount are idempotent: asking for the current state is a no-op.
pub fn plan_transition(from: MountState, to: MountState) -> Transition {
    match (from, to) {
        (MountState::Unmounted, MountState::Mounted) => Transition::Mount,
        (MountState::Mounted, MountState::Unmounted) => Transition::Unmount,
        _ => Transition::Noop,
    }
}
