//! Task kinds and lifecycle statuses.
//!
//! Both enums are persisted as lowercase text columns, so each variant
//! carries its stored literal and parses back from it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

macro_rules! define_text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $val)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Return the stored text literal.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $val ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $val => Ok($name::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        "unknown {} '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

define_text_enum! {
    /// Which render path and argument shape a task uses.
    TaskKind {
        GenerateFromText = "txt2img",
        GenerateFromImage = "img2img",
    }
}

define_text_enum! {
    /// Task lifecycle status.
    ///
    /// `Pending -> Running -> {Done, Failed, Interrupted}`, with
    /// `Failed -> Pending` on explicit or automatic requeue.
    TaskStatus {
        Pending = "pending",
        Running = "running",
        Done = "done",
        Failed = "failed",
        Interrupted = "interrupted",
    }
}

impl TaskStatus {
    /// Statuses a task can no longer leave except by requeue or deletion.
    pub const TERMINAL: [TaskStatus; 3] =
        [TaskStatus::Done, TaskStatus::Failed, TaskStatus::Interrupted];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }
}
