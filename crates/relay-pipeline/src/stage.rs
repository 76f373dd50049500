use std::fmt;

use serde::Serialize;

/// Position of a request in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Ingest,
    Tokenize,
    Hold,
    Generate,
    Finalize,
    Done,
    Failed,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ingest => "ingest",
            Self::Tokenize => "tokenize",
            Self::Hold => "hold",
            Self::Generate => "generate",
            Self::Finalize => "finalize",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Stages in which a client disconnect aborts the request
    pub const fn aborts_on_disconnect(self) -> bool {
        matches!(self, Self::Ingest | Self::Tokenize | Self::Hold)
    }

    /// Whether `self -> to` is an edge of the stage graph
    ///
    /// With billing disabled the hold and finalize stages do not exist and
    /// generation completes straight to `done`.
    pub const fn can_transition(self, to: Self, billing: bool) -> bool {
        use Stage::{Done, Failed, Finalize, Generate, Hold, Idle, Ingest, Tokenize};

        match (self, to) {
            (Idle, Ingest)
            | (Ingest, Tokenize | Failed)
            | (Tokenize | Hold | Generate, Failed)
            | (Generate, Generate)
            | (Done | Failed, Idle) => true,
            (Tokenize, Hold) | (Hold, Generate) | (Generate, Finalize) | (Finalize, Done | Failed) => billing,
            (Tokenize, Generate) | (Generate, Done) => !billing,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
