//! Exit code logic for the relay process.
//!
//! Track-level failures are recorded in the session and still exit 0; only
//! fatal errors and interrupts change the code.

use std::process::ExitCode;

/// Process outcome, mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Finished, including runs where some tracks failed.
    Success,
    /// Configuration, credential, metadata or persistence error.
    Failure,
    /// Stopped by Ctrl-C.
    Interrupted,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Interrupted => 130,
        }
    }
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        ExitCode::from(exit.code())
    }
}

/// Reports a fatal error on stderr and returns the matching outcome.
pub(crate) fn exit_for_result(result: anyhow::Result<ProcessExit>) -> ProcessExit {
    match result {
        Ok(exit) => exit,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ProcessExit::Failure
        }
    }
}
