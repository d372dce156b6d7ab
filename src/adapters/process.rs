//! Owner-process liveness via signal 0.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::ProcessProbe;

/// Probes a pid with `kill(pid, 0)`.
///
/// `ESRCH` means the process is gone; `EPERM` means it exists under
/// another user and is treated as alive. Any other errno is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixProcessProbe;

impl ProcessProbe for NixProcessProbe {
    fn is_alive(&self, pid: u32) -> DomainResult<bool> {
        let raw = i32::try_from(pid).map_err(|_| DomainError::ProcessProbeFailed {
            pid,
            message: "pid out of range".to_string(),
        })?;
        if raw <= 0 {
            return Err(DomainError::ProcessProbeFailed {
                pid,
                message: "not a process id".to_string(),
            });
        }

        match kill(Pid::from_raw(raw), None) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(Errno::EPERM) => Ok(true),
            Err(errno) => Err(DomainError::ProcessProbeFailed {
                pid,
                message: errno.desc().to_string(),
            }),
        }
    }
}
