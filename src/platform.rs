use crate::error::{BoardError, BoardResult};
use log::{debug, warn};
use std::io;

/// OS services the controller needs besides register access.
pub trait Platform: Send + Sync {
    /// `(free, total)` physical memory in bytes.
    fn free_and_total_physical_memory(&self) -> BoardResult<(u64, u64)>;

    /// Raises the scheduling priority of the calling thread for the
    /// duration of a block set.
    fn raise_priority(&self) -> BoardResult<()>;

    fn restore_priority(&self) -> BoardResult<()>;
}

/// [`Platform`] backed by `sysinfo(2)` and `setpriority(2)`.
#[derive(Debug, Default)]
pub struct LinuxPlatform {
    saved_nice: std::sync::Mutex<Option<i32>>,
}

const RAISED_NICE: i32 = -10;

impl LinuxPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(target_os = "linux")]
fn current_nice() -> io::Result<i32> {
    // getpriority may legitimately return -1, so errno has to be checked.
    unsafe {
        *libc::__errno_location() = 0;
        let nice = libc::getpriority(libc::PRIO_PROCESS, 0);
        if nice == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error().unwrap_or(0) != 0 {
                return Err(err);
            }
        }
        Ok(nice)
    }
}

#[cfg(target_os = "linux")]
fn set_nice(nice: i32) -> io::Result<()> {
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn is_permission_error(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EPERM) | Some(libc::EACCES))
}

#[cfg(target_os = "linux")]
impl Platform for LinuxPlatform {
    fn free_and_total_physical_memory(&self) -> BoardResult<(u64, u64)> {
        let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::sysinfo(&mut info) };
        if ret != 0 {
            return Err(BoardError::MemoryQuery(io::Error::last_os_error()));
        }
        let unit = info.mem_unit.max(1) as u64;
        Ok((info.freeram as u64 * unit, info.totalram as u64 * unit))
    }

    fn raise_priority(&self) -> BoardResult<()> {
        let nice = current_nice().map_err(BoardError::Priority)?;
        match set_nice(RAISED_NICE) {
            Ok(()) => {
                debug!("Raised priority from nice {nice} to {RAISED_NICE}");
                if let Ok(mut saved) = self.saved_nice.lock() {
                    *saved = Some(nice);
                }
                Ok(())
            }
            // Unprivileged processes may not lower their nice value.
            Err(e) if is_permission_error(&e) => {
                warn!("Could not raise priority: {e}");
                Ok(())
            }
            Err(e) => Err(BoardError::Priority(e)),
        }
    }

    fn restore_priority(&self) -> BoardResult<()> {
        let saved = match self.saved_nice.lock() {
            Ok(mut saved) => saved.take(),
            Err(_) => None,
        };
        let Some(nice) = saved else {
            return Ok(());
        };
        match set_nice(nice) {
            Ok(()) => {
                debug!("Restored priority to nice {nice}");
                Ok(())
            }
            Err(e) if is_permission_error(&e) => {
                warn!("Could not restore priority: {e}");
                Ok(())
            }
            Err(e) => Err(BoardError::Priority(e)),
        }
    }
}
