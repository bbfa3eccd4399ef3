//! Best-effort scheduling priority hint
//!
//! Audio and boundary loops call this before they start. Failing to elevate
//! is never fatal; most desktop users lack the privilege on Unix.

/// Ask the OS to schedule the current process ahead of normal work.
///
/// Returns whether the request was granted.
pub fn request_realtime_priority() -> bool {
    let granted = platform::elevate();
    if granted {
        tracing::debug!("Elevated process priority");
    } else {
        tracing::debug!("Process priority unchanged");
    }
    granted
}

#[cfg(unix)]
mod platform {
    pub fn elevate() -> bool {
        // Same effect as `nice -n -5` on the whole process.
        unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -5) == 0 }
    }
}

#[cfg(windows)]
mod platform {
    use windows::Win32::System::Threading::{GetCurrentProcess, SetPriorityClass, HIGH_PRIORITY_CLASS};

    pub fn elevate() -> bool {
        unsafe { SetPriorityClass(GetCurrentProcess(), HIGH_PRIORITY_CLASS).is_ok() }
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    pub fn elevate() -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_never_panics() {
        // Result depends on privileges of the test runner.
        let _ = request_realtime_priority();
    }
}
