//! Realtime scheduling helpers
//!
//! Thin wrappers around `pthread_setschedparam` for the engine and proxy
//! I/O threads. Failures are reported, never fatal: without the needed
//! privileges the threads simply keep normal scheduling.

/// Put the calling thread under SCHED_FIFO with `priority`
///
/// Returns `true` on success.
#[cfg(target_os = "linux")]
pub fn set_realtime_priority(priority: i32) -> bool {
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority;
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) == 0
    }
}

/// Return the calling thread to normal (SCHED_OTHER) scheduling
#[cfg(target_os = "linux")]
pub fn set_normal_priority() -> bool {
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = 0;
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_OTHER, &param) == 0
    }
}

/// Whether the calling thread currently runs under SCHED_FIFO
#[cfg(target_os = "linux")]
pub fn caller_is_realtime() -> bool {
    unsafe {
        let mut policy: libc::c_int = 0;
        let mut param: libc::sched_param = std::mem::zeroed();
        libc::pthread_getschedparam(libc::pthread_self(), &mut policy, &mut param) == 0
            && policy == libc::SCHED_FIFO
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority(_priority: i32) -> bool {
    false
}

#[cfg(not(target_os = "linux"))]
pub fn set_normal_priority() -> bool {
    true
}

#[cfg(not(target_os = "linux"))]
pub fn caller_is_realtime() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_priority_always_allowed() {
        // dropping to SCHED_OTHER needs no privileges
        assert!(set_normal_priority());
        assert!(!caller_is_realtime());
    }
}
