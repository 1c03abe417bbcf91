//! Signal forwarding for wrapped commands.
//!
//! While a foreground child runs, termination signals delivered to the
//! wrapper are passed on to the child. SIGINT and SIGQUIT already reach the
//! child through the terminal's foreground process group, so the wrapper only
//! swallows them; forwarding would deliver them twice.

use std::sync::atomic::{AtomicI32, Ordering};

/// Child pid plus a signal that arrived before the child existed.
struct ForwardState {
    child: AtomicI32,
    pending: AtomicI32,
}

impl ForwardState {
    const fn new() -> Self {
        Self {
            child: AtomicI32::new(0),
            pending: AtomicI32::new(0),
        }
    }

    /// Pid to deliver `sig` to, or `None` if it was parked until `attach`.
    fn on_signal(&self, sig: libc::c_int) -> Option<i32> {
        let pid = self.child.load(Ordering::SeqCst);
        if pid > 0 {
            Some(pid)
        } else {
            self.pending.store(sig, Ordering::SeqCst);
            None
        }
    }

    /// Record the child; returns a parked signal that must now be sent to it.
    fn attach(&self, pid: i32) -> Option<libc::c_int> {
        self.child.store(pid, Ordering::SeqCst);
        match self.pending.swap(0, Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }

    /// Clear the state; returns a signal that never found a child.
    fn reset(&self) -> Option<libc::c_int> {
        self.child.store(0, Ordering::SeqCst);
        match self.pending.swap(0, Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }
}

static STATE: ForwardState = ForwardState::new();

const FORWARDED: [libc::c_int; 4] = [libc::SIGTERM, libc::SIGHUP, libc::SIGUSR1, libc::SIGUSR2];
const SWALLOWED: [libc::c_int; 2] = [libc::SIGINT, libc::SIGQUIT];

#[allow(unsafe_code)]
fn send(pid: i32, sig: libc::c_int) {
    // SAFETY: kill() is async-signal-safe and the pid belongs to our
    // still-unreaped child.
    unsafe {
        libc::kill(pid, sig);
    }
}

extern "C" fn forward(sig: libc::c_int) {
    if let Some(pid) = STATE.on_signal(sig) {
        send(pid, sig);
    }
}

extern "C" fn swallow(_sig: libc::c_int) {}

/// Installs the forwarding handlers for the lifetime of the guard and
/// restores the previous dispositions on drop.
///
/// Install before spawning: a forwarded signal that arrives before
/// [`attach`](Self::attach) is held and delivered once the child is known.
pub struct SignalForwarder {
    previous: Vec<(libc::c_int, libc::sighandler_t)>,
}

impl SignalForwarder {
    #[allow(unsafe_code)]
    pub fn install() -> Self {
        let _ = STATE.reset();
        let forward_handler = forward as extern "C" fn(libc::c_int) as libc::sighandler_t;
        let swallow_handler = swallow as extern "C" fn(libc::c_int) as libc::sighandler_t;

        let mut previous = Vec::with_capacity(FORWARDED.len() + SWALLOWED.len());
        for (sig, handler) in FORWARDED
            .iter()
            .map(|s| (*s, forward_handler))
            .chain(SWALLOWED.iter().map(|s| (*s, swallow_handler)))
        {
            // SAFETY: both handlers are extern "C" functions that only touch
            // atomics and call async-signal-safe functions.
            let old = unsafe { libc::signal(sig, handler) };
            if old != libc::SIG_ERR {
                previous.push((sig, old));
            }
        }
        Self { previous }
    }

    /// Start forwarding to `child_pid`.
    pub fn attach(&self, child_pid: u32) {
        let pid = child_pid as i32;
        if let Some(sig) = STATE.attach(pid) {
            send(pid, sig);
        }
    }
}

impl Drop for SignalForwarder {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        for (sig, old) in self.previous.drain(..) {
            // SAFETY: restoring a disposition previously returned by signal().
            unsafe {
                libc::signal(sig, old);
            }
        }
        // No child ever took the signal (spawn failed): act on it ourselves.
        if let Some(sig) = STATE.reset() {
            // SAFETY: raise() with the previous disposition restored.
            unsafe {
                libc::raise(sig);
            }
        }
    }
}
