//! Pending command flags shared between command sources and the control loop.
//!
//! Any number of producers (signal handlers, the schedule, network clients)
//! may raise a flag at any time; raising an already-raised flag is a no-op.
//! Only the control loop reads and clears them, once per iteration. Each flag
//! is a single atomic cell, so no lock is ever held on the acquisition path.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::Command;

/// Three independent, idempotent pending-request booleans.
#[derive(Debug, Default)]
pub struct CommandFlags {
    start: AtomicBool,
    stop: AtomicBool,
    overview: AtomicBool,
}

impl CommandFlags {
    /// Create a set of flags with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, command: Command) -> &AtomicBool {
        match command {
            Command::Start => &self.start,
            Command::Stop => &self.stop,
            Command::Overview => &self.overview,
        }
    }

    /// Raise the flag for `command`.
    pub fn request(&self, command: Command) {
        self.cell(command).store(true, Ordering::Release);
    }

    /// Whether `command` is pending.
    pub fn is_pending(&self, command: Command) -> bool {
        self.cell(command).load(Ordering::Acquire)
    }

    /// Clear the flag for `command`.
    pub fn clear(&self, command: Command) {
        self.cell(command).store(false, Ordering::Release);
    }

    /// Clear the flag for `command`, returning whether it was pending.
    pub fn take(&self, command: Command) -> bool {
        self.cell(command).swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn flags_start_clear() {
        let flags = CommandFlags::new();
        assert!(!flags.is_pending(Command::Start));
        assert!(!flags.is_pending(Command::Stop));
        assert!(!flags.is_pending(Command::Overview));
    }

    #[test]
    fn request_is_idempotent() {
        let flags = CommandFlags::new();
        flags.request(Command::Stop);
        flags.request(Command::Stop);
        assert!(flags.take(Command::Stop));
        assert!(!flags.take(Command::Stop));
    }

    #[test]
    fn flags_are_independent() {
        let flags = CommandFlags::new();
        flags.request(Command::Overview);
        assert!(flags.is_pending(Command::Overview));
        assert!(!flags.is_pending(Command::Start));
        flags.clear(Command::Overview);
        assert!(!flags.is_pending(Command::Overview));
    }

    #[test]
    fn flags_shared_across_threads() {
        let flags = Arc::new(CommandFlags::new());
        let producer = Arc::clone(&flags);
        std::thread::spawn(move || producer.request(Command::Start))
            .join()
            .unwrap();
        assert!(flags.take(Command::Start));
    }
}
