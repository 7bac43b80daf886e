use std::thread;

/// # Pill
///
/// Turns a panic inside a scheduler task into a process abort.
///
/// Tokio catches panics at the task boundary, so a panic raised for a broken
/// invariant (a result written twice, a duplicate id) would otherwise vanish
/// with the task and leave originators waiting. Every dispatch task owns a
/// `Pill`; if the task unwinds, dropping the pill panics a second time while
/// the thread is already panicking, and a panic during a panic aborts.
///
/// Backend failures never reach this path: the invoker catches those and turns
/// them into error results.
pub struct Pill {}

impl Pill {
    pub fn new() -> Self {
        Self {}
    }
}

impl Drop for Pill {
    fn drop(&mut self) {
        if thread::panicking() {
            panic!("scheduler task panicked on a broken invariant - aborting");
        }
    }
}
