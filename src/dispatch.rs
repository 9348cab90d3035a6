use crate::errors::AppResult;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, ThreadId};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerThread(ThreadId);

impl OwnerThread {
    pub fn current() -> Self {
        Self(thread::current().id())
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.0
    }

    pub fn debug_check(&self, operation: &str) {
        debug_assert!(
            self.is_current(),
            "{} must run on the owner thread",
            operation
        );
    }
}

pub type CommandFn<T> = Box<dyn FnOnce(&mut T) -> AppResult<()> + Send + 'static>;

pub struct Command<T> {
    label: String,
    run: CommandFn<T>,
}

impl<T: 'static> Command<T> {
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(&mut T) -> AppResult<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(run),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn run(self, target: &mut T) -> AppResult<()> {
        (self.run)(target)
    }
}

impl<T> fmt::Debug for Command<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("label", &self.label).finish()
    }
}

pub struct CommandSender<T> {
    tx: UnboundedSender<Command<T>>,
}

impl<T> Clone for CommandSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for CommandSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T: 'static> CommandSender<T> {
    pub fn enqueue<F>(&self, label: impl Into<String>, run: F)
    where
        F: FnOnce(&mut T) -> AppResult<()> + Send + 'static,
    {
        self.send(Command::new(label, run));
    }

    pub fn send(&self, command: Command<T>) {
        if let Err(rejected) = self.tx.send(command) {
            tracing::trace!(command = %rejected.0.label, "command queue closed; dropping command");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub label: String,
    pub message: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub executed: usize,
    pub failures: Vec<CommandFailure>,
}

pub struct CommandQueue<T> {
    tx: UnboundedSender<Command<T>>,
    rx: UnboundedReceiver<Command<T>>,
    owner: OwnerThread,
}

impl<T: 'static> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> CommandQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            tx,
            rx,
            owner: OwnerThread::current(),
        }
    }

    pub fn owner(&self) -> OwnerThread {
        self.owner
    }

    pub fn sender(&self) -> CommandSender<T> {
        CommandSender {
            tx: self.tx.clone(),
        }
    }

    pub fn enqueue<F>(&self, label: impl Into<String>, run: F)
    where
        F: FnOnce(&mut T) -> AppResult<()> + Send + 'static,
    {
        self.sender().enqueue(label, run);
    }

    pub fn drain(&mut self) -> Vec<Command<T>> {
        self.owner.debug_check("CommandQueue::drain");
        let mut drained = Vec::new();
        while let Ok(command) = self.rx.try_recv() {
            drained.push(command);
        }
        drained
    }

    /// Drains and runs every queued command against `target`. A command that
    /// fails or panics is recorded and skipped; the rest still run.
    pub fn run_pending(&mut self, target: &mut T) -> DrainReport {
        let mut report = DrainReport::default();
        for command in self.drain() {
            let label = command.label.clone();
            match catch_unwind(AssertUnwindSafe(|| command.run(target))) {
                Ok(Ok(())) => report.executed += 1,
                Ok(Err(error)) => {
                    tracing::warn!(command = %label, error = %error, "queued command failed");
                    report.failures.push(CommandFailure {
                        label,
                        message: error.to_string(),
                    });
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(command = %label, panic = %message, "queued command panicked");
                    report.failures.push(CommandFailure { label, message });
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "command panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use std::time::{Duration, Instant};

    #[test]
    fn drain_on_empty_queue_returns_immediately() {
        let mut queue: CommandQueue<Vec<u32>> = CommandQueue::new();
        let started = Instant::now();
        assert!(queue.drain().is_empty());
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn commands_run_in_fifo_order_and_only_once() {
        let mut queue: CommandQueue<Vec<u32>> = CommandQueue::new();
        for value in 0..5 {
            queue.enqueue(format!("push {}", value), move |log: &mut Vec<u32>| {
                log.push(value);
                Ok(())
            });
        }
        let mut log = Vec::new();
        let report = queue.run_pending(&mut log);
        assert_eq!(report.executed, 5);
        assert_eq!(log, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.run_pending(&mut log).executed, 0);
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn duplicates_are_not_collapsed() {
        let mut queue: CommandQueue<u32> = CommandQueue::new();
        let sender = queue.sender();
        for _ in 0..3 {
            sender.enqueue("increment", |count: &mut u32| {
                *count += 1;
                Ok(())
            });
        }
        let mut count = 0;
        queue.run_pending(&mut count);
        assert_eq!(count, 3);
    }

    #[test]
    fn failing_and_panicking_commands_do_not_stop_the_rest() {
        let mut queue: CommandQueue<Vec<&'static str>> = CommandQueue::new();
        queue.enqueue("first", |log: &mut Vec<&'static str>| {
            log.push("first");
            Ok(())
        });
        queue.enqueue("fails", |_: &mut Vec<&'static str>| {
            Err(AppError::InvalidInput("nope".to_string()))
        });
        queue.enqueue("panics", |_: &mut Vec<&'static str>| -> AppResult<()> {
            panic!("boom")
        });
        queue.enqueue("last", |log: &mut Vec<&'static str>| {
            log.push("last");
            Ok(())
        });

        let mut log = Vec::new();
        let report = queue.run_pending(&mut log);
        assert_eq!(log, vec!["first", "last"]);
        assert_eq!(report.executed, 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].label, "fails");
        assert!(report.failures[0].message.contains("INVALID_INPUT"));
        assert_eq!(report.failures[1].message, "boom");
    }

    #[test]
    fn enqueue_after_queue_dropped_is_silent() {
        let queue: CommandQueue<u32> = CommandQueue::new();
        let sender = queue.sender();
        drop(queue);
        assert!(sender.is_closed());
        sender.enqueue("late", |_: &mut u32| Ok(()));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn drain_off_owner_thread_is_caught_in_debug() {
        let queue: CommandQueue<u32> = CommandQueue::new();
        let outcome = std::thread::spawn(move || {
            let mut queue = queue;
            queue.drain().len()
        })
        .join();
        assert!(outcome.is_err());
    }
}
