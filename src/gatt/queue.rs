//! The command queue of a connection
//!
//! Only one request may be awaiting a response at a time. The current command is the front of
//! the queue, every other command waits behind it.

use super::Pending;
use std::collections::VecDeque;

/// A request and what is done with its response
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Command {
    pub request: Vec<u8>,
    pub pending: Pending,
}

impl Command {
    pub fn new(request: Vec<u8>, pending: Pending) -> Self {
        Command { request, pending }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    commands: VecDeque<Command>,
}

impl CommandQueue {
    /// Add a command to the back of the queue
    ///
    /// True is returned if the queue was idle, the command must then be written.
    pub fn push(&mut self, command: Command) -> bool {
        self.commands.push_back(command);

        self.commands.len() == 1
    }

    /// The command that is written and awaiting its response
    pub fn current(&self) -> Option<&Command> {
        self.commands.front()
    }

    /// Remove the current command
    pub fn pop(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear()
    }
}
