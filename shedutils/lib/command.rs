//! `shedutils::command` runs external programs and captures their output.
//!
//! Mounting, formatting and copying are all done by shelling out. Callers talk to a
//! [`CommandRunner`] so the ordering and error handling around those calls can be tested
//! without touching real devices.

use std::{fmt, process::Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{ShedutilsError, ShedutilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A program invocation: the executable and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

/// Output captured from a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined stdout and stderr.
    pub combined: String,
}

/// Runs commands as child processes of the current process.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Executes external commands.
///
/// A non-zero exit is reported as [`ShedutilsError::CommandFailed`] carrying the combined output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion.
    async fn run(&self, command: &CommandSpec) -> ShedutilsResult<CommandOutput>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CommandSpec {
    /// Creates a spec for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The program to execute.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments passed to the program.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec) -> ShedutilsResult<CommandOutput> {
        tracing::debug!(command = %command, "running command");

        let output = Command::new(command.program())
            .args(command.get_args())
            .stdin(Stdio::null())
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ShedutilsError::CommandFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                output: combined,
            });
        }

        Ok(CommandOutput { combined })
    }
}

//--------------------------------------------------------------------------------------------------
// Test Support
//--------------------------------------------------------------------------------------------------

#[cfg(any(test, feature = "test-support"))]
mod recording {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{CommandOutput, CommandRunner, CommandSpec};
    use crate::{ShedutilsError, ShedutilsResult};

    type Handler = Arc<dyn Fn(&CommandSpec) -> ShedutilsResult<CommandOutput> + Send + Sync>;

    /// A [`CommandRunner`] that records every command and answers from registered handlers.
    ///
    /// Commands with no handler succeed with empty output.
    #[derive(Clone, Default)]
    pub struct RecordingRunner {
        executed: Arc<Mutex<Vec<CommandSpec>>>,
        handlers: Arc<Mutex<Vec<(String, Handler)>>>,
    }

    impl RecordingRunner {
        /// Creates a runner with no handlers.
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers a handler for every invocation of `program`. Later registrations win.
        pub fn when_running(
            &self,
            program: impl Into<String>,
            handler: impl Fn(&CommandSpec) -> ShedutilsResult<CommandOutput> + Send + Sync + 'static,
        ) {
            self.handlers
                .lock()
                .unwrap()
                .push((program.into(), Arc::new(handler)));
        }

        /// Makes every invocation of `program` fail with the given output.
        pub fn fail(&self, program: impl Into<String>, output: impl Into<String>) {
            let output = output.into();
            self.when_running(program, move |spec| {
                Err(ShedutilsError::CommandFailed {
                    command: spec.to_string(),
                    status: "exit status: 1".to_string(),
                    output: output.clone(),
                })
            });
        }

        /// All commands run so far, in order.
        pub fn executed(&self) -> Vec<CommandSpec> {
            self.executed.lock().unwrap().clone()
        }

        /// Commands run so far whose program is `program`.
        pub fn executed_program(&self, program: &str) -> Vec<CommandSpec> {
            self.executed()
                .into_iter()
                .filter(|spec| spec.program() == program)
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, command: &CommandSpec) -> ShedutilsResult<CommandOutput> {
            self.executed.lock().unwrap().push(command.clone());

            let handler = self
                .handlers
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(program, _)| program == command.program())
                .map(|(_, handler)| handler.clone());

            match handler {
                Some(handler) => handler(command),
                None => Ok(CommandOutput::default()),
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use recording::RecordingRunner;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
