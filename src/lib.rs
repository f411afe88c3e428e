//! shellbox — an embeddable, sandboxed POSIX-style shell engine.
//!
//! Scripts are tokenized, parsed into an immutable program tree, and
//! executed against virtualized state: variables, functions, aliases, a
//! pluggable filesystem, and a pluggable command registry. Nothing ever
//! touches the host: no processes are spawned, and all paths resolve
//! inside the virtual filesystem.
//!
//! ```no_run
//! use shellbox::{Shell, ShellConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut shell = Shell::new(ShellConfig::default()).await;
//!     let result = shell.exec("for i in a b c; do echo $i; done").await;
//!     assert_eq!(result.stdout, "a\nb\nc\n");
//!     assert_eq!(result.exit_code, 0);
//! }
//! ```

pub mod alias;
pub mod ast;
pub mod builtins;
pub mod command;
pub mod error;
pub mod fs;
pub mod interp;
pub mod lexer;
pub mod limits;
pub mod parser;
pub mod shell;
pub mod word;

pub use command::{CmdResult, CommandContext, Registry, ShellCommand, TraceEvent, TraceSink};
pub use error::{ControlFlow, ExecutionLimitError, LexError, ParseError};
pub use fs::{FileSystem, MemFs, OverlayFs};
pub use limits::ExecLimits;
pub use shell::{ExecResult, Shell, ShellConfig};
