//! Resource ceilings for parsing and execution.
//!
//! Untrusted scripts can be adversarial: enormous inputs, token floods,
//! unbounded loops, runaway recursion. Every ceiling here is checked by the
//! front end or the executor and surfaces as a hard error rather than a
//! hang.

/// Maximum script length in bytes accepted by the parser.
pub const MAX_INPUT_SIZE: usize = 1_000_000;

/// Maximum number of tokens a single parse may produce.
pub const MAX_TOKENS: usize = 100_000;

/// Maximum iterations across all parser loops before the parse is declared
/// stuck.
pub const MAX_PARSE_ITERATIONS: usize = 1_000_000;

/// Limits applied by the executor. Distinct from the parser ceilings above:
/// these bound what a well-formed script may *do*.
#[derive(Debug, Clone)]
pub struct ExecLimits {
    /// Maximum function-call recursion depth.
    pub max_recursion_depth: u32,
    /// Maximum number of commands one `exec()` may dispatch.
    pub max_commands: u64,
    /// Maximum iterations of any single loop.
    pub max_loop_iterations: u64,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: 1000,
            max_commands: 100_000,
            max_loop_iterations: 1_000_000,
        }
    }
}

/// Exit code reported when an execution limit is exceeded.
pub const LIMIT_EXIT_CODE: i32 = 126;

/// Exit code reported for lex/parse failures.
pub const SYNTAX_EXIT_CODE: i32 = 2;

/// Exit code reported when a command is not found in the registry.
pub const NOT_FOUND_EXIT_CODE: i32 = 127;
