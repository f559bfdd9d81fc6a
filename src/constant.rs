//! This module contains constants that are needed throughout the codebase.

/// The width of word on the EVM in bits.
pub const WORD_SIZE_BITS: u32 = 256;

/// The width of a byte on the EVM (and most other places) in bits.
pub const BYTE_SIZE_BITS: u32 = 8;

/// The width of a word on the EVM in bytes.
pub const WORD_SIZE_BYTES: u32 = WORD_SIZE_BITS / BYTE_SIZE_BITS;

/// The bit-width of an address type.
pub const ADDRESS_WIDTH_BITS: u32 = 160;

/// The width of an address in bytes.
pub const ADDRESS_WIDTH_BYTES: usize = 20;

/// The largest symbolic buffer, in bytes, that the value factory will mint.
///
/// This matches the maximum size of a contract's code as specified in
/// [EIP-170](https://eips.ethereum.org/EIPS/eip-170), which is comfortably
/// larger than any calldata an orchestration script will ask for.
pub const MAX_BUFFER_BYTES: u32 = 24_576;

/// The default number of worker threads used to step states in parallel.
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// The default maximum number of states that are checked out of the worklist
/// in a single scheduling round.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// The default limit on the total number of steps taken by a single call to
/// `run_until_quiescent`.
pub const DEFAULT_STEP_BUDGET: usize = 1_000_000;

/// The default limit on the number of steps a single state may take before it
/// is considered to be looping.
pub const DEFAULT_STATE_STEP_LIMIT: usize = 10_000;

/// The default time, in milliseconds, that the bounded oracle may spend on a
/// single query before reporting a timeout.
pub const DEFAULT_SOLVER_TIMEOUT_MILLIS: u64 = 30_000;

/// The default number of candidate assignments the bounded oracle will try
/// before giving up on a query.
pub const DEFAULT_SOLVER_ASSIGNMENT_LIMIT: usize = 4_000_000;

/// The default number of candidate values considered per symbolic atom by the
/// bounded oracle.
pub const DEFAULT_SOLVER_CANDIDATES_PER_VALUE: usize = 64;

/// Atoms at most this many bits wide are enumerated exhaustively by the
/// bounded oracle.
pub const DEFAULT_SOLVER_EXHAUSTIVE_WIDTH_BITS: u32 = 8;

/// The default number of loop iterations the scheduler will wait before
/// polling the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 100;

/// The file extension used for test cases persisted into a directory
/// workspace.
pub const TESTCASE_FILE_EXTENSION: &str = "testcase.json";

/// The prefix used for workspace directories created by the library itself.
pub const WORKSPACE_DIRECTORY_PREFIX: &str = "sym_";
