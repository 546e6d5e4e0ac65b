/// Marker echoed by the driver script as the final line of the standard
/// output file. Used to tell genuine end-of-output apart from truncation
/// when the bounded read hits its limit.
pub const OUTPUT_EOF_SENTINEL: &str = "*-COMPILE::EOF-*";

/// Upper bound on the number of lines loaded back from a captured
/// output file.
pub const MAX_OUTPUT_READ_LINES: usize = 50;

/// The directory the workspace is bind-mounted to inside the container.
pub const CONTAINER_INPUT_DIR: &str = "/input";

/// Name of the driver script once staged inside a workspace.
pub const DRIVER_SCRIPT_NAME: &str = "script.sh";

/// Grace period given to a container between a stop request and a
/// forced kill.
pub const STOP_GRACE_SECONDS: u64 = 1;

/// Delay between container starts in a parallel multi-test run, purely
/// to avoid saturating the engine's event-delivery channel.
pub const PARALLEL_DISPATCH_DELAY_MS: u64 = 50;

/// Request defaults applied when the envelope omits the fields.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 2;
pub const DEFAULT_MEMORY_LIMIT_MB: i64 = 128;
