// ============================================================================
// src/config.rs - VFS compile-time limits
// ============================================================================

/// Longest absolute path accepted by the resolver (bytes, without NUL).
pub const MAX_PATH: usize = 4096;

/// Longest single path component (bytes).
pub const MAX_NAME_LEN: usize = 255;

/// Maximum number of simultaneously mounted filesystems.
pub const MAX_MOUNTS: usize = 32;

/// Root separator. The VFS only ever sees absolute paths.
pub const PATH_SEPARATOR: char = '/';
