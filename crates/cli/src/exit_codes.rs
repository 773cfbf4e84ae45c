//! CLI exit code registry.
//!
//! Exit codes are part of the shell contract; batch scripts that run many
//! datasets rely on them to tell a bad config from a broken store.
//!
//! | Code | Meaning                                           |
//! |------|---------------------------------------------------|
//! | 0    | Success                                           |
//! | 1    | General error (unspecified)                       |
//! | 2    | Usage error (bad args, unreadable input file)     |
//! | 3    | Dataset config invalid (parse or validation)      |
//! | 4    | Store or runtime failure during the run           |
//! | 5    | A report file could not be written                |

/// Command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Unspecified failure. Prefer a specific code.
pub const EXIT_ERROR: u8 = 1;

/// Bad arguments or an input file that cannot be read.
pub const EXIT_USAGE: u8 = 2;

/// Config failed to parse or validate.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// Spatial store error, missing table or column, bad geometry.
pub const EXIT_RUNTIME: u8 = 4;

/// Report or JSON output could not be written.
pub const EXIT_EXPORT: u8 = 5;
