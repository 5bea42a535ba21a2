//! Atomic file I/O: temp-write-then-rename, and directory-based locks with
//! stale-owner reclaim.

mod atomic;
mod lock;

pub use atomic::{read_json, write_file_atomic, write_json_atomic};
pub use lock::{acquire_lock, DirLock};
