//! Filesystem utilities.
//!
//! Atomic replacement is what keeps lock records and store files readable at
//! every instant, even while another process is rewriting them.

pub mod atomic;

pub use atomic::atomic_write;
pub use atomic::atomic_write_file;
pub use atomic::remove_own_temp_files;
