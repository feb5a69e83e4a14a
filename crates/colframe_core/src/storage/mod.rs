//! Segmented block storage: the on-disk format, the manager owning open
//! segment handles, and the frame index file tying segments together.

pub mod block_file;
pub mod block_manager;
pub mod index_file;
pub mod stream;
