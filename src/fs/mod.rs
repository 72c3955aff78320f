//! File system: the reference-counted file table, the RAM-backed inode
//! layer beneath it, the transaction bracket serializing writes, and pipes.

pub(crate) mod file;
pub(crate) mod inode;
pub(crate) mod log;
pub(crate) mod pipe;

/// Bring up the file system: the root directory and the console device
/// node.
pub fn init() {
    inode::init();
    file::console_node_init();
}
