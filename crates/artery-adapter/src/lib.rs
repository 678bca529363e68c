mod storage;

pub use storage::{FileHandle, FilesystemStorage, LinkMode};
