pub mod file_task_store;
pub mod memory_task_store;
pub mod session_store;

pub use file_task_store::FileTaskStore;
pub use memory_task_store::MemoryTaskStore;
pub use session_store::{FileSessionStore, MemorySessionStore};
