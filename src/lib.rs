// Deep Organizer library entry
// 个人内容整理器的存储层：文件夹树、笔记、标签与标记。

pub mod config;
pub mod logging;
pub mod organizer;

pub use config::OrganizerConfig;
pub use organizer::{Organizer, OrganizerDatabase, OrganizerError, OrganizerResult};
