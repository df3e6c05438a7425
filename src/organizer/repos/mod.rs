//! Organizer Repo 模块
//!
//! 提供各表的 CRUD 操作。
//! 所有 Repo 方法提供 `_with_conn` 版本，便于在同一连接/事务中组合调用。
//!
//! ## 模块结构
//! - `base`: 共享工具（存在性检查、时间戳、ID、写事务）
//! - `tag_repo`: 标签 CRUD + 使用量统计 + 清理
//! - `folder_repo`: 文件夹层级 CRUD + 树/祖先链 + 删除保护
//! - `note_repo`: 笔记 CRUD + 标签关联 + 回收站
//! - `mark_repo`: 标签下的标记 CRUD + 回收站

pub mod base;
pub mod folder_repo;
pub mod mark_repo;
pub mod note_repo;
pub mod tag_repo;

pub use base::EntityKind;
pub use folder_repo::FolderRepo;
pub use mark_repo::MarkRepo;
pub use note_repo::NoteRepo;
pub use tag_repo::TagRepo;
