//! Organizer 内容仓储模块
//!
//! 管理个人内容整理器的数据：层级文件夹、笔记、扁平标签体系，
//! 以及挂在标签下、带回收站的标记（Mark）。
//!
//! ## 模块结构
//! ```text
//! organizer/
//! ├── mod.rs           - 模块注册、常量和 re-export
//! ├── types.rs         - 实体与参数类型
//! ├── error.rs         - 错误类型
//! ├── predicate.rs     - 列表查询过滤条件
//! ├── validation.rs    - 写入前的字段校验
//! ├── database.rs      - OrganizerDatabase 连接池与迁移
//! ├── handlers.rs      - Organizer 操作入口（校验 + 仓储调用）
//! └── repos/           - 各表 CRUD
//! ```
//!
//! ## 迁移系统
//! 使用 Refinery 框架，迁移文件位于 `migrations/organizer/` 目录。

pub mod database;
pub mod error;
pub mod handlers;
pub mod predicate;
pub mod repos;
pub mod types;
pub mod validation;

pub use database::{OrganizerDatabase, OrganizerDatabaseStats, OrganizerPool, OrganizerPooledConnection};
pub use error::{OrganizerError, OrganizerResult};
pub use handlers::Organizer;
pub use repos::{EntityKind, FolderRepo, MarkRepo, NoteRepo, TagRepo};
pub use types::*;
pub use validation::{FieldValidator, FieldValue, FieldViolation, ValidationBatch, ValidationErrors};

// ============================================================================
// 字段限制
// ============================================================================

/// 文件夹名称最大长度（字符）
pub const MAX_FOLDER_NAME_LENGTH: usize = 100;

/// 标签名称最大长度（字符）
pub const MAX_TAG_NAME_LENGTH: usize = 50;

/// 笔记标题最大长度（字符）
pub const MAX_NOTE_TITLE_LENGTH: usize = 200;

/// 单个笔记最多关联的标签数
pub const MAX_TAGS_PER_NOTE: usize = 100;
