//! Organizer 错误类型定义
//!
//! 本模块定义仓储层的错误类型和结果类型别名。
//! 每个仓储操作要么完全成功，要么返回且仅返回一个错误。

use thiserror::Error;

use super::validation::ValidationErrors;

/// Organizer 操作结果类型别名
pub type OrganizerResult<T> = Result<T, OrganizerError>;

/// Organizer 错误类型
#[derive(Debug, Error)]
pub enum OrganizerError {
    /// 资源未找到
    #[error("{resource_type} not found: {id}")]
    NotFound { resource_type: String, id: String },

    /// 标签名称重复
    #[error("DUPLICATE_NAME: tag '{name}' already exists")]
    DuplicateName { name: String },

    /// 无效的父文件夹（不存在或已在回收站）
    #[error("INVALID_PARENT: {folder_id} - {reason}")]
    InvalidParent { folder_id: String, reason: String },

    /// 移动后会形成循环
    #[error("CYCLE_DETECTED: moving {folder_id} under {parent_id} would create a cycle")]
    CycleDetected { folder_id: String, parent_id: String },

    /// 文件夹仍有未删除的子文件夹
    #[error("HAS_CHILDREN: folder {folder_id} has {count} active child folder(s)")]
    HasChildren { folder_id: String, count: usize },

    /// 文件夹仍有未删除的笔记
    #[error("HAS_NOTES: folder {folder_id} has {count} active note(s)")]
    HasNotes { folder_id: String, count: usize },

    /// 对未删除的实体执行恢复
    #[error("NOT_DELETED: {resource_type} {id} is not in the trash")]
    NotDeleted { resource_type: String, id: String },

    /// 字段校验失败（聚合所有字段的违规）
    #[error("VALIDATION_FAILED: {0}")]
    ValidationFailed(ValidationErrors),

    /// 数据库错误
    #[error("Database error: {0}")]
    Database(String),

    /// 连接池错误
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// 迁移错误
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(String),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),
}

impl OrganizerError {
    /// 创建资源不存在错误
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        OrganizerError::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// 创建未删除错误
    pub fn not_deleted(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        OrganizerError::NotDeleted {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// 稳定的错误码，供调用方区分错误种类
    pub fn code(&self) -> &'static str {
        match self {
            OrganizerError::NotFound { .. } => "NOT_FOUND",
            OrganizerError::DuplicateName { .. } => "DUPLICATE_NAME",
            OrganizerError::InvalidParent { .. } => "INVALID_PARENT",
            OrganizerError::CycleDetected { .. } => "CYCLE_DETECTED",
            OrganizerError::HasChildren { .. } => "HAS_CHILDREN",
            OrganizerError::HasNotes { .. } => "HAS_NOTES",
            OrganizerError::NotDeleted { .. } => "NOT_DELETED",
            OrganizerError::ValidationFailed(_) => "VALIDATION_FAILED",
            OrganizerError::Database(_) => "DATABASE",
            OrganizerError::Pool(_) => "POOL",
            OrganizerError::Migration(_) => "MIGRATION",
            OrganizerError::Io(_) => "IO",
            OrganizerError::Config(_) => "CONFIG",
        }
    }
}

// 从标准错误类型转换
impl From<std::io::Error> for OrganizerError {
    fn from(err: std::io::Error) -> Self {
        OrganizerError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for OrganizerError {
    fn from(err: rusqlite::Error) -> Self {
        OrganizerError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for OrganizerError {
    fn from(err: r2d2::Error) -> Self {
        OrganizerError::Pool(err.to_string())
    }
}

impl From<ValidationErrors> for OrganizerError {
    fn from(errors: ValidationErrors) -> Self {
        OrganizerError::ValidationFailed(errors)
    }
}

/// 判断 rusqlite 错误是否为 UNIQUE 约束冲突
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrganizerError::not_found("Note", "note_abc123");
        assert_eq!(err.to_string(), "Note not found: note_abc123");

        let err = OrganizerError::CycleDetected {
            folder_id: "fld_a".to_string(),
            parent_id: "fld_b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "CYCLE_DETECTED: moving fld_a under fld_b would create a cycle"
        );
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            OrganizerError::not_found("Tag", "t"),
            OrganizerError::DuplicateName {
                name: "rust".to_string(),
            },
            OrganizerError::HasChildren {
                folder_id: "f".to_string(),
                count: 1,
            },
            OrganizerError::HasNotes {
                folder_id: "f".to_string(),
                count: 2,
            },
            OrganizerError::not_deleted("Mark", "m"),
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_from_rusqlite_error() {
        let err: OrganizerError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.code(), "DATABASE");
    }
}
