//! 仓储共享工具
//!
//! 各 Repo 通过组合这些自由函数复用存在性检查、时间戳、ID 生成和事务逻辑。

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::organizer::error::{OrganizerError, OrganizerResult};

pub use crate::organizer::predicate::{combine_all, combine_any};

/// 实体种类（表名 + 错误中使用的资源名）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Folder,
    Note,
    Tag,
    Mark,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Folder => "folders",
            EntityKind::Note => "notes",
            EntityKind::Tag => "tags",
            EntityKind::Mark => "marks",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Folder => "Folder",
            EntityKind::Note => "Note",
            EntityKind::Tag => "Tag",
            EntityKind::Mark => "Mark",
        }
    }

    /// 软删除标记列（标签无软删除）
    pub fn deleted_column(&self) -> Option<&'static str> {
        match self {
            EntityKind::Folder | EntityKind::Note => Some("is_deleted"),
            EntityKind::Mark => Some("deleted"),
            EntityKind::Tag => None,
        }
    }

    pub fn not_found(&self, id: &str) -> OrganizerError {
        OrganizerError::not_found(self.label(), id)
    }
}

/// 检查实体是否存在（包含已软删除的行）
pub fn exists_with_conn(conn: &Connection, kind: EntityKind, id: &str) -> OrganizerResult<bool> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)",
        kind.table()
    );
    let exists: bool = conn.query_row(&sql, params![id], |row| row.get(0))?;
    Ok(exists)
}

/// 要求实体存在，否则返回 `NotFound`
pub fn require_exists(conn: &Connection, kind: EntityKind, id: &str) -> OrganizerResult<()> {
    if exists_with_conn(conn, kind, id)? {
        Ok(())
    } else {
        Err(kind.not_found(id))
    }
}

/// 读取实体的软删除状态；实体不存在时返回 `None`
pub fn deleted_state(conn: &Connection, kind: EntityKind, id: &str) -> OrganizerResult<Option<bool>> {
    let Some(column) = kind.deleted_column() else {
        return Ok(exists_with_conn(conn, kind, id)?.then_some(false));
    };
    let sql = format!("SELECT {} FROM {} WHERE id = ?1", column, kind.table());
    let state = conn
        .query_row(&sql, params![id], |row| row.get::<_, bool>(0))
        .optional()?;
    Ok(state)
}

/// 当前毫秒时间戳
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 生成带前缀的 ID，例如 `new_id("fld")` → `fld_V1StGXR8_Z`
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, nanoid::nanoid!(10))
}

/// 在写事务中执行闭包
///
/// 连接处于自动提交状态时以 `BEGIN IMMEDIATE` 开启事务，写锁在第一次读之前取得，
/// 并发写入按 busy_timeout 等待；闭包返回 `Ok` 时 COMMIT，返回 `Err` 时 ROLLBACK。
/// 已在外部事务中时改用名为 `name` 的 SAVEPOINT，失败只回滚到保存点。
pub fn with_transaction<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> OrganizerResult<T>,
) -> OrganizerResult<T> {
    if !conn.is_autocommit() {
        return with_savepoint(conn, name, f);
    }

    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(value) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                warn!(
                    "[Organizer::Repo] Rollback of {} failed: {}",
                    name, rollback_err
                );
            }
            Err(e)
        }
    }
}

/// 嵌套在外部事务中的 SAVEPOINT
fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> OrganizerResult<T>,
) -> OrganizerResult<T> {
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;

    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0};",
                name
            ));
            Err(e)
        }
    }
}
