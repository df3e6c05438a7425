//! 标签表 CRUD 操作
//!
//! 标签是扁平的分类体系：名称全局唯一（大小写敏感），没有软删除状态。
//!
//! ## 核心方法
//! - `create_tag` / `update_tag`: 名称唯一性在写入前检查，UNIQUE 约束冲突同样映射为 `DuplicateName`
//! - `delete_tag`: 依次删除笔记关联、该标签下的标记、标签本身
//! - `find_unused` / `find_most_used`: 使用量投影
//! - `cleanup_unused`: 逐个删除未使用标签，收集失败项

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use tracing::{debug, info, warn};

use super::base::{now_ms, require_exists, with_transaction, EntityKind};
use crate::organizer::database::OrganizerDatabase;
use crate::organizer::error::{is_unique_violation, OrganizerError, OrganizerResult};
use crate::organizer::predicate::{substring, where_clause};
use crate::organizer::types::{CleanupFailure, CleanupResult, DeletedId, Tag, UpdateTagParams};

/// 标签查询列（note_count 统计关联行，含已软删除的笔记）
const TAG_SELECT: &str = "SELECT t.id, t.name, t.color, t.created_at, t.updated_at, \
     (SELECT COUNT(DISTINCT nt.note_id) FROM note_tags nt WHERE nt.tag_id = t.id) AS note_count \
     FROM tags t";

/// 标签表 Repo
pub struct TagRepo;

impl TagRepo {
    fn row_to_tag(row: &Row) -> rusqlite::Result<Tag> {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            color: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            note_count: row.get::<_, i64>(5)? as u32,
        })
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 列出标签（按名称排序），可按名称子串过滤
    pub fn list_tags(db: &OrganizerDatabase, search: Option<&str>) -> OrganizerResult<Vec<Tag>> {
        let conn = db.get_conn_safe()?;
        Self::list_tags_with_conn(&conn, search)
    }

    /// 列出标签（使用现有连接）
    pub fn list_tags_with_conn(conn: &Connection, search: Option<&str>) -> OrganizerResult<Vec<Tag>> {
        let predicate = search.and_then(|s| substring("t.name", s));
        let mut values = Vec::new();
        let sql = format!(
            "{}{} ORDER BY t.name ASC",
            TAG_SELECT,
            where_clause(predicate.as_ref(), &mut values)
        );
        let bind: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();

        let mut stmt = conn.prepare(&sql)?;
        let tags = stmt
            .query_map(bind.as_slice(), Self::row_to_tag)?
            .collect::<Result<Vec<_>, _>>()?;

        debug!("[Organizer::TagRepo] Listed {} tags", tags.len());
        Ok(tags)
    }

    /// 获取标签
    pub fn get_tag(db: &OrganizerDatabase, tag_id: &str) -> OrganizerResult<Tag> {
        let conn = db.get_conn_safe()?;
        Self::get_tag_with_conn(&conn, tag_id)
    }

    /// 获取标签（使用现有连接）
    pub fn get_tag_with_conn(conn: &Connection, tag_id: &str) -> OrganizerResult<Tag> {
        let sql = format!("{} WHERE t.id = ?1", TAG_SELECT);
        conn.query_row(&sql, params![tag_id], Self::row_to_tag)
            .optional()?
            .ok_or_else(|| EntityKind::Tag.not_found(tag_id))
    }

    /// 按名称查找标签（精确匹配）
    pub fn find_by_name_with_conn(conn: &Connection, name: &str) -> OrganizerResult<Option<Tag>> {
        let sql = format!("{} WHERE t.name = ?1", TAG_SELECT);
        Ok(conn.query_row(&sql, params![name], Self::row_to_tag).optional()?)
    }

    /// 标签关联的笔记数
    pub fn usage_count_with_conn(conn: &Connection, tag_id: &str) -> OrganizerResult<u32> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT note_id) FROM note_tags WHERE tag_id = ?1",
            params![tag_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// 未被任何笔记使用的标签（按名称排序）
    pub fn find_unused(db: &OrganizerDatabase) -> OrganizerResult<Vec<Tag>> {
        let conn = db.get_conn_safe()?;
        Self::find_unused_with_conn(&conn)
    }

    pub fn find_unused_with_conn(conn: &Connection) -> OrganizerResult<Vec<Tag>> {
        let sql = format!(
            "{} WHERE NOT EXISTS (SELECT 1 FROM note_tags nt WHERE nt.tag_id = t.id) ORDER BY t.name ASC",
            TAG_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let tags = stmt
            .query_map([], Self::row_to_tag)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// 使用最多的标签
    ///
    /// 仅包含使用量大于 0 的标签，按使用量降序，使用量相同时按创建顺序。
    pub fn find_most_used(db: &OrganizerDatabase, limit: usize) -> OrganizerResult<Vec<Tag>> {
        let conn = db.get_conn_safe()?;
        Self::find_most_used_with_conn(&conn, limit)
    }

    pub fn find_most_used_with_conn(conn: &Connection, limit: usize) -> OrganizerResult<Vec<Tag>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.name, t.color, t.created_at, t.updated_at,
                   COUNT(DISTINCT nt.note_id) AS note_count
            FROM tags t
            JOIN note_tags nt ON nt.tag_id = t.id
            GROUP BY t.id
            ORDER BY note_count DESC, t.rowid ASC
            LIMIT ?1
            "#,
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let tags = stmt
            .query_map(params![limit], Self::row_to_tag)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    // ========================================================================
    // 写入
    // ========================================================================

    /// 创建标签
    pub fn create_tag(
        db: &OrganizerDatabase,
        name: &str,
        color: Option<&str>,
    ) -> OrganizerResult<Tag> {
        let conn = db.get_conn_safe()?;
        Self::create_tag_with_conn(&conn, name, color)
    }

    /// 创建标签（使用现有连接）
    pub fn create_tag_with_conn(
        conn: &Connection,
        name: &str,
        color: Option<&str>,
    ) -> OrganizerResult<Tag> {
        if Self::find_by_name_with_conn(conn, name)?.is_some() {
            return Err(OrganizerError::DuplicateName {
                name: name.to_string(),
            });
        }

        let tag_id = Tag::generate_id();
        let now = now_ms();
        conn.execute(
            "INSERT INTO tags (id, name, color, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tag_id, name, color, now, now],
        )
        .map_err(|e| Self::map_name_conflict(e, name))?;

        info!("[Organizer::TagRepo] Created tag: {} ({})", tag_id, name);

        Ok(Tag {
            id: tag_id,
            name: name.to_string(),
            color: color.map(str::to_string),
            note_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// 更新标签
    pub fn update_tag(
        db: &OrganizerDatabase,
        tag_id: &str,
        update: &UpdateTagParams,
    ) -> OrganizerResult<Tag> {
        let conn = db.get_conn_safe()?;
        Self::update_tag_with_conn(&conn, tag_id, update)
    }

    /// 更新标签（使用现有连接）
    pub fn update_tag_with_conn(
        conn: &Connection,
        tag_id: &str,
        update: &UpdateTagParams,
    ) -> OrganizerResult<Tag> {
        with_transaction(conn, "organizer_tag_update_tx", |conn| {
            let current = Self::get_tag_with_conn(conn, tag_id)?;

            let name = update.name.clone().unwrap_or_else(|| current.name.clone());
            if name != current.name {
                if let Some(other) = Self::find_by_name_with_conn(conn, &name)? {
                    if other.id != tag_id {
                        return Err(OrganizerError::DuplicateName { name });
                    }
                }
            }
            let color = match &update.color {
                Some(color) => color.clone(),
                None => current.color.clone(),
            };

            conn.execute(
                "UPDATE tags SET name = ?1, color = ?2, updated_at = ?3 WHERE id = ?4",
                params![name, color, now_ms(), tag_id],
            )
            .map_err(|e| Self::map_name_conflict(e, &name))?;

            info!("[Organizer::TagRepo] Updated tag: {}", tag_id);
            Self::get_tag_with_conn(conn, tag_id)
        })
    }

    /// 删除标签
    ///
    /// 依次删除 note_tags 关联、该标签下的标记，再删除标签本身；不检查使用量。
    pub fn delete_tag(db: &OrganizerDatabase, tag_id: &str) -> OrganizerResult<DeletedId> {
        let conn = db.get_conn_safe()?;
        Self::delete_tag_with_conn(&conn, tag_id)
    }

    /// 删除标签（使用现有连接）
    pub fn delete_tag_with_conn(conn: &Connection, tag_id: &str) -> OrganizerResult<DeletedId> {
        with_transaction(conn, "organizer_tag_delete_tx", |conn| {
            require_exists(conn, EntityKind::Tag, tag_id)?;
            Self::remove_tag_rows(conn, tag_id)?;
            info!("[Organizer::TagRepo] Deleted tag: {}", tag_id);
            Ok(DeletedId::new(tag_id))
        })
    }

    fn remove_tag_rows(conn: &Connection, tag_id: &str) -> OrganizerResult<()> {
        let links = conn.execute("DELETE FROM note_tags WHERE tag_id = ?1", params![tag_id])?;
        let marks = conn.execute("DELETE FROM marks WHERE tag_id = ?1", params![tag_id])?;
        conn.execute("DELETE FROM tags WHERE id = ?1", params![tag_id])?;
        debug!(
            "[Organizer::TagRepo] Removed tag {} with {} note links and {} marks",
            tag_id, links, marks
        );
        Ok(())
    }

    /// 清理所有未使用的标签
    ///
    /// 每个标签在独立的事务中删除，删除前重新检查使用量；
    /// 单个标签失败不影响其他标签，失败项记录在 `errors` 中。
    pub fn cleanup_unused(db: &OrganizerDatabase) -> OrganizerResult<CleanupResult> {
        let conn = db.get_conn_safe()?;
        Self::cleanup_unused_with_conn(&conn)
    }

    pub fn cleanup_unused_with_conn(conn: &Connection) -> OrganizerResult<CleanupResult> {
        let candidates = Self::find_unused_with_conn(conn)?;
        let mut result = CleanupResult::default();

        for tag in candidates {
            let outcome = with_transaction(conn, "organizer_tag_cleanup_tx", |conn| {
                if Self::usage_count_with_conn(conn, &tag.id)? > 0 {
                    return Ok(false);
                }
                Self::remove_tag_rows(conn, &tag.id)?;
                Ok(true)
            });

            match outcome {
                Ok(true) => result.deleted_tags.push(tag),
                Ok(false) => {
                    debug!(
                        "[Organizer::TagRepo] Tag {} gained usage during cleanup, kept",
                        tag.id
                    );
                }
                Err(e) => {
                    warn!(
                        "[Organizer::TagRepo] Failed to clean up tag {}: {}",
                        tag.id, e
                    );
                    result.errors.push(CleanupFailure {
                        tag_id: tag.id,
                        message: e.to_string(),
                    });
                }
            }
        }

        result.deleted_count = result.deleted_tags.len();
        info!(
            "[Organizer::TagRepo] Cleanup removed {} unused tags ({} failures)",
            result.deleted_count,
            result.errors.len()
        );
        Ok(result)
    }

    fn map_name_conflict(err: rusqlite::Error, name: &str) -> OrganizerError {
        if is_unique_violation(&err) {
            OrganizerError::DuplicateName {
                name: name.to_string(),
            }
        } else {
            err.into()
        }
    }
}

// ============================================================================
// 单元测试
// ============================================================================
