//! 标记（Mark）表 CRUD 操作
//!
//! 标记是挂在标签下的类型化记录（文本、图片、链接、文件、扫描件），
//! 带回收站：软删除 → 恢复 / 永久删除 / 清空回收站。

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use tracing::{debug, info};

use super::base::{deleted_state, now_ms, require_exists, with_transaction, EntityKind};
use crate::organizer::database::OrganizerDatabase;
use crate::organizer::error::{OrganizerError, OrganizerResult};
use crate::organizer::predicate::{combine_all, equals, exclude_soft_deleted, where_clause, Predicate};
use crate::organizer::types::{
    ClearTrashResult, CreateMarkParams, DeletedId, Mark, MarkType, UpdateMarkParams,
};

const MARK_SELECT: &str =
    "SELECT m.id, m.tag_id, m.type, m.content, m.url, m.description, m.deleted, m.created_at FROM marks m";

/// 标记表 Repo
pub struct MarkRepo;

impl MarkRepo {
    fn row_to_mark(row: &Row) -> rusqlite::Result<Mark> {
        let raw_type: String = row.get(2)?;
        let mark_type = raw_type
            .parse::<MarkType>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?;

        Ok(Mark {
            id: row.get(0)?,
            tag_id: row.get(1)?,
            mark_type,
            content: row.get(3)?,
            url: row.get(4)?,
            desc: row.get(5)?,
            deleted: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn query_marks(conn: &Connection, predicate: Option<&Predicate>) -> OrganizerResult<Vec<Mark>> {
        let mut values = Vec::new();
        let sql = format!(
            "{}{} ORDER BY m.created_at ASC, m.rowid ASC",
            MARK_SELECT,
            where_clause(predicate, &mut values)
        );
        let bind: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();

        let mut stmt = conn.prepare(&sql)?;
        let marks = stmt
            .query_map(bind.as_slice(), Self::row_to_mark)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(marks)
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 列出标签下未删除的标记（按创建时间）
    pub fn list_by_tag(db: &OrganizerDatabase, tag_id: &str) -> OrganizerResult<Vec<Mark>> {
        let conn = db.get_conn_safe()?;
        Self::list_by_tag_with_conn(&conn, tag_id)
    }

    pub fn list_by_tag_with_conn(conn: &Connection, tag_id: &str) -> OrganizerResult<Vec<Mark>> {
        let predicate = combine_all([equals("m.tag_id", tag_id), exclude_soft_deleted("m.deleted")]);
        let marks = Self::query_marks(conn, predicate.as_ref())?;
        debug!(
            "[Organizer::MarkRepo] Listed {} marks for tag {}",
            marks.len(),
            tag_id
        );
        Ok(marks)
    }

    /// 列出所有标记
    pub fn list_all(db: &OrganizerDatabase, include_deleted: bool) -> OrganizerResult<Vec<Mark>> {
        let conn = db.get_conn_safe()?;
        Self::list_all_with_conn(&conn, include_deleted)
    }

    pub fn list_all_with_conn(conn: &Connection, include_deleted: bool) -> OrganizerResult<Vec<Mark>> {
        let predicate = (!include_deleted).then(|| exclude_soft_deleted("m.deleted"));
        Self::query_marks(conn, predicate.as_ref())
    }

    /// 列出回收站中的标记
    pub fn list_deleted(db: &OrganizerDatabase) -> OrganizerResult<Vec<Mark>> {
        let conn = db.get_conn_safe()?;
        Self::list_deleted_with_conn(&conn)
    }

    pub fn list_deleted_with_conn(conn: &Connection) -> OrganizerResult<Vec<Mark>> {
        Self::query_marks(conn, Some(&equals("m.deleted", true)))
    }

    /// 获取标记（包含已删除的）
    pub fn get_mark(db: &OrganizerDatabase, mark_id: &str) -> OrganizerResult<Mark> {
        let conn = db.get_conn_safe()?;
        Self::get_mark_with_conn(&conn, mark_id)
    }

    pub fn get_mark_with_conn(conn: &Connection, mark_id: &str) -> OrganizerResult<Mark> {
        let sql = format!("{} WHERE m.id = ?1", MARK_SELECT);
        conn.query_row(&sql, params![mark_id], Self::row_to_mark)
            .optional()?
            .ok_or_else(|| EntityKind::Mark.not_found(mark_id))
    }

    // ========================================================================
    // 写入
    // ========================================================================

    /// 创建标记（标签必须存在）
    pub fn create_mark(db: &OrganizerDatabase, params: &CreateMarkParams) -> OrganizerResult<Mark> {
        let conn = db.get_conn_safe()?;
        Self::create_mark_with_conn(&conn, params)
    }

    pub fn create_mark_with_conn(conn: &Connection, params: &CreateMarkParams) -> OrganizerResult<Mark> {
        with_transaction(conn, "organizer_mark_create_tx", |conn| {
            require_exists(conn, EntityKind::Tag, &params.tag_id)?;

            let mark_id = Mark::generate_id();
            let now = now_ms();
            conn.execute(
                r#"
                INSERT INTO marks (id, tag_id, type, content, url, description, deleted, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
                "#,
                params![
                    mark_id,
                    params.tag_id,
                    params.mark_type.as_str(),
                    params.content,
                    params.url,
                    params.desc,
                    now,
                ],
            )?;

            info!(
                "[Organizer::MarkRepo] Created {} mark {} under tag {}",
                params.mark_type, mark_id, params.tag_id
            );

            Ok(Mark {
                id: mark_id,
                tag_id: params.tag_id.clone(),
                mark_type: params.mark_type,
                content: params.content.clone(),
                url: params.url.clone(),
                desc: params.desc.clone(),
                deleted: false,
                created_at: now,
            })
        })
    }

    /// 更新标记（回收站中的标记不可更新；改挂的新标签必须存在）
    pub fn update_mark(
        db: &OrganizerDatabase,
        mark_id: &str,
        update: &UpdateMarkParams,
    ) -> OrganizerResult<Mark> {
        let conn = db.get_conn_safe()?;
        Self::update_mark_with_conn(&conn, mark_id, update)
    }

    pub fn update_mark_with_conn(
        conn: &Connection,
        mark_id: &str,
        update: &UpdateMarkParams,
    ) -> OrganizerResult<Mark> {
        with_transaction(conn, "organizer_mark_update_tx", |conn| {
            let current = Self::get_mark_with_conn(conn, mark_id)?;
            if current.deleted {
                return Err(EntityKind::Mark.not_found(mark_id));
            }

            if let Some(tag_id) = &update.tag_id {
                require_exists(conn, EntityKind::Tag, tag_id)?;
            }
            let tag_id = update.tag_id.clone().unwrap_or(current.tag_id);
            let mark_type = update.mark_type.unwrap_or(current.mark_type);
            let content = update.content.clone().unwrap_or(current.content);
            let url = update.url.clone().unwrap_or(current.url);
            let desc = update.desc.clone().unwrap_or(current.desc);

            conn.execute(
                r#"
                UPDATE marks SET tag_id = ?1, type = ?2, content = ?3, url = ?4, description = ?5
                WHERE id = ?6
                "#,
                params![tag_id, mark_type.as_str(), content, url, desc, mark_id],
            )?;

            info!("[Organizer::MarkRepo] Updated mark: {}", mark_id);
            Self::get_mark_with_conn(conn, mark_id)
        })
    }

    // ========================================================================
    // 回收站
    // ========================================================================

    /// 软删除标记（已删除时直接返回成功）
    pub fn soft_delete_mark(db: &OrganizerDatabase, mark_id: &str) -> OrganizerResult<DeletedId> {
        let conn = db.get_conn_safe()?;
        Self::soft_delete_mark_with_conn(&conn, mark_id)
    }

    pub fn soft_delete_mark_with_conn(conn: &Connection, mark_id: &str) -> OrganizerResult<DeletedId> {
        if deleted_state(conn, EntityKind::Mark, mark_id)?.is_none() {
            return Err(EntityKind::Mark.not_found(mark_id));
        }
        conn.execute(
            "UPDATE marks SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![mark_id],
        )?;
        info!("[Organizer::MarkRepo] Soft deleted mark: {}", mark_id);
        Ok(DeletedId::new(mark_id))
    }

    /// 从回收站恢复标记
    pub fn restore_mark(db: &OrganizerDatabase, mark_id: &str) -> OrganizerResult<Mark> {
        let conn = db.get_conn_safe()?;
        Self::restore_mark_with_conn(&conn, mark_id)
    }

    pub fn restore_mark_with_conn(conn: &Connection, mark_id: &str) -> OrganizerResult<Mark> {
        match deleted_state(conn, EntityKind::Mark, mark_id)? {
            None => return Err(EntityKind::Mark.not_found(mark_id)),
            Some(false) => return Err(OrganizerError::not_deleted("Mark", mark_id)),
            Some(true) => {}
        }
        conn.execute("UPDATE marks SET deleted = 0 WHERE id = ?1", params![mark_id])?;
        info!("[Organizer::MarkRepo] Restored mark: {}", mark_id);
        Self::get_mark_with_conn(conn, mark_id)
    }

    /// 永久删除标记
    pub fn permanent_delete_mark(db: &OrganizerDatabase, mark_id: &str) -> OrganizerResult<DeletedId> {
        let conn = db.get_conn_safe()?;
        Self::permanent_delete_mark_with_conn(&conn, mark_id)
    }

    pub fn permanent_delete_mark_with_conn(
        conn: &Connection,
        mark_id: &str,
    ) -> OrganizerResult<DeletedId> {
        let affected = conn.execute("DELETE FROM marks WHERE id = ?1", params![mark_id])?;
        if affected == 0 {
            return Err(EntityKind::Mark.not_found(mark_id));
        }
        info!("[Organizer::MarkRepo] Permanently deleted mark: {}", mark_id);
        Ok(DeletedId::new(mark_id))
    }

    /// 清空标记回收站
    pub fn clear_trash(db: &OrganizerDatabase) -> OrganizerResult<ClearTrashResult> {
        let conn = db.get_conn_safe()?;
        Self::clear_trash_with_conn(&conn)
    }

    pub fn clear_trash_with_conn(conn: &Connection) -> OrganizerResult<ClearTrashResult> {
        let deleted_count = conn.execute("DELETE FROM marks WHERE deleted = 1", [])?;
        info!("[Organizer::MarkRepo] Cleared {} marks from trash", deleted_count);
        Ok(ClearTrashResult { deleted_count })
    }
}

// ============================================================================
// 单元测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organizer::repos::TagRepo;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn setup_test_db() -> (TempDir, OrganizerDatabase) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = OrganizerDatabase::new(temp_dir.path()).expect("Failed to create database");
        (temp_dir, db)
    }

    fn text_mark(tag_id: &str, content: &str) -> CreateMarkParams {
        CreateMarkParams {
            tag_id: tag_id.to_string(),
            mark_type: MarkType::Text,
            content: Some(content.to_string()),
            url: None,
            desc: None,
        }
    }

    #[test]
    fn test_create_requires_tag() {
        let (_temp_dir, db) = setup_test_db();

        assert_matches!(
            MarkRepo::create_mark(&db, &text_mark("tag_missing", "x")),
            Err(OrganizerError::NotFound { ref resource_type, .. }) if resource_type == "Tag"
        );

        let tag = TagRepo::create_tag(&db, "t", None).unwrap();
        let mark = MarkRepo::create_mark(&db, &text_mark(&tag.id, "x")).unwrap();
        assert!(mark.id.starts_with("mark_"));
        assert_eq!(MarkRepo::get_mark(&db, &mark.id).unwrap(), mark);
    }

    #[test]
    fn test_list_by_tag_in_creation_order() {
        let (_temp_dir, db) = setup_test_db();

        let t1 = TagRepo::create_tag(&db, "t1", None).unwrap();
        let t2 = TagRepo::create_tag(&db, "t2", None).unwrap();
        let first = MarkRepo::create_mark(&db, &text_mark(&t1.id, "first")).unwrap();
        let second = MarkRepo::create_mark(&db, &text_mark(&t1.id, "second")).unwrap();
        MarkRepo::create_mark(&db, &text_mark(&t2.id, "other")).unwrap();

        let marks = MarkRepo::list_by_tag(&db, &t1.id).unwrap();
        let ids: Vec<_> = marks.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);

        MarkRepo::soft_delete_mark(&db, &first.id).unwrap();
        assert_eq!(MarkRepo::list_by_tag(&db, &t1.id).unwrap().len(), 1);
        assert_eq!(MarkRepo::list_all(&db, false).unwrap().len(), 2);
        assert_eq!(MarkRepo::list_all(&db, true).unwrap().len(), 3);
    }

    #[test]
    fn test_update_mark() {
        let (_temp_dir, db) = setup_test_db();

        let t1 = TagRepo::create_tag(&db, "t1", None).unwrap();
        let t2 = TagRepo::create_tag(&db, "t2", None).unwrap();
        let mark = MarkRepo::create_mark(&db, &text_mark(&t1.id, "x")).unwrap();

        let update = UpdateMarkParams {
            tag_id: Some(t2.id.clone()),
            mark_type: Some(MarkType::Link),
            url: Some(Some("https://example.com".to_string())),
            content: Some(None),
            ..Default::default()
        };
        let updated = MarkRepo::update_mark(&db, &mark.id, &update).unwrap();
        assert_eq!(updated.tag_id, t2.id);
        assert_eq!(updated.mark_type, MarkType::Link);
        assert_eq!(updated.content, None);
        assert_eq!(updated.created_at, mark.created_at);

        let bad = UpdateMarkParams {
            tag_id: Some("tag_missing".to_string()),
            ..Default::default()
        };
        assert_matches!(
            MarkRepo::update_mark(&db, &mark.id, &bad),
            Err(OrganizerError::NotFound { .. })
        );
    }

    #[test]
    fn test_trash_lifecycle() {
        let (_temp_dir, db) = setup_test_db();

        let tag = TagRepo::create_tag(&db, "t", None).unwrap();
        let m1 = MarkRepo::create_mark(&db, &text_mark(&tag.id, "1")).unwrap();
        let m2 = MarkRepo::create_mark(&db, &text_mark(&tag.id, "2")).unwrap();

        assert_matches!(
            MarkRepo::restore_mark(&db, &m1.id),
            Err(OrganizerError::NotDeleted { .. })
        );

        MarkRepo::soft_delete_mark(&db, &m1.id).unwrap();
        MarkRepo::soft_delete_mark(&db, &m2.id).unwrap();
        assert_eq!(MarkRepo::list_deleted(&db).unwrap().len(), 2);

        let restored = MarkRepo::restore_mark(&db, &m1.id).unwrap();
        assert!(!restored.deleted);

        assert_eq!(MarkRepo::clear_trash(&db).unwrap().deleted_count, 1);
        assert_matches!(
            MarkRepo::get_mark(&db, &m2.id),
            Err(OrganizerError::NotFound { .. })
        );

        MarkRepo::permanent_delete_mark(&db, &m1.id).unwrap();
        assert_matches!(
            MarkRepo::permanent_delete_mark(&db, &m1.id),
            Err(OrganizerError::NotFound { .. })
        );
        assert_eq!(MarkRepo::clear_trash(&db).unwrap().deleted_count, 0);
    }

    #[test]
    fn test_soft_delete_restore_round_trip() {
        let (_temp_dir, db) = setup_test_db();

        let tag = TagRepo::create_tag(&db, "t", None).unwrap();
        let mark = MarkRepo::create_mark(
            &db,
            &CreateMarkParams {
                tag_id: tag.id.clone(),
                mark_type: MarkType::Link,
                content: Some("title".to_string()),
                url: Some("https://example.com/page".to_string()),
                desc: Some("bookmark".to_string()),
            },
        )
        .unwrap();

        MarkRepo::soft_delete_mark(&db, &mark.id).unwrap();
        {
            let conn = db.get_conn().unwrap();
            let trashed = with_transaction(&conn, "test_mark_trash_tx", |conn| {
                MarkRepo::list_deleted_with_conn(conn)
            })
            .unwrap();
            assert_eq!(trashed.len(), 1);
            assert_eq!(
                trashed[0],
                Mark {
                    deleted: true,
                    ..mark.clone()
                }
            );
        }

        let restored = MarkRepo::restore_mark(&db, &mark.id).unwrap();
        assert_eq!(restored, mark);
    }
}
