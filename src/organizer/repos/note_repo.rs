//! 笔记表 CRUD 操作
//!
//! 笔记与标签为多对多关系（`note_tags`）。`tag_ids` 是集合语义：
//! 更新时整体删除再插入，不做差异比较；读取时按 ID 排序返回。
//!
//! ## 核心方法
//! - `list_notes`: 按文件夹/搜索词过滤未删除的笔记（搜索匹配标题或内容）
//! - `create_note` / `update_note`: 文件夹与标签存在性检查 + 关联重写，在同一事务内完成
//! - `soft_delete_note` / `restore_note` / `permanent_delete_note`: 回收站生命周期
//! - `toggle_favorite`: 切换收藏状态

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use tracing::{debug, info};

use super::base::{deleted_state, now_ms, require_exists, with_transaction, EntityKind};
use crate::organizer::database::OrganizerDatabase;
use crate::organizer::error::{OrganizerError, OrganizerResult};
use crate::organizer::predicate::{
    combine_all, combine_any, equals, exclude_soft_deleted, substring, where_clause, Predicate,
};
use crate::organizer::types::{CreateNoteParams, DeletedId, Note, NoteFilter, UpdateNoteParams};

/// 笔记查询列（tag_ids 通过 LEFT JOIN + GROUP_CONCAT 聚合）
const NOTE_SELECT: &str = "SELECT n.id, n.title, n.content, n.folder_id, n.is_favorite, n.is_deleted, \
     n.created_at, n.updated_at, GROUP_CONCAT(nt.tag_id) AS tag_ids \
     FROM notes n LEFT JOIN note_tags nt ON nt.note_id = n.id";

/// 笔记表 Repo
pub struct NoteRepo;

impl NoteRepo {
    fn row_to_note(row: &Row) -> rusqlite::Result<Note> {
        let joined: Option<String> = row.get(8)?;
        let mut tag_ids: Vec<String> = joined
            .map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        tag_ids.sort();
        tag_ids.dedup();

        Ok(Note {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            folder_id: row.get(3)?,
            is_favorite: row.get(4)?,
            is_deleted: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            tag_ids,
        })
    }

    fn query_notes(
        conn: &Connection,
        predicate: Option<&Predicate>,
        order_by: &str,
    ) -> OrganizerResult<Vec<Note>> {
        let mut values = Vec::new();
        let sql = format!(
            "{}{} GROUP BY n.id ORDER BY {}",
            NOTE_SELECT,
            where_clause(predicate, &mut values),
            order_by
        );
        let bind: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();

        let mut stmt = conn.prepare(&sql)?;
        let notes = stmt
            .query_map(bind.as_slice(), Self::row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// 组装列表过滤条件
    fn filter_predicate(filter: &NoteFilter) -> Option<Predicate> {
        let search = filter.search.as_deref().and_then(|text| {
            combine_any(
                [substring("n.title", text), substring("n.content", text)]
                    .into_iter()
                    .flatten(),
            )
        });

        combine_all(
            [
                Some(exclude_soft_deleted("n.is_deleted")),
                filter
                    .folder_id
                    .as_deref()
                    .map(|folder_id| equals("n.folder_id", folder_id)),
                search,
            ]
            .into_iter()
            .flatten(),
        )
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 列出未删除的笔记（最近更新的在前）
    pub fn list_notes(db: &OrganizerDatabase, filter: &NoteFilter) -> OrganizerResult<Vec<Note>> {
        let conn = db.get_conn_safe()?;
        Self::list_notes_with_conn(&conn, filter)
    }

    /// 列出未删除的笔记（使用现有连接）
    pub fn list_notes_with_conn(conn: &Connection, filter: &NoteFilter) -> OrganizerResult<Vec<Note>> {
        let predicate = Self::filter_predicate(filter);
        let notes = Self::query_notes(
            conn,
            predicate.as_ref(),
            "n.updated_at DESC, n.rowid DESC",
        )?;
        debug!(
            "[Organizer::NoteRepo] Listed {} notes (folder: {:?}, search: {:?})",
            notes.len(),
            filter.folder_id,
            filter.search
        );
        Ok(notes)
    }

    /// 列出回收站中的笔记
    pub fn list_deleted_notes(db: &OrganizerDatabase) -> OrganizerResult<Vec<Note>> {
        let conn = db.get_conn_safe()?;
        Self::list_deleted_notes_with_conn(&conn)
    }

    pub fn list_deleted_notes_with_conn(conn: &Connection) -> OrganizerResult<Vec<Note>> {
        let predicate = equals("n.is_deleted", true);
        Self::query_notes(conn, Some(&predicate), "n.updated_at DESC, n.rowid DESC")
    }

    /// 获取笔记
    ///
    /// `include_deleted = false` 时回收站中的笔记视为不存在。
    pub fn get_note(
        db: &OrganizerDatabase,
        note_id: &str,
        include_deleted: bool,
    ) -> OrganizerResult<Note> {
        let conn = db.get_conn_safe()?;
        Self::get_note_with_conn(&conn, note_id, include_deleted)
    }

    /// 获取笔记（使用现有连接）
    pub fn get_note_with_conn(
        conn: &Connection,
        note_id: &str,
        include_deleted: bool,
    ) -> OrganizerResult<Note> {
        let predicate = combine_all(
            [
                Some(equals("n.id", note_id)),
                (!include_deleted).then(|| exclude_soft_deleted("n.is_deleted")),
            ]
            .into_iter()
            .flatten(),
        );
        let mut values = Vec::new();
        let sql = format!(
            "{}{} GROUP BY n.id",
            NOTE_SELECT,
            where_clause(predicate.as_ref(), &mut values)
        );
        let bind: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();

        conn.query_row(&sql, bind.as_slice(), Self::row_to_note)
            .optional()?
            .ok_or_else(|| EntityKind::Note.not_found(note_id))
    }

    // ========================================================================
    // 写入
    // ========================================================================

    /// 文件夹必须存在且未删除
    fn require_active_folder(conn: &Connection, folder_id: &str) -> OrganizerResult<()> {
        match deleted_state(conn, EntityKind::Folder, folder_id)? {
            Some(false) => Ok(()),
            _ => Err(EntityKind::Folder.not_found(folder_id)),
        }
    }

    /// 校验标签存在并去重（结果按 ID 排序）
    fn resolve_tag_ids(conn: &Connection, tag_ids: &[String]) -> OrganizerResult<Vec<String>> {
        let unique: BTreeSet<&String> = tag_ids.iter().collect();
        for tag_id in &unique {
            require_exists(conn, EntityKind::Tag, tag_id)?;
        }
        Ok(unique.into_iter().cloned().collect())
    }

    fn insert_tag_links(conn: &Connection, note_id: &str, tag_ids: &[String]) -> OrganizerResult<()> {
        let mut stmt = conn.prepare("INSERT INTO note_tags (note_id, tag_id) VALUES (?1, ?2)")?;
        for tag_id in tag_ids {
            stmt.execute(params![note_id, tag_id])?;
        }
        Ok(())
    }

    /// 创建笔记
    pub fn create_note(db: &OrganizerDatabase, params: &CreateNoteParams) -> OrganizerResult<Note> {
        let conn = db.get_conn_safe()?;
        Self::create_note_with_conn(&conn, params)
    }

    /// 创建笔记（使用现有连接）
    pub fn create_note_with_conn(conn: &Connection, params: &CreateNoteParams) -> OrganizerResult<Note> {
        with_transaction(conn, "organizer_note_create_tx", |conn| {
            if let Some(folder_id) = params.folder_id.as_deref() {
                Self::require_active_folder(conn, folder_id)?;
            }
            let tag_ids = Self::resolve_tag_ids(conn, &params.tag_ids)?;

            let note_id = Note::generate_id();
            let now = now_ms();
            conn.execute(
                r#"
                INSERT INTO notes (id, title, content, folder_id, is_favorite, is_deleted, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6)
                "#,
                params![note_id, params.title, params.content, params.folder_id, now, now],
            )?;
            Self::insert_tag_links(conn, &note_id, &tag_ids)?;

            info!(
                "[Organizer::NoteRepo] Created note: {} ({} tags)",
                note_id,
                tag_ids.len()
            );
            Self::get_note_with_conn(conn, &note_id, false)
        })
    }

    /// 更新笔记
    ///
    /// `tag_ids` 存在时整体替换关联集合，失败则整体回滚。
    pub fn update_note(
        db: &OrganizerDatabase,
        note_id: &str,
        update: &UpdateNoteParams,
    ) -> OrganizerResult<Note> {
        let conn = db.get_conn_safe()?;
        Self::update_note_with_conn(&conn, note_id, update)
    }

    /// 更新笔记（使用现有连接）
    pub fn update_note_with_conn(
        conn: &Connection,
        note_id: &str,
        update: &UpdateNoteParams,
    ) -> OrganizerResult<Note> {
        with_transaction(conn, "organizer_note_update_tx", |conn| {
            let current = Self::get_note_with_conn(conn, note_id, false)?;

            let folder_id = match &update.folder_id {
                Some(Some(folder_id)) => {
                    Self::require_active_folder(conn, folder_id)?;
                    Some(folder_id.clone())
                }
                Some(None) => None,
                None => current.folder_id,
            };
            let title = update.title.clone().unwrap_or(current.title);
            let content = update.content.clone().unwrap_or(current.content);
            let is_favorite = update.is_favorite.unwrap_or(current.is_favorite);

            conn.execute(
                r#"
                UPDATE notes
                SET title = ?1, content = ?2, folder_id = ?3, is_favorite = ?4, updated_at = ?5
                WHERE id = ?6
                "#,
                params![title, content, folder_id, is_favorite, now_ms(), note_id],
            )?;

            if let Some(requested) = &update.tag_ids {
                let tag_ids = Self::resolve_tag_ids(conn, requested)?;
                conn.execute("DELETE FROM note_tags WHERE note_id = ?1", params![note_id])?;
                Self::insert_tag_links(conn, note_id, &tag_ids)?;
                debug!(
                    "[Organizer::NoteRepo] Rewrote tags of {}: {:?}",
                    note_id, tag_ids
                );
            }

            info!("[Organizer::NoteRepo] Updated note: {}", note_id);
            Self::get_note_with_conn(conn, note_id, false)
        })
    }

    /// 切换收藏状态
    pub fn toggle_favorite(db: &OrganizerDatabase, note_id: &str) -> OrganizerResult<Note> {
        let conn = db.get_conn_safe()?;
        Self::toggle_favorite_with_conn(&conn, note_id)
    }

    pub fn toggle_favorite_with_conn(conn: &Connection, note_id: &str) -> OrganizerResult<Note> {
        let affected = conn.execute(
            "UPDATE notes SET is_favorite = 1 - is_favorite, updated_at = ?1 WHERE id = ?2 AND is_deleted = 0",
            params![now_ms(), note_id],
        )?;
        if affected == 0 {
            return Err(EntityKind::Note.not_found(note_id));
        }
        info!("[Organizer::NoteRepo] Toggled favorite: {}", note_id);
        Self::get_note_with_conn(conn, note_id, false)
    }

    // ========================================================================
    // 删除 / 恢复
    // ========================================================================

    /// 软删除笔记（标签关联保留）
    pub fn soft_delete_note(db: &OrganizerDatabase, note_id: &str) -> OrganizerResult<DeletedId> {
        let conn = db.get_conn_safe()?;
        Self::soft_delete_note_with_conn(&conn, note_id)
    }

    /// 软删除笔记（使用现有连接）
    pub fn soft_delete_note_with_conn(conn: &Connection, note_id: &str) -> OrganizerResult<DeletedId> {
        match deleted_state(conn, EntityKind::Note, note_id)? {
            None => Err(EntityKind::Note.not_found(note_id)),
            Some(true) => {
                info!(
                    "[Organizer::NoteRepo] Note already deleted (idempotent): {}",
                    note_id
                );
                Ok(DeletedId::new(note_id))
            }
            Some(false) => {
                conn.execute(
                    "UPDATE notes SET is_deleted = 1, updated_at = ?1 WHERE id = ?2",
                    params![now_ms(), note_id],
                )?;
                info!("[Organizer::NoteRepo] Soft deleted note: {}", note_id);
                Ok(DeletedId::new(note_id))
            }
        }
    }

    /// 从回收站恢复笔记（不重新校验 folder_id）
    pub fn restore_note(db: &OrganizerDatabase, note_id: &str) -> OrganizerResult<Note> {
        let conn = db.get_conn_safe()?;
        Self::restore_note_with_conn(&conn, note_id)
    }

    /// 恢复笔记（使用现有连接）
    pub fn restore_note_with_conn(conn: &Connection, note_id: &str) -> OrganizerResult<Note> {
        match deleted_state(conn, EntityKind::Note, note_id)? {
            None => return Err(EntityKind::Note.not_found(note_id)),
            Some(false) => return Err(OrganizerError::not_deleted("Note", note_id)),
            Some(true) => {}
        }
        conn.execute(
            "UPDATE notes SET is_deleted = 0, updated_at = ?1 WHERE id = ?2",
            params![now_ms(), note_id],
        )?;
        info!("[Organizer::NoteRepo] Restored note: {}", note_id);
        Self::get_note_with_conn(conn, note_id, false)
    }

    /// 永久删除笔记：先删除标签关联，再删除笔记
    pub fn permanent_delete_note(db: &OrganizerDatabase, note_id: &str) -> OrganizerResult<DeletedId> {
        let conn = db.get_conn_safe()?;
        Self::permanent_delete_note_with_conn(&conn, note_id)
    }

    /// 永久删除笔记（使用现有连接）
    pub fn permanent_delete_note_with_conn(
        conn: &Connection,
        note_id: &str,
    ) -> OrganizerResult<DeletedId> {
        with_transaction(conn, "organizer_note_purge_tx", |conn| {
            require_exists(conn, EntityKind::Note, note_id)?;
            conn.execute("DELETE FROM note_tags WHERE note_id = ?1", params![note_id])?;
            conn.execute("DELETE FROM notes WHERE id = ?1", params![note_id])?;
            info!("[Organizer::NoteRepo] Permanently deleted note: {}", note_id);
            Ok(DeletedId::new(note_id))
        })
    }

    /// 清空笔记回收站，返回删除的笔记数
    pub fn purge_deleted_notes(db: &OrganizerDatabase) -> OrganizerResult<usize> {
        let conn = db.get_conn_safe()?;
        Self::purge_deleted_notes_with_conn(&conn)
    }

    pub fn purge_deleted_notes_with_conn(conn: &Connection) -> OrganizerResult<usize> {
        with_transaction(conn, "organizer_note_purge_all_tx", |conn| {
            conn.execute(
                "DELETE FROM note_tags WHERE note_id IN (SELECT id FROM notes WHERE is_deleted = 1)",
                [],
            )?;
            let deleted = conn.execute("DELETE FROM notes WHERE is_deleted = 1", [])?;
            info!("[Organizer::NoteRepo] Purged {} deleted notes", deleted);
            Ok(deleted)
        })
    }
}

// ============================================================================
// 单元测试
// ============================================================================
