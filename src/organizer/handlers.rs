//! Organizer 操作入口
//!
//! `Organizer` 在进程启动时显式创建并以引用传递。每个写操作先经过
//! [`validation`](super::validation) 校验，再交给对应的 Repo；
//! Repo 自身仍负责结构约束（环检测、删除保护、唯一性等）。

use tracing::{debug, info};

use super::database::{OrganizerDatabase, OrganizerDatabaseStats};
use super::error::OrganizerResult;
use super::repos::base::with_transaction;
use super::repos::{EntityKind, FolderRepo, MarkRepo, NoteRepo, TagRepo};
use super::types::{
    CleanupResult, ClearTrashResult, CreateFolderParams, CreateMarkParams, CreateNoteParams,
    DeletedId, Folder, FolderTreeNode, Mark, Note, NoteFilter, Tag, UpdateFolderParams,
    UpdateMarkParams, UpdateNoteParams, UpdateTagParams,
};
use super::validation;
use crate::config::OrganizerConfig;

/// 内容整理器操作句柄
pub struct Organizer {
    db: OrganizerDatabase,
}

impl Organizer {
    /// 按配置打开数据库（执行迁移）
    pub fn open(config: &OrganizerConfig) -> OrganizerResult<Self> {
        let db = OrganizerDatabase::open(config)?;
        info!(
            "[Organizer] Opened organizer at {}",
            db.db_path().display()
        );
        Ok(Self { db })
    }

    pub fn with_database(db: OrganizerDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &OrganizerDatabase {
        &self.db
    }

    pub fn get_statistics(&self) -> OrganizerResult<OrganizerDatabaseStats> {
        self.db.get_statistics()
    }

    // ========================================================================
    // 文件夹
    // ========================================================================

    pub fn list_folders(&self) -> OrganizerResult<Vec<Folder>> {
        FolderRepo::list_folders(&self.db)
    }

    pub fn list_deleted_folders(&self) -> OrganizerResult<Vec<Folder>> {
        FolderRepo::list_deleted_folders(&self.db)
    }

    pub fn get_folder(&self, folder_id: &str) -> OrganizerResult<Folder> {
        FolderRepo::get_folder(&self.db, folder_id)
    }

    pub fn create_folder(&self, params: &CreateFolderParams) -> OrganizerResult<Folder> {
        validation::validate_create_folder(params)?;
        FolderRepo::create_folder(&self.db, params)
    }

    pub fn update_folder(
        &self,
        folder_id: &str,
        update: &UpdateFolderParams,
    ) -> OrganizerResult<Folder> {
        validation::validate_update_folder(update)?;
        FolderRepo::update_folder(&self.db, folder_id, update)
    }

    pub fn reorder_folders(&self, folder_ids: &[String]) -> OrganizerResult<()> {
        FolderRepo::reorder_folders(&self.db, folder_ids)
    }

    pub fn soft_delete_folder(&self, folder_id: &str) -> OrganizerResult<DeletedId> {
        FolderRepo::soft_delete_folder(&self.db, folder_id)
    }

    pub fn restore_folder(&self, folder_id: &str) -> OrganizerResult<Folder> {
        FolderRepo::restore_folder(&self.db, folder_id)
    }

    pub fn permanent_delete_folder(&self, folder_id: &str) -> OrganizerResult<DeletedId> {
        FolderRepo::permanent_delete_folder(&self.db, folder_id)
    }

    pub fn get_folder_tree(&self) -> OrganizerResult<Vec<FolderTreeNode>> {
        FolderRepo::get_folder_tree(&self.db)
    }

    pub fn get_ancestor_ids(&self, folder_id: &str) -> OrganizerResult<Vec<String>> {
        FolderRepo::get_ancestor_ids(&self.db, folder_id)
    }

    // ========================================================================
    // 笔记
    // ========================================================================

    pub fn list_notes(&self, filter: &NoteFilter) -> OrganizerResult<Vec<Note>> {
        NoteRepo::list_notes(&self.db, filter)
    }

    pub fn list_deleted_notes(&self) -> OrganizerResult<Vec<Note>> {
        NoteRepo::list_deleted_notes(&self.db)
    }

    pub fn get_note(&self, note_id: &str, include_deleted: bool) -> OrganizerResult<Note> {
        NoteRepo::get_note(&self.db, note_id, include_deleted)
    }

    pub fn create_note(&self, params: &CreateNoteParams) -> OrganizerResult<Note> {
        validation::validate_create_note(params)?;
        NoteRepo::create_note(&self.db, params)
    }

    pub fn update_note(&self, note_id: &str, update: &UpdateNoteParams) -> OrganizerResult<Note> {
        validation::validate_update_note(update)?;
        NoteRepo::update_note(&self.db, note_id, update)
    }

    pub fn toggle_favorite(&self, note_id: &str) -> OrganizerResult<Note> {
        NoteRepo::toggle_favorite(&self.db, note_id)
    }

    pub fn soft_delete_note(&self, note_id: &str) -> OrganizerResult<DeletedId> {
        NoteRepo::soft_delete_note(&self.db, note_id)
    }

    pub fn restore_note(&self, note_id: &str) -> OrganizerResult<Note> {
        NoteRepo::restore_note(&self.db, note_id)
    }

    pub fn permanent_delete_note(&self, note_id: &str) -> OrganizerResult<DeletedId> {
        NoteRepo::permanent_delete_note(&self.db, note_id)
    }

    pub fn purge_deleted_notes(&self) -> OrganizerResult<usize> {
        NoteRepo::purge_deleted_notes(&self.db)
    }

    // ========================================================================
    // 标签
    // ========================================================================

    pub fn list_tags(&self, search: Option<&str>) -> OrganizerResult<Vec<Tag>> {
        TagRepo::list_tags(&self.db, search)
    }

    pub fn get_tag(&self, tag_id: &str) -> OrganizerResult<Tag> {
        TagRepo::get_tag(&self.db, tag_id)
    }

    pub fn create_tag(&self, name: &str, color: Option<&str>) -> OrganizerResult<Tag> {
        validation::validate_create_tag(name, color)?;
        TagRepo::create_tag(&self.db, name, color)
    }

    pub fn update_tag(&self, tag_id: &str, update: &UpdateTagParams) -> OrganizerResult<Tag> {
        validation::validate_update_tag(update)?;
        TagRepo::update_tag(&self.db, tag_id, update)
    }

    pub fn delete_tag(&self, tag_id: &str) -> OrganizerResult<DeletedId> {
        TagRepo::delete_tag(&self.db, tag_id)
    }

    pub fn find_unused_tags(&self) -> OrganizerResult<Vec<Tag>> {
        TagRepo::find_unused(&self.db)
    }

    pub fn find_most_used_tags(&self, limit: usize) -> OrganizerResult<Vec<Tag>> {
        validation::validate_most_used_limit(limit)?;
        TagRepo::find_most_used(&self.db, limit)
    }

    pub fn cleanup_unused_tags(&self) -> OrganizerResult<CleanupResult> {
        TagRepo::cleanup_unused(&self.db)
    }

    // ========================================================================
    // 标记
    // ========================================================================

    pub fn list_marks_by_tag(&self, tag_id: &str) -> OrganizerResult<Vec<Mark>> {
        MarkRepo::list_by_tag(&self.db, tag_id)
    }

    pub fn list_all_marks(&self, include_deleted: bool) -> OrganizerResult<Vec<Mark>> {
        MarkRepo::list_all(&self.db, include_deleted)
    }

    pub fn list_deleted_marks(&self) -> OrganizerResult<Vec<Mark>> {
        MarkRepo::list_deleted(&self.db)
    }

    pub fn get_mark(&self, mark_id: &str) -> OrganizerResult<Mark> {
        MarkRepo::get_mark(&self.db, mark_id)
    }

    pub fn create_mark(&self, params: &CreateMarkParams) -> OrganizerResult<Mark> {
        validation::validate_create_mark(params)?;
        MarkRepo::create_mark(&self.db, params)
    }

    /// 更新标记：跨字段规则作用于合并后的最终值
    ///
    /// 读取当前值、校验与写入在同一事务内完成。
    pub fn update_mark(&self, mark_id: &str, update: &UpdateMarkParams) -> OrganizerResult<Mark> {
        let conn = self.db.get_conn_safe()?;
        with_transaction(&conn, "organizer_mark_checked_update_tx", |conn| {
            let current = MarkRepo::get_mark_with_conn(conn, mark_id)?;
            if current.deleted {
                return Err(EntityKind::Mark.not_found(mark_id));
            }

            let mark_type = update.mark_type.unwrap_or(current.mark_type);
            let content = update.content.clone().unwrap_or(current.content);
            let url = update.url.clone().unwrap_or(current.url);
            validation::validate_mark_fields(mark_type, content.as_deref(), url.as_deref())?;

            debug!("[Organizer] Mark {} passed validation as {}", mark_id, mark_type);
            MarkRepo::update_mark_with_conn(conn, mark_id, update)
        })
    }

    pub fn soft_delete_mark(&self, mark_id: &str) -> OrganizerResult<DeletedId> {
        MarkRepo::soft_delete_mark(&self.db, mark_id)
    }

    pub fn restore_mark(&self, mark_id: &str) -> OrganizerResult<Mark> {
        MarkRepo::restore_mark(&self.db, mark_id)
    }

    pub fn permanent_delete_mark(&self, mark_id: &str) -> OrganizerResult<DeletedId> {
        MarkRepo::permanent_delete_mark(&self.db, mark_id)
    }

    pub fn clear_mark_trash(&self) -> OrganizerResult<ClearTrashResult> {
        MarkRepo::clear_trash(&self.db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organizer::error::OrganizerError;
    use crate::organizer::types::MarkType;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn setup_organizer() -> (TempDir, Organizer) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let organizer =
            Organizer::open(&OrganizerConfig::with_data_dir(temp_dir.path())).expect("open");
        (temp_dir, organizer)
    }

    #[test]
    fn test_validation_runs_before_store() {
        let (_temp_dir, organizer) = setup_organizer();

        assert_matches!(
            organizer.create_tag("", Some("blue")),
            Err(OrganizerError::ValidationFailed(ref e)) if e.violations().len() >= 2
        );
        assert_matches!(
            organizer.create_folder(&CreateFolderParams::default()),
            Err(OrganizerError::ValidationFailed(_))
        );
        assert_eq!(organizer.get_statistics().unwrap().tag_count, 0);
    }

    #[test]
    fn test_update_mark_validates_merged_fields() {
        let (_temp_dir, organizer) = setup_organizer();

        let tag = organizer.create_tag("links", None).unwrap();
        let mark = organizer
            .create_mark(&CreateMarkParams {
                tag_id: tag.id.clone(),
                mark_type: MarkType::Image,
                content: None,
                url: None,
                desc: Some("screenshot".to_string()),
            })
            .unwrap();

        // 改为 link 但没有 url
        let to_link = UpdateMarkParams {
            mark_type: Some(MarkType::Link),
            ..Default::default()
        };
        assert_matches!(
            organizer.update_mark(&mark.id, &to_link),
            Err(OrganizerError::ValidationFailed(ref e)) if e.has_field("url")
        );
        // 被拒绝的更新不落库
        assert_eq!(organizer.get_mark(&mark.id).unwrap(), mark);

        let with_url = UpdateMarkParams {
            mark_type: Some(MarkType::Link),
            url: Some(Some("https://example.com/a".to_string())),
            ..Default::default()
        };
        let updated = organizer.update_mark(&mark.id, &with_url).unwrap();
        assert_eq!(updated.mark_type, MarkType::Link);
        assert_eq!(updated.desc.as_deref(), Some("screenshot"));
    }

    #[test]
    fn test_most_used_limit_validated() {
        let (_temp_dir, organizer) = setup_organizer();
        assert_matches!(
            organizer.find_most_used_tags(0),
            Err(OrganizerError::ValidationFailed(_))
        );
        assert!(organizer.find_most_used_tags(5).unwrap().is_empty());
    }
}
