//! 文件夹表 CRUD 操作
//!
//! 文件夹构成一棵（森林形式的）层级树，`parent_id = NULL` 表示根级。
//!
//! ## 结构约束
//! - 父子关系无环，移动时在写入所在的事务内检查
//! - 未删除的文件夹只能挂在未删除的文件夹下
//! - 仍有未删除子文件夹或笔记的文件夹不能删除（软删除与永久删除都检查）
//! - 恢复时若父文件夹不存在或已在回收站，移到根级

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use tracing::{debug, info, warn};

use super::base::{deleted_state, now_ms, require_exists, with_transaction, EntityKind};
use crate::organizer::database::OrganizerDatabase;
use crate::organizer::error::{OrganizerError, OrganizerResult};
use crate::organizer::predicate::{equals, exclude_soft_deleted, where_clause, Predicate};
use crate::organizer::types::{
    CreateFolderParams, DeletedId, Folder, FolderTreeNode, UpdateFolderParams,
};

/// 文件夹查询列（note_count 只统计未删除的笔记）
const FOLDER_SELECT: &str = "SELECT f.id, f.name, f.parent_id, f.color, f.icon, f.is_deleted, \
     f.sort_order, f.created_at, f.updated_at, \
     (SELECT COUNT(*) FROM notes n WHERE n.folder_id = f.id AND n.is_deleted = 0) AS note_count \
     FROM folders f";

/// 文件夹表 Repo
pub struct FolderRepo;

impl FolderRepo {
    fn row_to_folder(row: &Row) -> rusqlite::Result<Folder> {
        Ok(Folder {
            id: row.get(0)?,
            name: row.get(1)?,
            parent_id: row.get(2)?,
            color: row.get(3)?,
            icon: row.get(4)?,
            is_deleted: row.get(5)?,
            sort_order: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            note_count: row.get::<_, i64>(9)? as u32,
        })
    }

    fn query_folders(
        conn: &Connection,
        predicate: &Predicate,
        order_by: &str,
    ) -> OrganizerResult<Vec<Folder>> {
        let mut values = Vec::new();
        let sql = format!(
            "{}{} ORDER BY {}",
            FOLDER_SELECT,
            where_clause(Some(predicate), &mut values),
            order_by
        );
        let bind: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();

        let mut stmt = conn.prepare(&sql)?;
        let folders = stmt
            .query_map(bind.as_slice(), Self::row_to_folder)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 列出未删除的文件夹（按 sort_order、created_at 排序）
    pub fn list_folders(db: &OrganizerDatabase) -> OrganizerResult<Vec<Folder>> {
        let conn = db.get_conn_safe()?;
        Self::list_folders_with_conn(&conn)
    }

    /// 列出未删除的文件夹（使用现有连接）
    pub fn list_folders_with_conn(conn: &Connection) -> OrganizerResult<Vec<Folder>> {
        let folders = Self::query_folders(
            conn,
            &exclude_soft_deleted("f.is_deleted"),
            "f.sort_order ASC, f.created_at ASC, f.rowid ASC",
        )?;
        debug!("[Organizer::FolderRepo] Listed {} folders", folders.len());
        Ok(folders)
    }

    /// 列出回收站中的文件夹（最近删除的在前）
    pub fn list_deleted_folders(db: &OrganizerDatabase) -> OrganizerResult<Vec<Folder>> {
        let conn = db.get_conn_safe()?;
        Self::list_deleted_folders_with_conn(&conn)
    }

    pub fn list_deleted_folders_with_conn(conn: &Connection) -> OrganizerResult<Vec<Folder>> {
        Self::query_folders(
            conn,
            &equals("f.is_deleted", true),
            "f.updated_at DESC, f.rowid ASC",
        )
    }

    /// 获取文件夹（包含已删除的）
    pub fn get_folder(db: &OrganizerDatabase, folder_id: &str) -> OrganizerResult<Folder> {
        let conn = db.get_conn_safe()?;
        Self::get_folder_with_conn(&conn, folder_id)
    }

    /// 获取文件夹（使用现有连接）
    pub fn get_folder_with_conn(conn: &Connection, folder_id: &str) -> OrganizerResult<Folder> {
        let sql = format!("{} WHERE f.id = ?1", FOLDER_SELECT);
        conn.query_row(&sql, params![folder_id], Self::row_to_folder)
            .optional()?
            .ok_or_else(|| EntityKind::Folder.not_found(folder_id))
    }

    /// 父文件夹是否可用（存在且未删除）
    pub fn is_valid_parent_with_conn(conn: &Connection, parent_id: &str) -> OrganizerResult<bool> {
        Ok(deleted_state(conn, EntityKind::Folder, parent_id)? == Some(false))
    }

    fn parent_of(conn: &Connection, folder_id: &str) -> OrganizerResult<Option<Option<String>>> {
        Ok(conn
            .query_row(
                "SELECT parent_id FROM folders WHERE id = ?1",
                params![folder_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?)
    }

    fn require_valid_parent(conn: &Connection, parent_id: &str) -> OrganizerResult<()> {
        let reason = match deleted_state(conn, EntityKind::Folder, parent_id)? {
            Some(false) => return Ok(()),
            Some(true) => "parent folder is in the trash",
            None => "parent folder does not exist",
        };
        Err(OrganizerError::InvalidParent {
            folder_id: parent_id.to_string(),
            reason: reason.to_string(),
        })
    }

    /// 将 `folder_id` 移到 `new_parent_id` 下是否会形成环
    ///
    /// 两者相同时为真；否则从 `new_parent_id` 沿 parent_id 向上走，
    /// 遇到 `folder_id` 或重复访问的节点为真，走到根级为假。
    pub fn would_create_cycle(
        db: &OrganizerDatabase,
        folder_id: &str,
        new_parent_id: &str,
    ) -> OrganizerResult<bool> {
        let conn = db.get_conn_safe()?;
        Self::would_create_cycle_with_conn(&conn, folder_id, new_parent_id)
    }

    pub fn would_create_cycle_with_conn(
        conn: &Connection,
        folder_id: &str,
        new_parent_id: &str,
    ) -> OrganizerResult<bool> {
        if folder_id == new_parent_id {
            return Ok(true);
        }

        let mut visited = HashSet::new();
        let mut current = Some(new_parent_id.to_string());
        while let Some(id) = current {
            if id == folder_id {
                return Ok(true);
            }
            if !visited.insert(id.clone()) {
                warn!(
                    "[Organizer::FolderRepo] Existing cycle detected while walking from {}",
                    new_parent_id
                );
                return Ok(true);
            }
            current = Self::parent_of(conn, &id)?.flatten();
        }
        Ok(false)
    }

    fn count_active_children(conn: &Connection, folder_id: &str) -> OrganizerResult<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM folders WHERE parent_id = ?1 AND is_deleted = 0",
            params![folder_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_active_notes(conn: &Connection, folder_id: &str) -> OrganizerResult<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE folder_id = ?1 AND is_deleted = 0",
            params![folder_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 删除前检查：不能有未删除的子文件夹或笔记
    fn check_delete_guards(conn: &Connection, folder_id: &str) -> OrganizerResult<()> {
        let children = Self::count_active_children(conn, folder_id)?;
        if children > 0 {
            return Err(OrganizerError::HasChildren {
                folder_id: folder_id.to_string(),
                count: children,
            });
        }
        let notes = Self::count_active_notes(conn, folder_id)?;
        if notes > 0 {
            return Err(OrganizerError::HasNotes {
                folder_id: folder_id.to_string(),
                count: notes,
            });
        }
        Ok(())
    }

    // ========================================================================
    // 创建 / 更新
    // ========================================================================

    /// 创建文件夹
    pub fn create_folder(
        db: &OrganizerDatabase,
        params: &CreateFolderParams,
    ) -> OrganizerResult<Folder> {
        let conn = db.get_conn_safe()?;
        Self::create_folder_with_conn(&conn, params)
    }

    /// 创建文件夹（使用现有连接）
    pub fn create_folder_with_conn(
        conn: &Connection,
        params: &CreateFolderParams,
    ) -> OrganizerResult<Folder> {
        with_transaction(conn, "organizer_folder_create_tx", |conn| {
            if let Some(parent_id) = params.parent_id.as_deref() {
                Self::require_valid_parent(conn, parent_id)?;
            }

            let folder_id = Folder::generate_id();
            let now = now_ms();
            conn.execute(
                r#"
                INSERT INTO folders (id, parent_id, name, color, icon, is_deleted, sort_order, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7)
                "#,
                params![
                    folder_id,
                    params.parent_id,
                    params.name,
                    params.color,
                    params.icon,
                    now,
                    now,
                ],
            )?;

            info!(
                "[Organizer::FolderRepo] Created folder: {} (parent: {:?})",
                folder_id, params.parent_id
            );

            Ok(Folder {
                id: folder_id,
                name: params.name.clone(),
                parent_id: params.parent_id.clone(),
                color: params.color.clone(),
                icon: params.icon.clone(),
                is_deleted: false,
                sort_order: 0,
                note_count: 0,
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// 更新文件夹
    ///
    /// 修改 parent_id 时，父文件夹有效性与环检查和写入在同一事务内完成。
    pub fn update_folder(
        db: &OrganizerDatabase,
        folder_id: &str,
        update: &UpdateFolderParams,
    ) -> OrganizerResult<Folder> {
        let conn = db.get_conn_safe()?;
        Self::update_folder_with_conn(&conn, folder_id, update)
    }

    /// 更新文件夹（使用现有连接）
    pub fn update_folder_with_conn(
        conn: &Connection,
        folder_id: &str,
        update: &UpdateFolderParams,
    ) -> OrganizerResult<Folder> {
        with_transaction(conn, "organizer_folder_update_tx", |conn| {
            let current = Self::get_folder_with_conn(conn, folder_id)?;
            if current.is_deleted {
                return Err(EntityKind::Folder.not_found(folder_id));
            }

            let parent_id = match &update.parent_id {
                Some(Some(new_parent)) => {
                    Self::require_valid_parent(conn, new_parent)?;
                    if Self::would_create_cycle_with_conn(conn, folder_id, new_parent)? {
                        return Err(OrganizerError::CycleDetected {
                            folder_id: folder_id.to_string(),
                            parent_id: new_parent.clone(),
                        });
                    }
                    Some(new_parent.clone())
                }
                Some(None) => None,
                None => current.parent_id.clone(),
            };
            let name = update.name.clone().unwrap_or(current.name);
            let color = update.color.clone().unwrap_or(current.color);
            let icon = update.icon.clone().unwrap_or(current.icon);
            let sort_order = update.sort_order.unwrap_or(current.sort_order);

            conn.execute(
                r#"
                UPDATE folders
                SET name = ?1, parent_id = ?2, color = ?3, icon = ?4, sort_order = ?5, updated_at = ?6
                WHERE id = ?7
                "#,
                params![name, parent_id, color, icon, sort_order, now_ms(), folder_id],
            )?;

            info!("[Organizer::FolderRepo] Updated folder: {}", folder_id);
            Self::get_folder_with_conn(conn, folder_id)
        })
    }

    /// 重新排列同级文件夹：`sort_order` 设为在 `folder_ids` 中的位置
    pub fn reorder_folders(db: &OrganizerDatabase, folder_ids: &[String]) -> OrganizerResult<()> {
        let conn = db.get_conn_safe()?;
        Self::reorder_folders_with_conn(&conn, folder_ids)
    }

    pub fn reorder_folders_with_conn(conn: &Connection, folder_ids: &[String]) -> OrganizerResult<()> {
        with_transaction(conn, "organizer_folder_reorder_tx", |conn| {
            let now = now_ms();
            let mut stmt = conn.prepare(
                "UPDATE folders SET sort_order = ?1, updated_at = ?2 WHERE id = ?3 AND is_deleted = 0",
            )?;
            for (position, folder_id) in folder_ids.iter().enumerate() {
                let affected = stmt.execute(params![position as i64, now, folder_id])?;
                if affected == 0 {
                    return Err(EntityKind::Folder.not_found(folder_id));
                }
            }
            info!(
                "[Organizer::FolderRepo] Reordered {} folders",
                folder_ids.len()
            );
            Ok(())
        })
    }

    // ========================================================================
    // 删除 / 恢复
    // ========================================================================

    /// 软删除文件夹（移入回收站）
    ///
    /// 已在回收站中的文件夹直接返回成功。
    pub fn soft_delete_folder(db: &OrganizerDatabase, folder_id: &str) -> OrganizerResult<DeletedId> {
        let conn = db.get_conn_safe()?;
        Self::soft_delete_folder_with_conn(&conn, folder_id)
    }

    /// 软删除文件夹（使用现有连接）
    pub fn soft_delete_folder_with_conn(
        conn: &Connection,
        folder_id: &str,
    ) -> OrganizerResult<DeletedId> {
        with_transaction(conn, "organizer_folder_delete_tx", |conn| {
            match deleted_state(conn, EntityKind::Folder, folder_id)? {
                None => return Err(EntityKind::Folder.not_found(folder_id)),
                Some(true) => {
                    info!(
                        "[Organizer::FolderRepo] Folder already deleted (idempotent): {}",
                        folder_id
                    );
                    return Ok(DeletedId::new(folder_id));
                }
                Some(false) => {}
            }

            Self::check_delete_guards(conn, folder_id)?;

            conn.execute(
                "UPDATE folders SET is_deleted = 1, updated_at = ?1 WHERE id = ?2",
                params![now_ms(), folder_id],
            )?;

            info!("[Organizer::FolderRepo] Soft deleted folder: {}", folder_id);
            Ok(DeletedId::new(folder_id))
        })
    }

    /// 从回收站恢复文件夹
    ///
    /// 父文件夹不存在或仍在回收站时移到根级。
    pub fn restore_folder(db: &OrganizerDatabase, folder_id: &str) -> OrganizerResult<Folder> {
        let conn = db.get_conn_safe()?;
        Self::restore_folder_with_conn(&conn, folder_id)
    }

    /// 恢复文件夹（使用现有连接）
    pub fn restore_folder_with_conn(conn: &Connection, folder_id: &str) -> OrganizerResult<Folder> {
        with_transaction(conn, "organizer_folder_restore_tx", |conn| {
            let folder = Self::get_folder_with_conn(conn, folder_id)?;
            if !folder.is_deleted {
                return Err(OrganizerError::not_deleted("Folder", folder_id));
            }

            let parent_id = match folder.parent_id {
                Some(parent_id) if !Self::is_valid_parent_with_conn(conn, &parent_id)? => {
                    warn!(
                        "[Organizer::FolderRepo] Parent {} of restored folder {} is unavailable, moved to root",
                        parent_id, folder_id
                    );
                    None
                }
                other => other,
            };

            conn.execute(
                "UPDATE folders SET is_deleted = 0, parent_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![parent_id, now_ms(), folder_id],
            )?;

            info!("[Organizer::FolderRepo] Restored folder: {}", folder_id);
            Self::get_folder_with_conn(conn, folder_id)
        })
    }

    /// 永久删除文件夹
    ///
    /// 与软删除相同的检查；回收站中的子文件夹和笔记被移到根级。
    pub fn permanent_delete_folder(
        db: &OrganizerDatabase,
        folder_id: &str,
    ) -> OrganizerResult<DeletedId> {
        let conn = db.get_conn_safe()?;
        Self::permanent_delete_folder_with_conn(&conn, folder_id)
    }

    /// 永久删除文件夹（使用现有连接）
    pub fn permanent_delete_folder_with_conn(
        conn: &Connection,
        folder_id: &str,
    ) -> OrganizerResult<DeletedId> {
        with_transaction(conn, "organizer_folder_purge_tx", |conn| {
            require_exists(conn, EntityKind::Folder, folder_id)?;
            Self::check_delete_guards(conn, folder_id)?;

            let children = conn.execute(
                "UPDATE folders SET parent_id = NULL WHERE parent_id = ?1",
                params![folder_id],
            )?;
            let notes = conn.execute(
                "UPDATE notes SET folder_id = NULL WHERE folder_id = ?1",
                params![folder_id],
            )?;
            conn.execute("DELETE FROM folders WHERE id = ?1", params![folder_id])?;

            info!(
                "[Organizer::FolderRepo] Permanently deleted folder: {} (detached {} folders, {} notes)",
                folder_id, children, notes
            );
            Ok(DeletedId::new(folder_id))
        })
    }

    // ========================================================================
    // 树与祖先链
    // ========================================================================

    /// 构建未删除文件夹的树
    ///
    /// 父文件夹无法解析（不存在或已删除）的文件夹作为根节点；
    /// 同级节点按 sort_order 排序。
    pub fn get_folder_tree(db: &OrganizerDatabase) -> OrganizerResult<Vec<FolderTreeNode>> {
        let conn = db.get_conn_safe()?;
        Self::get_folder_tree_with_conn(&conn)
    }

    pub fn get_folder_tree_with_conn(conn: &Connection) -> OrganizerResult<Vec<FolderTreeNode>> {
        let folders = Self::list_folders_with_conn(conn)?;
        Ok(build_tree(folders))
    }

    /// 祖先 ID 列表（最近的父文件夹在前，不含自身）
    pub fn get_ancestor_ids(db: &OrganizerDatabase, folder_id: &str) -> OrganizerResult<Vec<String>> {
        let conn = db.get_conn_safe()?;
        Self::get_ancestor_ids_with_conn(&conn, folder_id)
    }

    pub fn get_ancestor_ids_with_conn(
        conn: &Connection,
        folder_id: &str,
    ) -> OrganizerResult<Vec<String>> {
        let mut current = Self::parent_of(conn, folder_id)?
            .ok_or_else(|| EntityKind::Folder.not_found(folder_id))?;

        let mut visited = HashSet::from([folder_id.to_string()]);
        let mut ancestors = Vec::new();
        while let Some(id) = current {
            if !visited.insert(id.clone()) {
                warn!(
                    "[Organizer::FolderRepo] Cycle in ancestor chain of {} at {}",
                    folder_id, id
                );
                break;
            }
            current = Self::parent_of(conn, &id)?.flatten();
            ancestors.push(id);
        }
        Ok(ancestors)
    }
}

/// 两遍组装：先按父 ID 分组，再从根递归挂载子节点
fn build_tree(folders: Vec<Folder>) -> Vec<FolderTreeNode> {
    let known: HashSet<String> = folders.iter().map(|f| f.id.clone()).collect();
    let order: Vec<String> = folders.iter().map(|f| f.id.clone()).collect();

    let mut roots = Vec::new();
    let mut children: HashMap<String, Vec<Folder>> = HashMap::new();
    for folder in folders {
        match folder.parent_id.as_deref() {
            Some(parent_id) if known.contains(parent_id) => {
                children.entry(parent_id.to_string()).or_default().push(folder);
            }
            Some(parent_id) => {
                debug!(
                    "[Organizer::FolderRepo] Folder {} has unresolved parent {}, treated as root",
                    folder.id, parent_id
                );
                roots.push(folder);
            }
            None => roots.push(folder),
        }
    }

    let mut visited = HashSet::new();
    let mut tree: Vec<FolderTreeNode> = roots
        .into_iter()
        .map(|folder| attach_children(folder, &mut children, &mut visited))
        .collect();

    // 只有父链成环时才会有未挂载的节点
    for id in order {
        if visited.contains(&id) {
            continue;
        }
        let stranded = children
            .values_mut()
            .find_map(|list| list.iter().position(|f| f.id == id).map(|i| list.remove(i)));
        if let Some(folder) = stranded {
            warn!(
                "[Organizer::FolderRepo] Folder {} is part of a parent cycle, treated as root",
                folder.id
            );
            tree.push(attach_children(folder, &mut children, &mut visited));
        }
    }

    tree.sort_by_key(|node| node.folder.sort_order);
    tree
}

fn attach_children(
    folder: Folder,
    children: &mut HashMap<String, Vec<Folder>>,
    visited: &mut HashSet<String>,
) -> FolderTreeNode {
    visited.insert(folder.id.clone());
    let mut node = FolderTreeNode::new(folder);

    let kids = children.remove(&node.folder.id).unwrap_or_default();
    for child in kids {
        if visited.contains(&child.id) {
            continue;
        }
        node.children.push(attach_children(child, children, visited));
    }
    node.children.sort_by_key(|c| c.folder.sort_order);
    node
}

// ============================================================================
// 单元测试
// ============================================================================
