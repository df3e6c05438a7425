//! Organizer 核心类型定义
//!
//! 文件夹、笔记、标签、标记（Mark）四类实体及其参数/结果类型。
//! 所有时间戳均为毫秒级 Unix 时间戳。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// 文件夹
// ============================================================================

/// 文件夹（folders 表）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    /// 文件夹 ID（格式：`fld_{nanoid(10)}`）
    pub id: String,

    /// 名称（1-100 字符）
    pub name: String,

    /// 父文件夹 ID（None 表示根级）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// 可选颜色标识（对仓储层不透明）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// 可选图标标识（对仓储层不透明）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// 是否在回收站
    pub is_deleted: bool,

    /// 同级排序
    pub sort_order: i32,

    /// 文件夹内未删除的笔记数（派生字段）
    #[serde(default)]
    pub note_count: u32,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Folder {
    /// 生成文件夹 ID
    pub fn generate_id() -> String {
        format!("fld_{}", nanoid::nanoid!(10))
    }
}

/// 创建文件夹参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderParams {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

/// 更新文件夹参数
///
/// 外层 `None` 表示不修改；`Some(None)` 表示清空（`parent_id` 清空即移到根级）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFolderParams {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Option<String>>,
    #[serde(default)]
    pub color: Option<Option<String>>,
    #[serde(default)]
    pub icon: Option<Option<String>>,
    #[serde(default)]
    pub sort_order: Option<i32>,
}

/// 文件夹树节点
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderTreeNode {
    /// 文件夹信息
    pub folder: Folder,

    /// 子文件夹（按 sort_order 排序）
    pub children: Vec<FolderTreeNode>,
}

impl FolderTreeNode {
    pub fn new(folder: Folder) -> Self {
        Self {
            folder,
            children: Vec::new(),
        }
    }

    /// 子树中的节点总数（含自身）
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }
}

// ============================================================================
// 笔记
// ============================================================================

/// 笔记（notes 表 + note_tags 关联）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// 笔记 ID（格式：`note_{nanoid(10)}`）
    pub id: String,

    pub title: String,

    /// 内容（对仓储层不透明）
    pub content: String,

    /// 所属文件夹（None 表示根级）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,

    pub is_favorite: bool,

    pub is_deleted: bool,

    /// 关联标签 ID（集合语义，按 ID 排序）
    #[serde(default)]
    pub tag_ids: Vec<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Note {
    /// 生成笔记 ID
    pub fn generate_id() -> String {
        format!("note_{}", nanoid::nanoid!(10))
    }
}

/// 创建笔记参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteParams {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
}

/// 更新笔记参数
///
/// `tag_ids` 为 `Some` 时整体替换关联集合（`Some(vec![])` 清空全部标签）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNoteParams {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub folder_id: Option<Option<String>>,
    #[serde(default)]
    pub is_favorite: Option<bool>,
    #[serde(default)]
    pub tag_ids: Option<Vec<String>>,
}

/// 笔记列表过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteFilter {
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
}

// ============================================================================
// 标签
// ============================================================================

/// 标签（tags 表）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    /// 标签 ID（格式：`tag_{nanoid(10)}`）
    pub id: String,

    /// 名称（全局唯一，大小写敏感）
    pub name: String,

    /// 可选十六进制颜色
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// 关联笔记数（派生字段，统计 note_tags 行）
    #[serde(default)]
    pub note_count: u32,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Tag {
    /// 生成标签 ID
    pub fn generate_id() -> String {
        format!("tag_{}", nanoid::nanoid!(10))
    }
}

/// 更新标签参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTagParams {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<Option<String>>,
}

/// 清理未使用标签的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub deleted_count: usize,
    pub deleted_tags: Vec<Tag>,
    pub errors: Vec<CleanupFailure>,
}

/// 单个标签清理失败记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupFailure {
    pub tag_id: String,
    pub message: String,
}

// ============================================================================
// 标记（Mark）
// ============================================================================

/// 标记类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkType {
    Text,
    Image,
    Link,
    File,
    Scan,
}

impl MarkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkType::Text => "text",
            MarkType::Image => "image",
            MarkType::Link => "link",
            MarkType::File => "file",
            MarkType::Scan => "scan",
        }
    }
}

impl fmt::Display for MarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MarkType::Text),
            "image" => Ok(MarkType::Image),
            "link" => Ok(MarkType::Link),
            "file" => Ok(MarkType::File),
            "scan" => Ok(MarkType::Scan),
            other => Err(format!("unknown mark type: {}", other)),
        }
    }
}

/// 标记（marks 表）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    /// 标记 ID（格式：`mark_{nanoid(10)}`）
    pub id: String,

    pub tag_id: String,

    #[serde(rename = "type")]
    pub mark_type: MarkType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    /// 是否在回收站
    pub deleted: bool,

    pub created_at: i64,
}

impl Mark {
    /// 生成标记 ID
    pub fn generate_id() -> String {
        format!("mark_{}", nanoid::nanoid!(10))
    }
}

/// 创建标记参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMarkParams {
    pub tag_id: String,
    #[serde(rename = "type")]
    pub mark_type: MarkType,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
}

/// 更新标记参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMarkParams {
    #[serde(default)]
    pub tag_id: Option<String>,
    #[serde(default, rename = "type")]
    pub mark_type: Option<MarkType>,
    #[serde(default)]
    pub content: Option<Option<String>>,
    #[serde(default)]
    pub url: Option<Option<String>>,
    #[serde(default)]
    pub desc: Option<Option<String>>,
}

/// 清空回收站结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearTrashResult {
    pub deleted_count: usize,
}

// ============================================================================
// 通用
// ============================================================================

/// 删除操作的确认（仅返回 ID）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedId {
    pub id: String,
}

impl DeletedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}
