//! Organizer 端到端场景测试
//!
//! 通过 `Organizer` 入口驱动多实体操作序列，验证跨表的结构约束在每次提交后都成立。

use std::collections::{HashMap, HashSet};

use assert_matches::assert_matches;
use deep_organizer::organizer::{
    CreateFolderParams, CreateMarkParams, CreateNoteParams, MarkType, NoteFilter, Organizer,
    OrganizerError, UpdateFolderParams, UpdateNoteParams, UpdateTagParams,
};
use deep_organizer::OrganizerConfig;
use tempfile::TempDir;

fn setup_organizer() -> (TempDir, Organizer) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let organizer = Organizer::open(&OrganizerConfig::with_data_dir(temp_dir.path()))
        .expect("Failed to open organizer");
    (temp_dir, organizer)
}

fn folder(organizer: &Organizer, name: &str, parent_id: Option<&str>) -> String {
    organizer
        .create_folder(&CreateFolderParams {
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
        .id
}

fn note(organizer: &Organizer, title: &str, folder_id: Option<&str>, tag_ids: &[&str]) -> String {
    organizer
        .create_note(&CreateNoteParams {
            title: title.to_string(),
            content: String::new(),
            folder_id: folder_id.map(str::to_string),
            tag_ids: tag_ids.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
        .id
}

fn reparent(parent_id: Option<&str>) -> UpdateFolderParams {
    UpdateFolderParams {
        parent_id: Some(parent_id.map(str::to_string)),
        ..Default::default()
    }
}

/// 从根出发沿 parent 链走，任何节点都必须在有限步内到达根
fn assert_acyclic(organizer: &Organizer) {
    let folders = organizer.list_folders().unwrap();
    let parents: HashMap<String, Option<String>> = folders
        .iter()
        .map(|f| (f.id.clone(), f.parent_id.clone()))
        .collect();

    for f in &folders {
        let mut seen = HashSet::new();
        let mut current = Some(f.id.clone());
        while let Some(id) = current {
            assert!(seen.insert(id.clone()), "cycle through {}", id);
            current = parents.get(&id).cloned().flatten();
        }
    }

    let tree = organizer.get_folder_tree().unwrap();
    let total: usize = tree.iter().map(|n| n.node_count()).sum();
    assert_eq!(total, folders.len());
}

// ============================================================================
// 场景
// ============================================================================

#[test]
fn test_reparent_under_descendant_is_rejected() {
    let (_temp_dir, organizer) = setup_organizer();

    let work = folder(&organizer, "Work", None);
    let projects = folder(&organizer, "Projects", Some(&work));

    assert_matches!(
        organizer.update_folder(&work, &reparent(Some(&projects))),
        Err(OrganizerError::CycleDetected { .. })
    );

    let work_after = organizer.get_folder(&work).unwrap();
    assert_eq!(work_after.parent_id, None);
    assert_eq!(
        organizer.get_ancestor_ids(&projects).unwrap(),
        vec![work.clone()]
    );
}

#[test]
fn test_note_tag_set_is_replaced_wholesale() {
    let (_temp_dir, organizer) = setup_organizer();

    let t1 = organizer.create_tag("t1", None).unwrap().id;
    let t2 = organizer.create_tag("t2", None).unwrap().id;
    let t3 = organizer.create_tag("t3", None).unwrap().id;

    let n = note(&organizer, "draft", None, &[&t1, &t2]);
    organizer
        .update_note(
            &n,
            &UpdateNoteParams {
                tag_ids: Some(vec![t2.clone(), t3.clone()]),
                ..Default::default()
            },
        )
        .unwrap();

    let tags: HashSet<String> = organizer
        .get_note(&n, false)
        .unwrap()
        .tag_ids
        .into_iter()
        .collect();
    assert_eq!(tags, HashSet::from([t2.clone(), t3.clone()]));

    assert_eq!(organizer.get_tag(&t1).unwrap().note_count, 0);
    assert_eq!(organizer.get_tag(&t2).unwrap().note_count, 1);
    assert_eq!(organizer.get_tag(&t3).unwrap().note_count, 1);

    let unused: Vec<String> = organizer
        .find_unused_tags()
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(unused, vec![t1]);
}

#[test]
fn test_folder_delete_blocked_by_active_notes_only() {
    let (_temp_dir, organizer) = setup_organizer();

    let a = folder(&organizer, "A", None);
    let n = note(&organizer, "inside", Some(&a), &[]);

    assert_matches!(
        organizer.soft_delete_folder(&a),
        Err(OrganizerError::HasNotes { count: 1, .. })
    );
    assert!(!organizer.get_folder(&a).unwrap().is_deleted);

    organizer.soft_delete_note(&n).unwrap();
    organizer.soft_delete_folder(&a).unwrap();
    assert!(organizer.get_folder(&a).unwrap().is_deleted);
    assert!(organizer.list_folders().unwrap().is_empty());
}

#[test]
fn test_mark_trash_lifecycle() {
    let (_temp_dir, organizer) = setup_organizer();

    let tag = organizer.create_tag("reading", None).unwrap().id;
    let mark = organizer
        .create_mark(&CreateMarkParams {
            tag_id: tag.clone(),
            mark_type: MarkType::Text,
            content: Some("highlight".to_string()),
            url: None,
            desc: None,
        })
        .unwrap();

    organizer.soft_delete_mark(&mark.id).unwrap();
    assert!(organizer.list_marks_by_tag(&tag).unwrap().is_empty());

    let all = organizer.list_all_marks(true).unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].deleted);

    assert_eq!(organizer.clear_mark_trash().unwrap().deleted_count, 1);
    assert_eq!(organizer.clear_mark_trash().unwrap().deleted_count, 0);
    assert!(organizer.list_all_marks(true).unwrap().is_empty());
}

// ============================================================================
// 不变量
// ============================================================================

#[test]
fn test_arbitrary_reparent_sequence_stays_acyclic() {
    let (_temp_dir, organizer) = setup_organizer();

    let ids: Vec<String> = (0..8)
        .map(|i| folder(&organizer, &format!("f{}", i), None))
        .collect();

    // 固定种子的线性同余序列，保证可复现
    let mut seed: u64 = 0x2545_f491;
    let mut next = || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) as usize
    };

    let mut rejected = 0;
    for _ in 0..200 {
        let child = &ids[next() % ids.len()];
        let target = next() % (ids.len() + 1);
        let parent = ids.get(target).map(String::as_str);

        match organizer.update_folder(child, &reparent(parent)) {
            Ok(updated) => assert_eq!(updated.parent_id.as_deref(), parent),
            Err(OrganizerError::CycleDetected { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
        assert_acyclic(&organizer);
    }
    assert!(rejected > 0);
}

#[test]
fn test_guard_failure_leaves_state_unchanged() {
    let (_temp_dir, organizer) = setup_organizer();

    let parent = folder(&organizer, "parent", None);
    let child = folder(&organizer, "child", Some(&parent));
    let before = organizer.list_folders().unwrap();

    assert_matches!(
        organizer.soft_delete_folder(&parent),
        Err(OrganizerError::HasChildren { count: 1, .. })
    );
    assert_matches!(
        organizer.permanent_delete_folder(&parent),
        Err(OrganizerError::HasChildren { .. })
    );
    assert_matches!(
        organizer.reorder_folders(&[child.clone(), "fld_missing".to_string()]),
        Err(OrganizerError::NotFound { .. })
    );

    assert_eq!(organizer.list_folders().unwrap(), before);
}

#[test]
fn test_tag_names_unique_across_create_and_rename() {
    let (_temp_dir, organizer) = setup_organizer();

    let rust = organizer.create_tag("rust", Some("#f74c00")).unwrap();
    let go = organizer.create_tag("go", None).unwrap();

    assert_matches!(
        organizer.create_tag("rust", None),
        Err(OrganizerError::DuplicateName { ref name }) if name == "rust"
    );
    assert_matches!(
        organizer.update_tag(
            &go.id,
            &UpdateTagParams {
                name: Some("rust".to_string()),
                ..Default::default()
            }
        ),
        Err(OrganizerError::DuplicateName { .. })
    );

    // 大小写敏感
    organizer.create_tag("Rust", None).unwrap();

    let renamed = organizer
        .update_tag(
            &rust.id,
            &UpdateTagParams {
                name: Some("rust".to_string()),
                color: Some(None),
            },
        )
        .unwrap();
    assert_eq!(renamed.color, None);
    assert_eq!(organizer.list_tags(None).unwrap().len(), 3);
}

#[test]
fn test_tag_delete_detaches_notes_and_drops_marks() {
    let (_temp_dir, organizer) = setup_organizer();

    let tag = organizer.create_tag("temp", None).unwrap().id;
    let keep = organizer.create_tag("keep", None).unwrap().id;
    let n = note(&organizer, "tagged", None, &[&tag, &keep]);
    organizer
        .create_mark(&CreateMarkParams {
            tag_id: tag.clone(),
            mark_type: MarkType::Image,
            content: None,
            url: None,
            desc: None,
        })
        .unwrap();

    organizer.delete_tag(&tag).unwrap();

    assert_eq!(organizer.get_note(&n, false).unwrap().tag_ids, vec![keep]);
    assert!(organizer.list_all_marks(true).unwrap().is_empty());
    assert_matches!(
        organizer.get_tag(&tag),
        Err(OrganizerError::NotFound { .. })
    );
}

// ============================================================================
// 回收站往返
// ============================================================================

#[test]
fn test_soft_delete_and_restore_round_trips() {
    let (_temp_dir, organizer) = setup_organizer();

    let parent = folder(&organizer, "parent", None);
    let child = folder(&organizer, "child", Some(&parent));
    let n = note(&organizer, "memo", Some(&child), &[]);

    organizer.soft_delete_note(&n).unwrap();
    assert_matches!(
        organizer.get_note(&n, false),
        Err(OrganizerError::NotFound { .. })
    );
    assert_eq!(organizer.list_deleted_notes().unwrap().len(), 1);

    organizer.soft_delete_folder(&child).unwrap();
    organizer.soft_delete_folder(&parent).unwrap();

    // 父级仍在回收站：恢复后挂到根级
    let restored = organizer.restore_folder(&child).unwrap();
    assert_eq!(restored.parent_id, None);
    assert!(!restored.is_deleted);

    let restored_note = organizer.restore_note(&n).unwrap();
    assert_eq!(restored_note.folder_id.as_deref(), Some(child.as_str()));

    assert_matches!(
        organizer.restore_note(&n),
        Err(OrganizerError::NotDeleted { .. })
    );
    assert_eq!(organizer.list_deleted_folders().unwrap().len(), 1);

    let listed = organizer
        .list_notes(&NoteFilter {
            folder_id: Some(child.clone()),
            search: None,
        })
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[test]
fn test_restore_brings_back_identical_entities() {
    let (_temp_dir, organizer) = setup_organizer();

    let parent = folder(&organizer, "parent", None);
    let styled = organizer
        .create_folder(&CreateFolderParams {
            name: "styled".to_string(),
            parent_id: Some(parent.clone()),
            color: Some("#ff8800".to_string()),
            icon: Some("book".to_string()),
        })
        .unwrap();
    let original_folder = organizer.get_folder(&styled.id).unwrap();

    let t1 = organizer.create_tag("alpha", None).unwrap().id;
    let t2 = organizer.create_tag("beta", None).unwrap().id;
    let n = organizer
        .create_note(&CreateNoteParams {
            title: "memo".to_string(),
            content: "body text".to_string(),
            folder_id: Some(parent.clone()),
            tag_ids: vec![t2.clone(), t1.clone()],
        })
        .unwrap();
    organizer.toggle_favorite(&n.id).unwrap();
    let original_note = organizer.get_note(&n.id, false).unwrap();
    assert!(original_note.is_favorite);

    organizer.soft_delete_folder(&styled.id).unwrap();
    organizer.restore_folder(&styled.id).unwrap();
    let mut restored_folder = organizer.get_folder(&styled.id).unwrap();
    assert!(restored_folder.updated_at >= original_folder.updated_at);
    restored_folder.updated_at = original_folder.updated_at;
    assert_eq!(restored_folder, original_folder);

    organizer.soft_delete_note(&n.id).unwrap();
    let mut restored_note = organizer.restore_note(&n.id).unwrap();
    assert!(restored_note.updated_at >= original_note.updated_at);
    restored_note.updated_at = original_note.updated_at;
    assert_eq!(restored_note, original_note);
}

#[test]
fn test_purge_removes_only_trashed_notes() {
    let (_temp_dir, organizer) = setup_organizer();

    let tag = organizer.create_tag("t", None).unwrap().id;
    let kept = note(&organizer, "kept", None, &[&tag]);
    let trashed = note(&organizer, "trashed", None, &[&tag]);
    organizer.soft_delete_note(&trashed).unwrap();

    assert_eq!(organizer.purge_deleted_notes().unwrap(), 1);
    assert_matches!(
        organizer.get_note(&trashed, true),
        Err(OrganizerError::NotFound { .. })
    );
    assert!(organizer.get_note(&kept, false).is_ok());
    assert_eq!(organizer.get_tag(&tag).unwrap().note_count, 1);

    let stats = organizer.get_statistics().unwrap();
    assert_eq!(stats.note_count, 1);
    assert_eq!(stats.deleted_note_count, 0);
}

// ============================================================================
// 校验
// ============================================================================

#[test]
fn test_validation_failures_do_not_touch_store() {
    let (_temp_dir, organizer) = setup_organizer();

    assert_matches!(
        organizer.create_folder(&CreateFolderParams {
            name: "x".repeat(101),
            ..Default::default()
        }),
        Err(OrganizerError::ValidationFailed(ref e)) if e.has_field("name")
    );
    assert_matches!(
        organizer.create_note(&CreateNoteParams {
            title: "   ".to_string(),
            ..Default::default()
        }),
        Err(OrganizerError::ValidationFailed(ref e)) if e.has_field("title")
    );
    assert_matches!(
        organizer.create_mark(&CreateMarkParams {
            tag_id: "tag_any".to_string(),
            mark_type: MarkType::Link,
            content: None,
            url: Some("not a url".to_string()),
            desc: None,
        }),
        Err(OrganizerError::ValidationFailed(ref e)) if e.has_field("url")
    );

    let stats = organizer.get_statistics().unwrap();
    assert_eq!(stats.folder_count, 0);
    assert_eq!(stats.note_count, 0);
    assert_eq!(stats.mark_count, 0);
}

#[test]
fn test_note_search_matches_title_or_content() {
    let (_temp_dir, organizer) = setup_organizer();

    organizer
        .create_note(&CreateNoteParams {
            title: "Groceries".to_string(),
            content: "milk, eggs".to_string(),
            ..Default::default()
        })
        .unwrap();
    organizer
        .create_note(&CreateNoteParams {
            title: "Recipe".to_string(),
            content: "two eggs, 100% flour".to_string(),
            ..Default::default()
        })
        .unwrap();

    let search = |text: &str| {
        organizer
            .list_notes(&NoteFilter {
                folder_id: None,
                search: Some(text.to_string()),
            })
            .unwrap()
            .len()
    };
    assert_eq!(search("eggs"), 2);
    assert_eq!(search("Groc"), 1);
    assert_eq!(search("100%"), 1);
    assert_eq!(search("  "), 2);
}
