//! Organizer 数据库管理模块
//!
//! 提供 Organizer 的独立 SQLite 数据库初始化和管理功能。
//! 使用 r2d2 连接池，支持并发访问。
//!
//! ## 设计原则
//! - **单一数据库**：`{data_dir}/databases/organizer.db`
//! - **连接池管理**：r2d2 管理连接，每个连接初始化时设置 pragma
//! - **显式句柄**：不使用全局单例，调用方持有 `OrganizerDatabase`
//!
//! ## 迁移系统
//! 使用 Refinery 框架，迁移文件位于 `migrations/organizer/`，打开数据库时执行。

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::{OrganizerError, OrganizerResult};
use crate::config::OrganizerConfig;

/// 数据库文件名
const DATABASE_FILENAME: &str = "organizer.db";

/// 当前 Schema 版本（对应 Refinery 迁移的最新版本）
pub const CURRENT_SCHEMA_VERSION: u32 = 20260302;

/// SQLite 连接池类型
pub type OrganizerPool = Pool<SqliteConnectionManager>;

/// SQLite 池化连接类型
pub type OrganizerPooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

mod embedded {
    refinery::embed_migrations!("migrations/organizer");
}

/// Organizer 数据库管理器
pub struct OrganizerDatabase {
    /// 数据库连接池
    pool: RwLock<OrganizerPool>,
    /// 数据库文件路径
    db_path: PathBuf,
}

impl OrganizerDatabase {
    /// 使用默认连接池参数在 `app_data_dir` 下创建数据库
    pub fn new(app_data_dir: &Path) -> OrganizerResult<Self> {
        Self::open(&OrganizerConfig::with_data_dir(app_data_dir))
    }

    /// 按配置打开数据库并执行迁移
    ///
    /// # Errors
    /// * 目录创建失败
    /// * 连接池创建失败
    /// * 迁移执行失败
    pub fn open(config: &OrganizerConfig) -> OrganizerResult<Self> {
        info!(
            "[Organizer::Database] Initializing database in: {}",
            config.data_dir.display()
        );

        let databases_dir = config.data_dir.join("databases");
        if let Err(e) = fs::create_dir_all(&databases_dir) {
            error!(
                "[Organizer::Database] Failed to create databases directory: {}",
                e
            );
            return Err(OrganizerError::Io(format!(
                "Failed to create databases directory: {}",
                e
            )));
        }

        let db_path = databases_dir.join(DATABASE_FILENAME);
        let pool = Self::build_pool(&db_path, config)?;

        let db = Self {
            pool: RwLock::new(pool),
            db_path,
        };

        {
            let mut conn = db.get_conn()?;
            Self::run_migrations(&mut conn)?;
        }

        info!(
            "[Organizer::Database] Database initialized successfully: {}",
            db.db_path.display()
        );

        Ok(db)
    }

    /// 构建连接池
    fn build_pool(db_path: &Path, config: &OrganizerConfig) -> OrganizerResult<OrganizerPool> {
        debug!(
            "[Organizer::Database] Building connection pool for: {}",
            db_path.display()
        );

        let busy_timeout_ms = config.busy_timeout_ms as i64;
        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            // 外键约束必须逐连接开启
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "busy_timeout", busy_timeout_ms)?;
            Ok(())
        });

        let max_size = config.pool_max_size.max(1);
        Pool::builder()
            .max_size(max_size)
            .min_idle(Some(config.pool_min_idle.min(max_size)))
            .connection_timeout(config.connection_timeout())
            .max_lifetime(Some(Duration::from_secs(1800)))
            .idle_timeout(Some(Duration::from_secs(600)))
            .build(manager)
            .map_err(|e| OrganizerError::Pool(format!("Failed to create connection pool: {}", e)))
    }

    /// 执行嵌入的迁移（逐条执行，已应用的迁移会被跳过）
    fn run_migrations(conn: &mut Connection) -> OrganizerResult<()> {
        let report = embedded::migrations::runner()
            .set_grouped(false)
            .run(conn)
            .map_err(|e| OrganizerError::Migration(e.to_string()))?;

        let applied = report.applied_migrations();
        if applied.is_empty() {
            debug!("[Organizer::Database] Schema up to date");
        } else {
            for migration in applied {
                info!(
                    "[Organizer::Database] Applied migration V{}__{}",
                    migration.version(),
                    migration.name()
                );
            }
        }
        Ok(())
    }

    /// 获取数据库连接
    pub fn get_conn(&self) -> OrganizerResult<OrganizerPooledConnection> {
        let pool = self
            .pool
            .read()
            .map_err(|e| OrganizerError::Pool(format!("Pool lock poisoned: {}", e)))?;

        pool.get()
            .map_err(|e| OrganizerError::Pool(format!("Failed to get connection: {}", e)))
    }

    /// 获取数据库连接（安全版本）
    ///
    /// RwLock 被 poison 时恢复连接池，并对取到的连接执行 ROLLBACK 清理残留事务。
    /// 连接池繁忙时以指数退避重试，最多 3 次。
    pub fn get_conn_safe(&self) -> OrganizerResult<OrganizerPooledConnection> {
        let mut was_poisoned = false;
        let pool = self.pool.read().unwrap_or_else(|poisoned| {
            error!("[Organizer::Database] RwLock poisoned in get_conn_safe! Attempting recovery");
            was_poisoned = true;
            poisoned.into_inner()
        });

        const MAX_RETRIES: u32 = 3;
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match pool.get() {
                Ok(conn) => {
                    if was_poisoned {
                        let _ = conn.execute_batch("ROLLBACK");
                        warn!("[Organizer::Database] Recovered from poison, issued ROLLBACK");
                    }
                    if attempt > 0 {
                        debug!(
                            "[Organizer::Database] get_conn_safe succeeded on retry {}",
                            attempt
                        );
                    }
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(
                        "[Organizer::Database] get_conn_safe attempt {} failed: {}",
                        attempt + 1,
                        e
                    );
                    last_error = Some(e);
                    if attempt + 1 < MAX_RETRIES {
                        let backoff_ms = (50u64 << attempt).min(5000);
                        std::thread::sleep(Duration::from_millis(backoff_ms));
                    }
                }
            }
        }

        error!(
            "[Organizer::Database] get_conn_safe: all {} attempts failed",
            MAX_RETRIES
        );
        Err(OrganizerError::Pool(format!(
            "Failed to get connection after {} retries: {}",
            MAX_RETRIES,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    /// 获取数据库文件路径
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 检查外键约束是否启用
    pub fn is_foreign_keys_enabled(&self) -> OrganizerResult<bool> {
        let conn = self.get_conn()?;
        let enabled: i64 = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
        Ok(enabled == 1)
    }

    /// 获取当前 Schema 版本（读取 refinery_schema_history）
    pub fn get_schema_version(&self) -> OrganizerResult<u32> {
        let conn = self.get_conn()?;
        let version: u32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM refinery_schema_history",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// 获取数据库统计信息（单次查询获取所有计数）
    pub fn get_statistics(&self) -> OrganizerResult<OrganizerDatabaseStats> {
        let conn = self.get_conn_safe()?;

        let counts = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM folders WHERE is_deleted = 0),
                (SELECT COUNT(*) FROM folders WHERE is_deleted = 1),
                (SELECT COUNT(*) FROM notes WHERE is_deleted = 0),
                (SELECT COUNT(*) FROM notes WHERE is_deleted = 1),
                (SELECT COUNT(*) FROM notes WHERE is_deleted = 0 AND is_favorite = 1),
                (SELECT COUNT(*) FROM tags),
                (SELECT COUNT(*) FROM marks WHERE deleted = 0),
                (SELECT COUNT(*) FROM marks WHERE deleted = 1)",
            [],
            |row| {
                let mut values = [0u64; 8];
                for (i, slot) in values.iter_mut().enumerate() {
                    *slot = row.get::<_, i64>(i)? as u64;
                }
                Ok(values)
            },
        )?;

        Ok(OrganizerDatabaseStats {
            folder_count: counts[0],
            deleted_folder_count: counts[1],
            note_count: counts[2],
            deleted_note_count: counts[3],
            favorite_note_count: counts[4],
            tag_count: counts[5],
            mark_count: counts[6],
            deleted_mark_count: counts[7],
            schema_version: CURRENT_SCHEMA_VERSION,
        })
    }

    /// 清空全部数据（保留 schema），供测试使用
    pub fn reset_for_testing(&self) -> OrganizerResult<()> {
        let conn = self.get_conn_safe()?;
        conn.execute_batch(
            "BEGIN IMMEDIATE;
             DELETE FROM marks;
             DELETE FROM note_tags;
             DELETE FROM notes;
             DELETE FROM tags;
             DELETE FROM folders;
             COMMIT;",
        )
        .map_err(|e| {
            let _ = conn.execute_batch("ROLLBACK");
            OrganizerError::from(e)
        })?;
        warn!("[Organizer::Database] All rows cleared (reset_for_testing)");
        Ok(())
    }
}

/// Organizer 数据库统计信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizerDatabaseStats {
    /// 未删除文件夹数
    pub folder_count: u64,
    /// 回收站中的文件夹数
    pub deleted_folder_count: u64,
    /// 未删除笔记数
    pub note_count: u64,
    /// 回收站中的笔记数
    pub deleted_note_count: u64,
    /// 收藏笔记数
    pub favorite_note_count: u64,
    /// 标签数
    pub tag_count: u64,
    /// 未删除标记数
    pub mark_count: u64,
    /// 回收站中的标记数
    pub deleted_mark_count: u64,
    /// Schema 版本
    pub schema_version: u32,
}

// ============================================================================
// 单元测试
// ============================================================================
