//! 列表查询过滤条件构建
//!
//! 提供不透明的 [`Predicate`] 及组合子，仓储只通过这里拼装 WHERE 子句，
//! 不直接拼接用户输入。字段名只能是代码中的 `&'static str` 列名，
//! 用户输入一律作为绑定参数传入。
//!
//! ## 组合规则
//! - `combine_all([])` → `None`
//! - `combine_all([p])` → `Some(p)`（原样返回）
//! - `combine_all([p, q, ..])` → `Some(And[..])`
//! - 空白搜索词不产生子串条件

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;

/// 过滤值
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Null,
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Integer(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Integer(v as i64)
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FilterValue::Null)
    }
}

impl ToSql for FilterValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FilterValue::Text(s) => ToSqlOutput::from(s.as_str()),
            FilterValue::Integer(i) => ToSqlOutput::from(*i),
            FilterValue::Null => ToSqlOutput::Owned(Value::Null),
        })
    }
}

/// 不透明的过滤条件
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals {
        field: &'static str,
        value: FilterValue,
    },
    Substring {
        field: &'static str,
        text: String,
    },
    NotDeleted {
        field: &'static str,
    },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

/// 相等条件；值为 `Null` 时渲染为 `IS NULL`
pub fn equals(field: &'static str, value: impl Into<FilterValue>) -> Predicate {
    Predicate::Equals {
        field,
        value: value.into(),
    }
}

/// 子串匹配条件；空白输入返回 `None`
pub fn substring(field: &'static str, text: &str) -> Option<Predicate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(Predicate::Substring {
        field,
        text: trimmed.to_string(),
    })
}

/// 排除软删除行（`field = 0`）
pub fn exclude_soft_deleted(field: &'static str) -> Predicate {
    Predicate::NotDeleted { field }
}

/// AND 组合
pub fn combine_all(predicates: impl IntoIterator<Item = Predicate>) -> Option<Predicate> {
    combine(predicates, Predicate::All)
}

/// OR 组合，规则同 [`combine_all`]
pub fn combine_any(predicates: impl IntoIterator<Item = Predicate>) -> Option<Predicate> {
    combine(predicates, Predicate::Any)
}

fn combine(
    predicates: impl IntoIterator<Item = Predicate>,
    wrap: fn(Vec<Predicate>) -> Predicate,
) -> Option<Predicate> {
    let mut list: Vec<Predicate> = predicates.into_iter().collect();
    match list.len() {
        0 => None,
        1 => list.pop(),
        _ => Some(wrap(list)),
    }
}

/// 转义 SQL LIKE 模式中的特殊字符
///
/// 先转义反斜杠，再转义 `%` 与 `_`，配合 `ESCAPE '\'` 使用。
pub fn escape_like_pattern(s: &str) -> String {
    s.replace('\\', r"\\")
        .replace('%', r"\%")
        .replace('_', r"\_")
}

impl Predicate {
    /// 渲染为 SQL 片段，参数追加到 `params`，占位符编号从 `params.len() + 1` 开始
    pub fn to_sql(&self, params: &mut Vec<FilterValue>) -> String {
        match self {
            Predicate::Equals { field, value } => {
                if *value == FilterValue::Null {
                    format!("{} IS NULL", field)
                } else {
                    params.push(value.clone());
                    format!("{} = ?{}", field, params.len())
                }
            }
            Predicate::Substring { field, text } => {
                params.push(FilterValue::Text(format!(
                    "%{}%",
                    escape_like_pattern(text)
                )));
                format!("{} LIKE ?{} ESCAPE '\\'", field, params.len())
            }
            Predicate::NotDeleted { field } => format!("{} = 0", field),
            Predicate::All(list) => Self::join(list, " AND ", params),
            Predicate::Any(list) => Self::join(list, " OR ", params),
        }
    }

    fn join(list: &[Predicate], sep: &str, params: &mut Vec<FilterValue>) -> String {
        let parts: Vec<String> = list.iter().map(|p| p.to_sql(params)).collect();
        format!("({})", parts.join(sep))
    }
}

/// 渲染完整 WHERE 子句（无条件时返回空串）
pub fn where_clause(predicate: Option<&Predicate>, params: &mut Vec<FilterValue>) -> String {
    match predicate {
        Some(p) => format!(" WHERE {}", p.to_sql(params)),
        None => String::new(),
    }
}
