//! 输入校验层
//!
//! 在写操作进入仓储之前执行。规则挂在具名字段上，一个字段的所有违规都会被收集，
//! `ValidationBatch` 汇总多个字段后一次性返回 `ValidationErrors`。
//!
//! ## 规则
//! - `required`: 缺失、空白字符串、空列表均视为违规
//! - `string_length(min, max)`: 按字符数计算
//! - `array_length(min, max)`
//! - `pattern(regex, description)`
//! - `number_range(min, max)`
//! - `custom(message, predicate)`
//!
//! 除 `required` 外，规则只作用于对应类型的值，缺失的可选字段不会触发其他规则。

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use super::types::{
    CreateFolderParams, CreateMarkParams, CreateNoteParams, MarkType, UpdateFolderParams,
    UpdateNoteParams, UpdateTagParams,
};
use super::{MAX_FOLDER_NAME_LENGTH, MAX_NOTE_TITLE_LENGTH, MAX_TAGS_PER_NOTE, MAX_TAG_NAME_LENGTH};

/// 十六进制颜色：`#RGB` 或 `#RRGGBB`
const HEX_COLOR_PATTERN: &str = r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$";

// ============================================================================
// 违规与错误
// ============================================================================

/// 单个字段违规
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// 聚合的校验错误
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[error("{}", join_violations(.violations))]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// 指定字段是否有违规
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

// ============================================================================
// 字段值
// ============================================================================

/// 被校验的字段值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Missing,
    Text(&'a str),
    List(usize),
    Number(f64),
}

impl<'a> From<&'a str> for FieldValue<'a> {
    fn from(s: &'a str) -> Self {
        FieldValue::Text(s)
    }
}

impl<'a> From<&'a String> for FieldValue<'a> {
    fn from(s: &'a String) -> Self {
        FieldValue::Text(s.as_str())
    }
}

impl<'a> From<Option<&'a str>> for FieldValue<'a> {
    fn from(s: Option<&'a str>) -> Self {
        s.map(FieldValue::Text).unwrap_or(FieldValue::Missing)
    }
}

impl<'a, T> From<&'a [T]> for FieldValue<'a> {
    fn from(items: &'a [T]) -> Self {
        FieldValue::List(items.len())
    }
}

impl From<i64> for FieldValue<'_> {
    fn from(n: i64) -> Self {
        FieldValue::Number(n as f64)
    }
}

impl From<i32> for FieldValue<'_> {
    fn from(n: i32) -> Self {
        FieldValue::Number(f64::from(n))
    }
}

impl From<usize> for FieldValue<'_> {
    fn from(n: usize) -> Self {
        FieldValue::Number(n as f64)
    }
}

// ============================================================================
// 规则
// ============================================================================

type CustomCheck = Box<dyn Fn(&FieldValue<'_>) -> bool + Send + Sync>;

enum Rule {
    Required,
    StringLength {
        min: Option<usize>,
        max: Option<usize>,
    },
    ArrayLength {
        min: Option<usize>,
        max: Option<usize>,
    },
    Pattern {
        regex: Result<Regex, String>,
        description: String,
    },
    NumberRange {
        min: Option<f64>,
        max: Option<f64>,
    },
    Custom {
        message: String,
        check: CustomCheck,
    },
}

fn bounds_message(unit: &str, min: Option<usize>, max: Option<usize>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("must be {}-{} {}", min, max, unit),
        (Some(min), None) => format!("must be at least {} {}", min, unit),
        (None, Some(max)) => format!("must be at most {} {}", max, unit),
        (None, None) => String::new(),
    }
}

fn out_of_bounds(len: usize, min: Option<usize>, max: Option<usize>) -> bool {
    min.is_some_and(|min| len < min) || max.is_some_and(|max| len > max)
}

impl Rule {
    /// 返回违规信息；不适用于该值类型时返回 None
    fn check(&self, value: &FieldValue<'_>) -> Option<String> {
        match (self, value) {
            (Rule::Required, FieldValue::Missing) => Some("is required".to_string()),
            (Rule::Required, FieldValue::Text(s)) if s.trim().is_empty() => {
                Some("must not be blank".to_string())
            }
            (Rule::Required, FieldValue::List(0)) => Some("must not be empty".to_string()),

            (Rule::StringLength { min, max }, FieldValue::Text(s)) => {
                let len = s.chars().count();
                out_of_bounds(len, *min, *max).then(|| bounds_message("characters", *min, *max))
            }

            (Rule::ArrayLength { min, max }, FieldValue::List(len)) => {
                out_of_bounds(*len, *min, *max).then(|| bounds_message("items", *min, *max))
            }

            (Rule::Pattern { regex, description }, FieldValue::Text(s)) => match regex {
                Ok(re) if re.is_match(s) => None,
                Ok(_) => Some(format!("must be {}", description)),
                Err(e) => Some(format!("cannot be checked against {}: {}", description, e)),
            },

            (Rule::NumberRange { min, max }, FieldValue::Number(n)) => {
                let below = min.is_some_and(|min| *n < min);
                let above = max.is_some_and(|max| *n > max);
                (below || above).then(|| match (min, max) {
                    (Some(min), Some(max)) => format!("must be between {} and {}", min, max),
                    (Some(min), None) => format!("must be at least {}", min),
                    (None, Some(max)) => format!("must be at most {}", max),
                    (None, None) => String::new(),
                })
            }

            (Rule::Custom { message, check }, value) => (!check(value)).then(|| message.clone()),

            _ => None,
        }
    }
}

// ============================================================================
// 字段校验器
// ============================================================================

/// 挂在单个字段上的规则组合
pub struct FieldValidator {
    field: String,
    rules: Vec<Rule>,
}

impl FieldValidator {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rules: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.rules.push(Rule::Required);
        self
    }

    pub fn string_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.rules.push(Rule::StringLength { min, max });
        self
    }

    pub fn array_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.rules.push(Rule::ArrayLength { min, max });
        self
    }

    /// 正则规则；正则无法编译时该规则总是报告违规
    pub fn pattern(mut self, pattern: &str, description: impl Into<String>) -> Self {
        let regex = Regex::new(pattern).map_err(|e| {
            warn!("[Organizer::Validation] Invalid pattern {}: {}", pattern, e);
            e.to_string()
        });
        self.rules.push(Rule::Pattern {
            regex,
            description: description.into(),
        });
        self
    }

    pub fn number_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.rules.push(Rule::NumberRange { min, max });
        self
    }

    pub fn custom(
        mut self,
        message: impl Into<String>,
        check: impl Fn(&FieldValue<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.rules.push(Rule::Custom {
            message: message.into(),
            check: Box::new(check),
        });
        self
    }

    /// 执行所有规则，返回全部违规
    pub fn validate(&self, value: &FieldValue<'_>) -> Vec<FieldViolation> {
        self.rules
            .iter()
            .filter_map(|rule| rule.check(value))
            .map(|message| FieldViolation {
                field: self.field.clone(),
                message,
            })
            .collect()
    }
}

// ============================================================================
// 批量校验
// ============================================================================

/// 跨字段汇总违规
#[derive(Debug, Default)]
pub struct ValidationBatch {
    violations: Vec<FieldViolation>,
}

impl ValidationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用校验器检查一个字段
    pub fn check<'a>(mut self, validator: &FieldValidator, value: impl Into<FieldValue<'a>>) -> Self {
        self.violations.extend(validator.validate(&value.into()));
        self
    }

    /// 仅当值存在时检查（用于部分更新）
    pub fn check_present<'a, V: Into<FieldValue<'a>>>(
        self,
        validator: &FieldValidator,
        value: Option<V>,
    ) -> Self {
        match value {
            Some(value) => self.check(validator, value),
            None => self,
        }
    }

    /// 直接记录跨字段违规
    pub fn add(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.violations.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
        self
    }

    pub fn finish(self) -> Result<(), ValidationErrors> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors {
                violations: self.violations,
            })
        }
    }
}

// ============================================================================
// 预置校验
// ============================================================================

fn has_control_chars(value: &FieldValue<'_>) -> bool {
    matches!(value, FieldValue::Text(s) if s.chars().any(char::is_control))
}

fn name_validator(field: &str, max: usize) -> FieldValidator {
    FieldValidator::new(field)
        .required()
        .string_length(Some(1), Some(max))
        .custom("must not contain control characters", |v| !has_control_chars(v))
}

fn color_validator() -> FieldValidator {
    FieldValidator::new("color").pattern(HEX_COLOR_PATTERN, "a hex color like #RGB or #RRGGBB")
}

fn note_title_validator() -> FieldValidator {
    name_validator("title", MAX_NOTE_TITLE_LENGTH)
}

fn tag_ids_validator() -> FieldValidator {
    FieldValidator::new("tagIds").array_length(None, Some(MAX_TAGS_PER_NOTE))
}

pub fn validate_create_folder(params: &CreateFolderParams) -> Result<(), ValidationErrors> {
    ValidationBatch::new()
        .check(&name_validator("name", MAX_FOLDER_NAME_LENGTH), &params.name)
        .finish()
}

pub fn validate_update_folder(update: &UpdateFolderParams) -> Result<(), ValidationErrors> {
    ValidationBatch::new()
        .check_present(
            &name_validator("name", MAX_FOLDER_NAME_LENGTH),
            update.name.as_ref(),
        )
        .check_present(
            &FieldValidator::new("sortOrder").number_range(Some(0.0), None),
            update.sort_order,
        )
        .finish()
}

pub fn validate_create_tag(name: &str, color: Option<&str>) -> Result<(), ValidationErrors> {
    ValidationBatch::new()
        .check(&name_validator("name", MAX_TAG_NAME_LENGTH), name)
        .check(&color_validator(), color)
        .finish()
}

pub fn validate_update_tag(update: &UpdateTagParams) -> Result<(), ValidationErrors> {
    ValidationBatch::new()
        .check_present(
            &name_validator("name", MAX_TAG_NAME_LENGTH),
            update.name.as_ref(),
        )
        .check(
            &color_validator(),
            update.color.as_ref().and_then(|c| c.as_deref()),
        )
        .finish()
}

pub fn validate_most_used_limit(limit: usize) -> Result<(), ValidationErrors> {
    ValidationBatch::new()
        .check(
            &FieldValidator::new("limit").number_range(Some(1.0), Some(1000.0)),
            limit,
        )
        .finish()
}

pub fn validate_create_note(params: &CreateNoteParams) -> Result<(), ValidationErrors> {
    ValidationBatch::new()
        .check(&note_title_validator(), &params.title)
        .check(&tag_ids_validator(), params.tag_ids.as_slice())
        .finish()
}

pub fn validate_update_note(update: &UpdateNoteParams) -> Result<(), ValidationErrors> {
    ValidationBatch::new()
        .check_present(&note_title_validator(), update.title.as_ref())
        .check_present(&tag_ids_validator(), update.tag_ids.as_deref())
        .finish()
}

/// 标记字段的跨字段规则：link 必须有 url，text 必须有 content
pub fn validate_mark_fields(
    mark_type: MarkType,
    content: Option<&str>,
    url: Option<&str>,
) -> Result<(), ValidationErrors> {
    let mut batch = ValidationBatch::new();
    match mark_type {
        MarkType::Link => {
            batch = batch.check(&FieldValidator::new("url").required(), url);
        }
        MarkType::Text => {
            batch = batch.check(&FieldValidator::new("content").required(), content);
        }
        MarkType::Image | MarkType::File | MarkType::Scan => {}
    }
    if mark_type == MarkType::Link && url.is_some_and(|u| !u.trim().is_empty()) {
        batch = batch.check(
            &FieldValidator::new("url").pattern(r"^[a-zA-Z][a-zA-Z0-9+.-]*://\S+$", "an absolute URL"),
            url,
        );
    }
    batch.finish()
}

pub fn validate_create_mark(params: &CreateMarkParams) -> Result<(), ValidationErrors> {
    validate_mark_fields(
        params.mark_type,
        params.content.as_deref(),
        params.url.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_rejects_missing_and_blank() {
        let v = FieldValidator::new("name").required();
        assert_eq!(v.validate(&FieldValue::Missing).len(), 1);
        assert_eq!(v.validate(&FieldValue::Text("  ")).len(), 1);
        assert_eq!(v.validate(&FieldValue::List(0)).len(), 1);
        assert!(v.validate(&FieldValue::Text("ok")).is_empty());
    }

    #[test]
    fn test_string_length_counts_chars() {
        let v = FieldValidator::new("name").string_length(Some(1), Some(3));
        assert!(v.validate(&"笔记本".into()).is_empty());
        assert_eq!(v.validate(&"笔记本子".into()).len(), 1);
        // 缺失的可选字段不触发长度规则
        assert!(v.validate(&FieldValue::Missing).is_empty());
    }

    #[test]
    fn test_violations_accumulate_per_field() {
        let v = FieldValidator::new("name")
            .required()
            .string_length(Some(2), None)
            .pattern("^[a-z]+$", "lowercase letters");
        let violations = v.validate(&"".into());
        // 空串：required + 长度 + 正则
        assert_eq!(violations.len(), 3);
        assert!(violations.iter().all(|v| v.field == "name"));
    }

    #[test]
    fn test_array_and_number_rules() {
        let arr = FieldValidator::new("ids").array_length(Some(1), Some(2));
        assert!(arr.validate(&FieldValue::List(2)).is_empty());
        assert_eq!(arr.validate(&FieldValue::List(3)).len(), 1);

        let num = FieldValidator::new("limit").number_range(Some(1.0), Some(10.0));
        assert!(num.validate(&5usize.into()).is_empty());
        assert_eq!(num.validate(&0usize.into()).len(), 1);
        assert_eq!(num.validate(&11i64.into()).len(), 1);
    }

    #[test]
    fn test_custom_and_invalid_pattern() {
        let v = FieldValidator::new("x").custom("must be even", |v| {
            matches!(v, FieldValue::Number(n) if *n % 2.0 == 0.0)
        });
        assert!(v.validate(&4i32.into()).is_empty());
        assert_eq!(v.validate(&3i32.into())[0].message, "must be even");

        let broken = FieldValidator::new("x").pattern("(", "anything");
        assert_eq!(broken.validate(&"a".into()).len(), 1);
    }

    #[test]
    fn test_batch_aggregates_fields() {
        let errors = validate_create_tag("", Some("red")).unwrap_err();
        assert!(errors.has_field("name"));
        assert!(errors.has_field("color"));
        assert!(errors.to_string().contains("color: must be a hex color"));
    }

    #[test]
    fn test_tag_schema() {
        assert!(validate_create_tag("rust", Some("#abc")).is_ok());
        assert!(validate_create_tag("rust", Some("#A1B2C3")).is_ok());
        assert!(validate_create_tag("rust", None).is_ok());
        assert!(validate_create_tag("rust", Some("#abcd")).is_err());
        assert!(validate_create_tag(&"x".repeat(51), None).is_err());
        assert!(validate_create_tag(&"x".repeat(50), None).is_ok());

        let clear_color = UpdateTagParams {
            name: None,
            color: Some(None),
        };
        assert!(validate_update_tag(&clear_color).is_ok());
    }

    #[test]
    fn test_folder_and_note_schema() {
        let folder = CreateFolderParams {
            name: "x".repeat(101),
            ..Default::default()
        };
        assert!(validate_create_folder(&folder).is_err());

        let folder = CreateFolderParams {
            name: "line\nbreak".to_string(),
            ..Default::default()
        };
        assert!(validate_create_folder(&folder).is_err());

        let note = CreateNoteParams {
            title: "x".repeat(200),
            ..Default::default()
        };
        assert!(validate_create_note(&note).is_ok());

        let update = UpdateNoteParams {
            title: Some(String::new()),
            ..Default::default()
        };
        assert!(validate_update_note(&update).is_err());
        assert!(validate_update_note(&UpdateNoteParams::default()).is_ok());

        let reorder = UpdateFolderParams {
            sort_order: Some(-1),
            ..Default::default()
        };
        assert!(validate_update_folder(&reorder).is_err());
    }

    #[test]
    fn test_mark_cross_field_rules() {
        assert!(validate_mark_fields(MarkType::Link, None, None).is_err());
        assert!(validate_mark_fields(MarkType::Link, None, Some("https://example.com")).is_ok());
        assert!(validate_mark_fields(MarkType::Link, None, Some("not a url")).is_err());
        assert!(validate_mark_fields(MarkType::Text, Some(" "), None).is_err());
        assert!(validate_mark_fields(MarkType::Text, Some("hi"), None).is_ok());
        assert!(validate_mark_fields(MarkType::Image, None, None).is_ok());
    }
}
