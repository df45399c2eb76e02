//! Generic cell rendering keyed by column value type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::columns::{derive, CellSource, ColumnSpec, ValueType};
use crate::kind::ResourceKind;
use crate::path::{extract, scalar_text};

/// Rendered in place of absent or empty values.
pub const PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub text: String,
    /// Detail route for name cells.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Cell {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() { Self::placeholder() } else { Self { text, link: None } }
    }

    pub fn placeholder() -> Self {
        Self { text: PLACEHOLDER.to_string(), link: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DateStyle {
    /// `3d4h`, `12m`, ...
    #[default]
    Relative,
    /// RFC 3339, seconds precision.
    Absolute,
}

/// Everything a render pass needs besides the column and the document.
#[derive(Debug, Clone)]
pub struct RenderCtx<'a> {
    pub kind: &'a ResourceKind,
    pub now: DateTime<Utc>,
    pub dates: DateStyle,
}

impl<'a> RenderCtx<'a> {
    pub fn new(kind: &'a ResourceKind) -> Self {
        Self { kind, now: Utc::now(), dates: DateStyle::Relative }
    }
}

pub fn render_cell(col: &ColumnSpec, doc: &Value, ctx: &RenderCtx<'_>) -> Cell {
    match &col.source {
        CellSource::NameLink => {
            let name = crate::name_of(doc);
            if name.is_empty() {
                return Cell::placeholder();
            }
            Cell { text: name.to_string(), link: Some(ctx.kind.detail_path(crate::namespace_of(doc), name)) }
        }
        CellSource::Field => Cell::text(format_value(extract(doc, &col.field_path), col.value_type, ctx)),
        CellSource::Derived(d) => match derive(*d, ctx.kind, doc) {
            Some(s) => Cell::text(s),
            None => Cell::placeholder(),
        },
    }
}

pub fn render_row(cols: &[ColumnSpec], doc: &Value, ctx: &RenderCtx<'_>) -> Vec<Cell> {
    cols.iter().map(|c| render_cell(c, doc, ctx)).collect()
}

/// Format one value for display. Returns "" for absent values; callers substitute the placeholder.
pub fn format_value(v: Option<&Value>, ty: ValueType, ctx: &RenderCtx<'_>) -> String {
    let Some(v) = v else { return String::new() };
    match (ty, v) {
        (_, Value::Null) => String::new(),
        (ValueType::Date, Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => {
                let dt = dt.with_timezone(&Utc);
                match ctx.dates {
                    DateStyle::Relative => render_age(dt, ctx.now),
                    DateStyle::Absolute => dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                }
            }
            Err(_) => s.clone(),
        },
        (ValueType::Boolean, Value::Bool(b)) => if *b { "True".into() } else { "False".into() },
        (ValueType::Boolean, Value::String(s)) if s.eq_ignore_ascii_case("true") => "True".into(),
        (ValueType::Boolean, Value::String(s)) if s.eq_ignore_ascii_case("false") => "False".into(),
        (_, Value::Array(items)) => items
            .iter()
            .map(|i| scalar_text(i).unwrap_or_else(|| i.to_string()))
            .collect::<Vec<_>>()
            .join(","),
        (_, Value::Object(_)) => v.to_string(),
        (_, other) => scalar_text(other).unwrap_or_default(),
    }
}

/// Compact age: `2d3h`, `5h10m`, `12m`, `40s`.
pub fn render_age(created: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let mut secs = (now - created).num_seconds().max(0) as u64;
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;
    if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{known_columns, name_column};
    use crate::kind::KnownKind;
    use serde_json::json;

    fn ctx(kind: &ResourceKind) -> RenderCtx<'_> {
        let now = DateTime::parse_from_rfc3339("2024-01-03T04:00:00Z").unwrap().with_timezone(&Utc);
        RenderCtx { kind, now, dates: DateStyle::Relative }
    }

    #[test]
    fn name_cell_links_to_detail_route() {
        let kind = ResourceKind::Known(KnownKind::Deployments);
        let doc = json!({ "metadata": { "name": "web", "namespace": "prod" } });
        let cell = render_cell(&name_column(), &doc, &ctx(&kind));
        assert_eq!(cell.text, "web");
        assert_eq!(cell.link.as_deref(), Some("/deployments/prod/web"));
    }

    #[test]
    fn absent_and_empty_values_render_placeholder() {
        let kind = ResourceKind::parse("widgets.example.com");
        let col = ColumnSpec::field("status.phase", "Phase", "status.phase", ValueType::String);
        let c = ctx(&kind);
        assert_eq!(render_cell(&col, &json!({}), &c).text, PLACEHOLDER);
        assert_eq!(render_cell(&col, &json!({ "status": { "phase": "" } }), &c).text, PLACEHOLDER);
        assert_eq!(render_cell(&col, &json!({ "status": { "phase": null } }), &c).text, PLACEHOLDER);
        assert_eq!(render_cell(&col, &json!({ "status": { "phase": "Ready" } }), &c).text, "Ready");
    }

    #[test]
    fn dates_render_relative_or_absolute() {
        let kind = ResourceKind::Known(KnownKind::ConfigMaps);
        let mut c = ctx(&kind);
        let v = json!("2024-01-01T01:00:00Z");
        assert_eq!(format_value(Some(&v), ValueType::Date, &c), "2d3h");
        c.dates = DateStyle::Absolute;
        assert_eq!(format_value(Some(&v), ValueType::Date, &c), "2024-01-01T01:00:00Z");
        let junk = json!("yesterday");
        assert_eq!(format_value(Some(&junk), ValueType::Date, &c), "yesterday");
    }

    #[test]
    fn booleans_sequences_and_objects() {
        let kind = ResourceKind::Known(KnownKind::ConfigMaps);
        let c = ctx(&kind);
        assert_eq!(format_value(Some(&json!(true)), ValueType::Boolean, &c), "True");
        assert_eq!(format_value(Some(&json!("false")), ValueType::Boolean, &c), "False");
        assert_eq!(format_value(Some(&json!(["RWO", "ROX"])), ValueType::Other, &c), "RWO,ROX");
        assert_eq!(format_value(Some(&json!({ "a": 1 })), ValueType::Other, &c), "{\"a\":1}");
        assert_eq!(format_value(Some(&json!(42)), ValueType::Other, &c), "42");
    }

    #[test]
    fn ages_are_compact() {
        let now = DateTime::parse_from_rfc3339("2024-01-01T00:10:05Z").unwrap().with_timezone(&Utc);
        let t = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
        assert_eq!(render_age(t("2024-01-01T00:10:00Z"), now), "5s");
        assert_eq!(render_age(t("2024-01-01T00:00:00Z"), now), "10m");
        // future timestamps clamp to zero
        assert_eq!(render_age(t("2024-01-02T00:00:00Z"), now), "0s");
    }

    #[test]
    fn full_row_for_a_deployment() {
        let kind = ResourceKind::Known(KnownKind::Deployments);
        let doc = json!({
            "metadata": { "name": "web", "namespace": "prod", "creationTimestamp": "2024-01-03T03:00:00Z" },
            "spec": { "replicas": 3 },
            "status": { "readyReplicas": 3, "updatedReplicas": 3, "availableReplicas": 3 }
        });
        let cols = known_columns(KnownKind::Deployments);
        let row: Vec<String> = render_row(&cols, &doc, &ctx(&kind)).into_iter().map(|c| c.text).collect();
        assert_eq!(row, vec!["web", "prod", "3/3", "Available", "3", "3", "1h0m"]);
    }
}
