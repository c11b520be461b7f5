use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenant::TenantCode;

/// The signed-in portal user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Platforms the user may switch between.
    #[serde(default)]
    pub platforms: Vec<TenantCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub widget_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    Kpi,
    LineChart,
    BarChart,
    PieChart,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: i64,
    pub title: String,
    pub kind: WidgetKind,
    /// Saved report feeding this widget, if any.
    #[serde(default)]
    pub report_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub label: String,
    pub value: f64,
}

/// Data backing one rendered widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetData {
    pub widget_id: i64,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub series: Vec<SeriesPoint>,
    pub generated_at: DateTime<Utc>,
}

/// Filters applied to widget and report reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    pub sql: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Tabular result of running a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub code: TenantCode,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationStatus {
    Idle,
    Running,
    Maintenance,
    Offline,
}

/// A workshop/production station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: i64,
    pub name: String,
    pub status: StationStatus,
    #[serde(default)]
    pub workshop: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationDraft {
    pub name: String,
    pub status: StationStatus,
    #[serde(default)]
    pub workshop: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStage {
    Released,
    InProgress,
    QualityCheck,
    Completed,
}

/// A work order located by scanning its QR code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: i64,
    pub qr_code: String,
    pub stage: WorkOrderStage,
    #[serde(default)]
    pub station_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: Uuid,
    pub title: String,
    /// Rich-text body as authored.
    pub body_html: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementDraft {
    pub title: String,
    pub body_html: String,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_rejects_reserved_code() {
        let json = r#"{"code": "none", "name": "Nobody"}"#;
        assert!(serde_json::from_str::<Platform>(json).is_err());

        let json = r#"{"code": "acme", "name": "Acme"}"#;
        let platform: Platform = serde_json::from_str(json).expect("valid platform");
        assert!(platform.active);
    }

    #[test]
    fn test_date_range_skips_empty_bounds() {
        let range = DateRange {
            from: Some("2024-01-01".into()),
            to: None,
        };
        assert_eq!(
            serde_json::to_value(&range).expect("serializable"),
            serde_json::json!({"from": "2024-01-01"})
        );
    }
}
