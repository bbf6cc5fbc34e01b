//! Query and statistics over the database backend's table
//!
//! All filter values travel as bound parameters. The only text interpolated
//! into SQL is the vetted table name, the allow-listed sort column and
//! numeric limit/offset literals.

use crate::error::AppError;
use crate::model::LogEntry;
use crate::storage::db::vet_table_name;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use std::collections::HashMap;

/// Columns a read client may sort by. Anything else falls back to
/// `request_time`; the check keeps the interpolated ORDER BY safe.
const SORT_COLUMNS: &[&str] = &[
    "request_time",
    "processing_time_ms",
    "response_status",
    "url",
    "method",
    "app_name",
];

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Filter, pagination and sort parameters for `GET /logs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogQuery {
    pub app_name: Option<String>,
    pub method: Option<String>,
    /// Substring match on the URL.
    pub url: Option<String>,
    /// Exact code (`404`) or class shorthand (`4XX`).
    pub status_code: Option<String>,
    /// Inclusive lower bound on the request time, ISO-8601 local date-time.
    pub start_time: Option<String>,
    /// Inclusive upper bound on the request time.
    pub end_time: Option<String>,
    pub min_processing_time_ms: Option<i64>,
    /// Zero-based page index. Negative clamps to 0.
    pub page: i64,
    /// Page size, clamped to `[1, 200]`.
    pub size: i64,
    pub sort_by: String,
    pub sort_dir: String,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            app_name: None,
            method: None,
            url: None,
            status_code: None,
            start_time: None,
            end_time: None,
            min_processing_time_ms: None,
            page: 0,
            size: 20,
            sort_by: "request_time".to_string(),
            sort_dir: "DESC".to_string(),
        }
    }
}

/// Optional time range for `GET /logs/stats`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsQuery {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// One page of query results.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub content: Vec<LogEntry>,
    pub page: i64,
    pub size: i64,
    pub total_elements: i64,
    pub total_pages: i64,
}

/// Aggregate statistics over the (optionally time-bounded) table.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total_count: i64,
    pub count_by_method: HashMap<String, i64>,
    pub count_by_status: HashMap<i32, i64>,
    /// Entries without an app name are excluded from this grouping.
    pub count_by_app: HashMap<String, i64>,
    pub avg_processing_time_ms: f64,
    pub max_processing_time_ms: i64,
    /// Nearest-rank 99th percentile; `None` when the filtered set is empty.
    pub p99_processing_time_ms: Option<i64>,
}

impl LogStats {
    fn empty() -> Self {
        Self {
            total_count: 0,
            count_by_method: HashMap::new(),
            count_by_status: HashMap::new(),
            count_by_app: HashMap::new(),
            avg_processing_time_ms: 0.0,
            max_processing_time_ms: 0,
            p99_processing_time_ms: None,
        }
    }
}

enum BindValue {
    Text(String),
    Int(i64),
    Time(DateTime<Utc>),
}

pub struct LogQueryService {
    pool: SqlitePool,
    table: String,
}

impl LogQueryService {
    pub fn new(pool: SqlitePool, table_name: &str) -> anyhow::Result<Self> {
        let table = vet_table_name(table_name)?;
        Ok(Self { pool, table })
    }

    pub async fn query_logs(&self, query: &LogQuery) -> Result<LogPage, AppError> {
        let page = query.page.max(0);
        let size = query.size.clamp(1, 200);
        let (where_clause, params) = build_where(query)?;

        let count_sql = format!("SELECT COUNT(*) FROM {}{}", self.table, where_clause);
        let total: i64 = bind_params(sqlx::query(&count_sql), &params)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        let sort_column = vet_sort_column(&query.sort_by);
        let direction = if query.sort_dir.eq_ignore_ascii_case("asc") {
            "ASC"
        } else {
            "DESC"
        };
        // a huge page index must yield an empty page, not overflow
        let offset = page.saturating_mul(size);
        let data_sql = format!(
            "SELECT * FROM {}{} ORDER BY {} {} LIMIT {} OFFSET {}",
            self.table, where_clause, sort_column, direction, size, offset
        );
        let rows = bind_params(sqlx::query(&data_sql), &params)
            .fetch_all(&self.pool)
            .await?;
        let content = rows
            .iter()
            .map(row_to_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let total_pages = if total == 0 { 0 } else { (total - 1) / size + 1 };

        Ok(LogPage {
            content,
            page,
            size,
            total_elements: total,
            total_pages,
        })
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<LogEntry>, AppError> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    /// Distinct application names, alphabetically ordered.
    pub async fn list_apps(&self) -> Result<Vec<String>, AppError> {
        let sql = format!(
            "SELECT DISTINCT app_name FROM {} WHERE app_name IS NOT NULL ORDER BY app_name",
            self.table
        );
        let apps = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(apps)
    }

    pub async fn stats(&self, query: &StatsQuery) -> Result<LogStats, AppError> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if let Some(raw) = &query.start_time {
            conditions.push("request_time >= ?".to_string());
            params.push(BindValue::Time(parse_time(raw, "startTime")?));
        }
        if let Some(raw) = &query.end_time {
            conditions.push("request_time <= ?".to_string());
            params.push(BindValue::Time(parse_time(raw, "endTime")?));
        }
        let where_clause = render_where(&conditions);

        let count_sql = format!("SELECT COUNT(*) FROM {}{}", self.table, where_clause);
        let total: i64 = bind_params(sqlx::query(&count_sql), &params)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        if total == 0 {
            return Ok(LogStats::empty());
        }

        let method_sql = format!(
            "SELECT method, COUNT(*) FROM {}{} GROUP BY method",
            self.table, where_clause
        );
        let count_by_method = bind_params(sqlx::query(&method_sql), &params)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| Ok((row.try_get::<String, _>(0)?, row.try_get::<i64, _>(1)?)))
            .collect::<Result<HashMap<_, _>, sqlx::Error>>()?;

        let status_sql = format!(
            "SELECT response_status, COUNT(*) FROM {}{} GROUP BY response_status",
            self.table, where_clause
        );
        let count_by_status = bind_params(sqlx::query(&status_sql), &params)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| Ok((row.try_get::<i32, _>(0)?, row.try_get::<i64, _>(1)?)))
            .collect::<Result<HashMap<_, _>, sqlx::Error>>()?;

        let app_where = if conditions.is_empty() {
            " WHERE app_name IS NOT NULL".to_string()
        } else {
            format!("{where_clause} AND app_name IS NOT NULL")
        };
        let app_sql = format!(
            "SELECT app_name, COUNT(*) FROM {}{} GROUP BY app_name",
            self.table, app_where
        );
        let count_by_app = bind_params(sqlx::query(&app_sql), &params)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| Ok((row.try_get::<String, _>(0)?, row.try_get::<i64, _>(1)?)))
            .collect::<Result<HashMap<_, _>, sqlx::Error>>()?;

        let avg_sql = format!(
            "SELECT AVG(processing_time_ms) FROM {}{}",
            self.table, where_clause
        );
        let avg: Option<f64> = bind_params(sqlx::query(&avg_sql), &params)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        let max_sql = format!(
            "SELECT MAX(processing_time_ms) FROM {}{}",
            self.table, where_clause
        );
        let max: Option<i64> = bind_params(sqlx::query(&max_sql), &params)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        // nearest-rank, not interpolated
        let rank = (total * 99 / 100).min(total - 1);
        let p99_sql = format!(
            "SELECT processing_time_ms FROM {}{} ORDER BY processing_time_ms ASC LIMIT 1 OFFSET {}",
            self.table, where_clause, rank
        );
        let p99: Option<i64> = bind_params(sqlx::query(&p99_sql), &params)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get(0))
            .transpose()?;

        Ok(LogStats {
            total_count: total,
            count_by_method,
            count_by_status,
            count_by_app,
            avg_processing_time_ms: avg.unwrap_or(0.0),
            max_processing_time_ms: max.unwrap_or(0),
            p99_processing_time_ms: p99,
        })
    }
}

fn vet_sort_column(requested: &str) -> &'static str {
    SORT_COLUMNS
        .iter()
        .find(|c| **c == requested)
        .copied()
        .unwrap_or("request_time")
}

fn parse_time(raw: &str, field: &str) -> Result<DateTime<Utc>, AppError> {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|_| {
            AppError::Validation(format!(
                "Invalid {field}: '{raw}', expected an ISO-8601 date-time like 2024-01-31T12:00:00"
            ))
        })
}

/// Exact status code or `[1-9]XX` class shorthand mapped to a half-open
/// range. Anything else is a validation error.
fn parse_status_filter(raw: &str) -> Result<(i32, Option<i32>), AppError> {
    if let Ok(code) = raw.parse::<i32>() {
        return Ok((code, None));
    }
    let upper = raw.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    if bytes.len() == 3 && (b'1'..=b'9').contains(&bytes[0]) && &upper[1..] == "XX" {
        let class = i32::from(bytes[0] - b'0');
        return Ok((class * 100, Some(class * 100 + 100)));
    }
    Err(AppError::Validation(format!(
        "Invalid statusCode: '{raw}', expected a number or a class like 4XX"
    )))
}

fn build_where(query: &LogQuery) -> Result<(String, Vec<BindValue>), AppError> {
    let mut conditions: Vec<String> = Vec::new();
    let mut params = Vec::new();

    if let Some(app) = &query.app_name {
        conditions.push("app_name = ?".to_string());
        params.push(BindValue::Text(app.clone()));
    }
    if let Some(method) = &query.method {
        conditions.push("UPPER(method) = UPPER(?)".to_string());
        params.push(BindValue::Text(method.clone()));
    }
    if let Some(url) = &query.url {
        conditions.push("url LIKE '%' || ? || '%'".to_string());
        params.push(BindValue::Text(url.clone()));
    }
    if let Some(raw) = &query.status_code {
        match parse_status_filter(raw)? {
            (code, None) => {
                conditions.push("response_status = ?".to_string());
                params.push(BindValue::Int(i64::from(code)));
            }
            (lower, Some(upper)) => {
                conditions.push("response_status >= ? AND response_status < ?".to_string());
                params.push(BindValue::Int(i64::from(lower)));
                params.push(BindValue::Int(i64::from(upper)));
            }
        }
    }
    if let Some(raw) = &query.start_time {
        conditions.push("request_time >= ?".to_string());
        params.push(BindValue::Time(parse_time(raw, "startTime")?));
    }
    if let Some(raw) = &query.end_time {
        conditions.push("request_time <= ?".to_string());
        params.push(BindValue::Time(parse_time(raw, "endTime")?));
    }
    if let Some(min) = query.min_processing_time_ms {
        conditions.push("processing_time_ms >= ?".to_string());
        params.push(BindValue::Int(min));
    }

    Ok((render_where(&conditions), params))
}

fn render_where(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [BindValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            BindValue::Text(s) => query.bind(s.as_str()),
            BindValue::Int(i) => query.bind(*i),
            BindValue::Time(t) => query.bind(*t),
        };
    }
    query
}

fn row_to_entry(row: &SqliteRow) -> Result<LogEntry, AppError> {
    let query_params = match row.try_get::<Option<String>, _>("query_params")? {
        Some(raw) => serde_json::from_str(&raw)?,
        None => HashMap::new(),
    };
    let request_headers = match row.try_get::<Option<String>, _>("request_headers")? {
        Some(raw) => serde_json::from_str(&raw)?,
        None => HashMap::new(),
    };

    Ok(LogEntry {
        id: row.try_get("id")?,
        app_name: row.try_get("app_name")?,
        url: row.try_get("url")?,
        method: row.try_get("method")?,
        query_params,
        request_headers,
        request_body: row.try_get("request_body")?,
        response_status: row.try_get("response_status")?,
        response_content_type: row.try_get("response_content_type")?,
        response_body: row.try_get("response_body")?,
        request_time: row.try_get("request_time")?,
        response_time: row.try_get("response_time")?,
        processing_time_ms: row.try_get("processing_time_ms")?,
        server_name: row.try_get("server_name")?,
        server_port: row.try_get("server_port")?,
        remote_addr: row.try_get("remote_addr")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbStorageConfig;
    use crate::storage::DbStorage;
    use chrono::TimeZone;

    async fn seeded_service(entries: Vec<LogEntry>) -> LogQueryService {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let storage = DbStorage::with_pool(pool.clone(), &DbStorageConfig::default())
            .await
            .unwrap();
        for entry in &entries {
            storage.save(entry).await.unwrap();
        }
        LogQueryService::new(pool, "api_logs").unwrap()
    }

    fn entry(status: i32, duration: i64) -> LogEntry {
        LogEntry {
            id: LogEntry::new_id(),
            app_name: Some("shop".to_string()),
            url: "/api/orders".to_string(),
            method: "GET".to_string(),
            query_params: HashMap::new(),
            request_headers: HashMap::new(),
            request_body: None,
            response_status: status,
            response_content_type: None,
            response_body: None,
            request_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            response_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 1).unwrap(),
            processing_time_ms: duration,
            server_name: None,
            server_port: None,
            remote_addr: None,
        }
    }

    #[test]
    fn test_parse_status_filter() {
        assert_eq!(parse_status_filter("404").unwrap(), (404, None));
        assert_eq!(parse_status_filter("4XX").unwrap(), (400, Some(500)));
        assert_eq!(parse_status_filter("2xx").unwrap(), (200, Some(300)));
        assert!(parse_status_filter("0XX").is_err());
        assert!(parse_status_filter("ABC").is_err());
        assert!(parse_status_filter("4X").is_err());
    }

    #[test]
    fn test_vet_sort_column_fallback() {
        assert_eq!(vet_sort_column("processing_time_ms"), "processing_time_ms");
        assert_eq!(vet_sort_column("id; DROP TABLE api_logs"), "request_time");
    }

    #[test]
    fn test_parse_time() {
        assert!(parse_time("2024-06-01T12:00:00", "startTime").is_ok());
        assert!(parse_time("2024-06-01T12:00:00.123", "startTime").is_ok());
        assert!(parse_time("June first", "startTime").is_err());
    }

    #[tokio::test]
    async fn test_status_class_is_half_open_range() {
        let service = seeded_service(vec![
            entry(399, 1),
            entry(400, 1),
            entry(404, 1),
            entry(499, 1),
            entry(500, 1),
        ])
        .await;

        let query = LogQuery {
            status_code: Some("4XX".to_string()),
            ..LogQuery::default()
        };
        let page = service.query_logs(&query).await.unwrap();
        assert_eq!(page.total_elements, 3);
        assert!(page
            .content
            .iter()
            .all(|e| (400..500).contains(&e.response_status)));
    }

    #[tokio::test]
    async fn test_invalid_status_code_is_a_validation_error() {
        let service = seeded_service(vec![entry(200, 1)]).await;
        let query = LogQuery {
            status_code: Some("ABC".to_string()),
            ..LogQuery::default()
        };
        match service.query_logs(&query).await {
            Err(AppError::Validation(_)) => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_time_is_a_validation_error() {
        let service = seeded_service(vec![entry(200, 1)]).await;
        let query = LogQuery {
            start_time: Some("yesterday".to_string()),
            ..LogQuery::default()
        };
        assert!(matches!(
            service.query_logs(&query).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_pagination_last_partial_page() {
        let entries = (0..45).map(|i| entry(200, i)).collect();
        let service = seeded_service(entries).await;

        let query = LogQuery {
            page: 2,
            size: 20,
            ..LogQuery::default()
        };
        let page = service.query_logs(&query).await.unwrap();
        assert_eq!(page.total_elements, 45);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.content.len(), 5);
    }

    #[tokio::test]
    async fn test_negative_page_and_oversized_size_clamp() {
        let service = seeded_service(vec![entry(200, 1), entry(200, 2)]).await;
        let query = LogQuery {
            page: -3,
            size: 9999,
            ..LogQuery::default()
        };
        let page = service.query_logs(&query).await.unwrap();
        assert_eq!(page.page, 0);
        assert_eq!(page.size, 200);
        assert_eq!(page.total_pages, 1);
    }

    #[tokio::test]
    async fn test_huge_page_index_returns_empty_page() {
        let service = seeded_service(vec![entry(200, 1)]).await;
        let query = LogQuery {
            page: i64::MAX / 2,
            size: 20,
            ..LogQuery::default()
        };
        let page = service.query_logs(&query).await.unwrap();
        assert_eq!(page.total_elements, 1);
        assert!(page.content.is_empty());
    }

    #[tokio::test]
    async fn test_sort_ascending_by_duration() {
        let service = seeded_service(vec![entry(200, 30), entry(200, 10), entry(200, 20)]).await;
        let query = LogQuery {
            sort_by: "processing_time_ms".to_string(),
            sort_dir: "asc".to_string(),
            ..LogQuery::default()
        };
        let page = service.query_logs(&query).await.unwrap();
        let durations: Vec<i64> = page.content.iter().map(|e| e.processing_time_ms).collect();
        assert_eq!(durations, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let e = entry(200, 5);
        let id = e.id.clone();
        let service = seeded_service(vec![e]).await;

        let found = service.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.response_status, 200);
        assert!(service.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_apps_distinct_sorted() {
        let mut a = entry(200, 1);
        a.app_name = Some("zeta".to_string());
        let mut b = entry(200, 1);
        b.app_name = Some("alpha".to_string());
        let mut c = entry(200, 1);
        c.app_name = Some("alpha".to_string());
        let mut d = entry(200, 1);
        d.app_name = None;
        let service = seeded_service(vec![a, b, c, d]).await;

        let apps = service.list_apps().await.unwrap();
        assert_eq!(apps, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_p99_nearest_rank() {
        // durations 10..=100; rank = 10*99/100 = 9 -> last value
        let entries = (1..=10).map(|i| entry(200, i * 10)).collect();
        let service = seeded_service(entries).await;

        let stats = service.stats(&StatsQuery::default()).await.unwrap();
        assert_eq!(stats.total_count, 10);
        assert_eq!(stats.p99_processing_time_ms, Some(100));
        assert_eq!(stats.max_processing_time_ms, 100);
        assert!((stats.avg_processing_time_ms - 55.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_stats_empty_set() {
        let service = seeded_service(Vec::new()).await;
        let stats = service.stats(&StatsQuery::default()).await.unwrap();
        assert_eq!(stats.total_count, 0);
        assert_eq!(stats.p99_processing_time_ms, None);
        assert!(stats.count_by_method.is_empty());
    }

    #[tokio::test]
    async fn test_stats_groupings_exclude_null_app() {
        let mut a = entry(200, 1);
        a.method = "POST".to_string();
        let mut b = entry(404, 2);
        b.app_name = None;
        let service = seeded_service(vec![a, b]).await;

        let stats = service.stats(&StatsQuery::default()).await.unwrap();
        assert_eq!(stats.count_by_method["POST"], 1);
        assert_eq!(stats.count_by_method["GET"], 1);
        assert_eq!(stats.count_by_status[&200], 1);
        assert_eq!(stats.count_by_status[&404], 1);
        assert_eq!(stats.count_by_app.len(), 1);
        assert_eq!(stats.count_by_app["shop"], 1);
    }
}
