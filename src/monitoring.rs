//! Server overview polled by the monitoring page

use crate::database::QueryResult;
use crate::error::{OwlError, OwlResult};
use serde::Serialize;

const USER_TABLES: &str =
    "database NOT IN ('system', 'INFORMATION_SCHEMA', 'information_schema')";

/// One round trip collecting every metric the page shows
pub fn snapshot_query() -> String {
    format!(
        "SELECT \
         version() AS version, \
         uptime() AS uptime_seconds, \
         (SELECT count() FROM system.databases) AS databases, \
         (SELECT count() FROM system.tables WHERE {USER_TABLES}) AS tables, \
         (SELECT sum(total_rows) FROM system.tables WHERE {USER_TABLES}) AS total_rows, \
         (SELECT sum(total_bytes) FROM system.tables WHERE {USER_TABLES}) AS total_bytes, \
         (SELECT count() FROM system.processes) AS running_queries, \
         (SELECT sum(value) FROM system.metrics WHERE metric = 'MemoryTracking') AS memory_tracking"
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSnapshot {
    pub version: String,
    pub uptime_seconds: u64,
    pub databases: u64,
    pub tables: u64,
    pub total_rows: u64,
    pub total_bytes: u64,
    pub running_queries: u64,
    pub memory_tracking: u64,
}

/// ClickHouse quotes 64-bit integers in JSON output; accept both forms, null as zero
pub fn value_as_u64(value: Option<&serde_json::Value>) -> u64 {
    match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => s
            .parse::<u64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        _ => 0,
    }
}

impl MonitoringSnapshot {
    pub fn from_result(result: &QueryResult) -> OwlResult<Self> {
        if result.rows.is_empty() {
            return Err(OwlError::Query {
                code: None,
                message: "Monitoring query returned no rows".to_string(),
            });
        }
        let number = |column: &str| value_as_u64(result.first_value(column));
        Ok(Self {
            version: result
                .first_value("version")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            uptime_seconds: number("uptime_seconds"),
            databases: number("databases"),
            tables: number("tables"),
            total_rows: number("total_rows"),
            total_bytes: number("total_bytes"),
            running_queries: number("running_queries"),
            memory_tracking: number("memory_tracking"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(42), 42)]
    #[case(json!("18446744073709551615"), u64::MAX)]
    #[case(json!(null), 0)]
    #[case(json!("-5"), 0)]
    #[case(json!(1.9), 1)]
    fn test_value_as_u64(#[case] value: serde_json::Value, #[case] expected: u64) {
        assert_eq!(value_as_u64(Some(&value)), expected);
    }

    #[test]
    fn test_snapshot_from_result() {
        let result = QueryResult {
            columns: [
                "version",
                "uptime_seconds",
                "databases",
                "tables",
                "total_rows",
                "total_bytes",
                "running_queries",
                "memory_tracking",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            rows: vec![vec![
                json!("24.3.1.1"),
                json!(3600),
                json!("4"),
                json!("12"),
                json!("1000"),
                json!(null),
                json!("1"),
                json!("52428800"),
            ]],
            ..Default::default()
        };

        let snapshot = MonitoringSnapshot::from_result(&result).unwrap();
        assert_eq!(snapshot.version, "24.3.1.1");
        assert_eq!(snapshot.uptime_seconds, 3600);
        assert_eq!(snapshot.tables, 12);
        assert_eq!(snapshot.total_bytes, 0);
        assert_eq!(snapshot.memory_tracking, 52_428_800);

        let body = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(body["uptimeSeconds"], json!(3600));
        assert_eq!(body["runningQueries"], json!(1));
    }

    #[test]
    fn test_empty_result_is_an_error() {
        assert!(MonitoringSnapshot::from_result(&QueryResult::default()).is_err());
    }

    #[test]
    fn test_query_shape() {
        let sql = snapshot_query();
        assert!(sql.starts_with("SELECT version() AS version"));
        assert!(sql.contains("system.processes"));
    }
}
