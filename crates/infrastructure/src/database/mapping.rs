//! 数据库行与领域实体之间的转换
//!
//! 时间戳统一以微秒精度、`Z` 结尾的 RFC3339 文本存储，定长格式保证
//! SQL 中按字符串比较与按时间比较结果一致。

use chrono::{DateTime, SecondsFormat, Utc};
use queuectl_domain::entities::{Job, Lease};
use queuectl_errors::QueueResult;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn format_timestamp(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn format_optional_timestamp(value: Option<&DateTime<Utc>>) -> Option<String> {
        value.map(Self::format_timestamp)
    }

    pub fn row_to_job(row: &SqliteRow) -> QueueResult<Job> {
        Ok(Job {
            id: row.try_get("id")?,
            command: row.try_get("command")?,
            state: row.try_get("state")?,
            attempts: row.try_get("attempts")?,
            max_retries: row.try_get("max_retries")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_error: row.try_get("last_error")?,
            next_retry_at: row.try_get("next_retry_at")?,
        })
    }

    /// 只有 locked_by 与 locked_at 同时存在才算持有租约
    pub fn row_to_lease(row: &SqliteRow) -> QueueResult<Option<Lease>> {
        let owner: Option<String> = row.try_get("locked_by")?;
        let acquired_at: Option<DateTime<Utc>> = row.try_get("locked_at")?;

        Ok(match (owner, acquired_at) {
            (Some(owner), Some(acquired_at)) => Some(Lease { owner, acquired_at }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let fractional = whole + chrono::Duration::microseconds(12);

        let a = MappingHelpers::format_timestamp(&whole);
        let b = MappingHelpers::format_timestamp(&fractional);

        assert_eq!(a, "2025-01-02T03:04:05.000000Z");
        assert_eq!(b, "2025-01-02T03:04:05.000012Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_optional_timestamp() {
        assert_eq!(MappingHelpers::format_optional_timestamp(None), None);

        let at = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            MappingHelpers::format_optional_timestamp(Some(&at)).as_deref(),
            Some("2030-06-01T00:00:00.000000Z")
        );
    }
}
