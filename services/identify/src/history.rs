use crate::auth::OwnerId;
use crate::error::{ServiceError, ServiceResult};
use crate::record_store::{IdentificationRequest, RecordStore};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Offsets must stay strictly within one day of UTC
const MAX_OFFSET_MINUTES: i32 = 24 * 60;

/// Parse a `YYYY-MM-DD` calendar date
pub fn parse_day(day: &str) -> ServiceResult<NaiveDate> {
    NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d")
        .map_err(|_| ServiceError::invalid(format!("Invalid day: {}", day)))
}

/// Parse a timezone offset in minutes east of UTC (`-480` is UTC-8)
pub fn parse_timezone_offset(timezone: &str) -> ServiceResult<i32> {
    timezone
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|minutes| (-(MAX_OFFSET_MINUTES - 1)..MAX_OFFSET_MINUTES).contains(minutes))
        .ok_or_else(|| ServiceError::invalid(format!("Invalid timezone: {}", timezone)))
}

/// Half-open UTC window `[start, end)` covering local `day` at the given offset
pub fn day_window(
    day: NaiveDate,
    offset_minutes: i32,
) -> ServiceResult<(DateTime<Utc>, DateTime<Utc>)> {
    let offset = offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| ServiceError::invalid(format!("Invalid timezone: {}", offset_minutes)))?;

    let local_midnight = day
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| offset.from_local_datetime(&midnight).single())
        .ok_or_else(|| ServiceError::invalid(format!("Invalid day: {}", day)))?;

    let start = local_midnight.with_timezone(&Utc);
    Ok((start, start + Duration::hours(24)))
}

/// Day-by-day view over an owner's identification history
pub struct HistoryService {
    record_store: Arc<dyn RecordStore>,
}

impl HistoryService {
    pub fn new(record_store: Arc<dyn RecordStore>) -> Self {
        Self { record_store }
    }

    /// Records created on local `day`, newest first, including pending ones
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn list_history(
        &self,
        owner: &OwnerId,
        day: NaiveDate,
        offset_minutes: i32,
    ) -> ServiceResult<Vec<IdentificationRequest>> {
        let (start, end) = day_window(day, offset_minutes)?;

        let records = self
            .record_store
            .list_created_between(owner.as_str(), start, end)
            .await?;

        debug!(start = %start, end = %end, count = records.len(), "History loaded");

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::ClassificationResult;
    use crate::record_store::memory::MemoryRecordStore;
    use uuid::Uuid;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn record(owner: &str, created_at: &str) -> IdentificationRequest {
        IdentificationRequest {
            id: Uuid::new_v4(),
            owner_id: owner.to_string(),
            image_ref: format!("users/{}/images/{}.jpeg", owner, Uuid::new_v4()),
            created_at: utc(created_at),
            updated_at: utc(created_at),
            result: None,
        }
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(
            parse_day("2024-01-15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert!(parse_day("2024-13-01").is_err());
        assert!(parse_day("15/01/2024").is_err());
        assert!(parse_day("").is_err());
    }

    #[test]
    fn test_parse_timezone_offset() {
        assert_eq!(parse_timezone_offset("-480").unwrap(), -480);
        assert_eq!(parse_timezone_offset("330").unwrap(), 330);
        assert_eq!(parse_timezone_offset("0").unwrap(), 0);
        assert_eq!(parse_timezone_offset("1439").unwrap(), 1439);
        assert_eq!(parse_timezone_offset("-1439").unwrap(), -1439);
        assert!(parse_timezone_offset("1440").is_err());
        assert!(parse_timezone_offset("-1440").is_err());
        assert!(parse_timezone_offset("-2147483648").is_err());
        assert!(parse_timezone_offset("2147483647").is_err());
        assert!(parse_timezone_offset("UTC").is_err());
        assert!(parse_timezone_offset("1.5").is_err());
    }

    #[test]
    fn test_day_window_west_of_utc() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let (start, end) = day_window(day, -480).unwrap();

        assert_eq!(start, utc("2024-01-15T08:00:00Z"));
        assert_eq!(end, utc("2024-01-16T08:00:00Z"));
    }

    #[test]
    fn test_day_window_east_of_utc() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let (start, end) = day_window(day, 330).unwrap();

        assert_eq!(start, utc("2024-02-29T18:30:00Z"));
        assert_eq!(end - start, Duration::hours(24));
    }

    #[test]
    fn test_day_window_rejects_overflowing_offset() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert!(day_window(day, i32::MIN).is_err());
        assert!(day_window(day, i32::MAX).is_err());
    }

    #[tokio::test]
    async fn test_list_history_window_and_order() {
        let store = Arc::new(MemoryRecordStore::new());
        // Local day 2024-01-15 at UTC-8 is [08:00Z, next day 08:00Z)
        store.insert(record("uid-a", "2024-01-15T07:59:59Z"));
        let first = record("uid-a", "2024-01-15T08:00:00Z");
        let second = record("uid-a", "2024-01-16T07:59:59Z");
        store.insert(first.clone());
        store.insert(second.clone());
        store.insert(record("uid-a", "2024-01-16T08:00:00Z"));

        let history = HistoryService::new(store);
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        let entries = history
            .list_history(&OwnerId::new("uid-a"), day, -480)
            .await
            .unwrap();

        assert_eq!(entries, vec![second, first]);
    }

    #[tokio::test]
    async fn test_list_history_is_owner_scoped() {
        let store = Arc::new(MemoryRecordStore::new());
        store.insert(record("uid-a", "2024-01-15T12:00:00Z"));
        store.insert(record("uid-b", "2024-01-15T12:00:00Z"));
        store.insert(record("uid-b", "2024-01-15T13:00:00Z"));

        let history = HistoryService::new(store);
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        let entries = history
            .list_history(&OwnerId::new("uid-a"), day, 0)
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert!(entries.iter().all(|e| e.owner_id == "uid-a"));
    }

    #[tokio::test]
    async fn test_list_history_is_idempotent_and_keeps_pending() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut done = record("uid-a", "2024-01-15T10:00:00Z");
        done.result = Some(ClassificationResult {
            reasoning_trace: String::new(),
            scientific_name: "Ficus elastica".to_string(),
            common_names: vec!["Rubber plant".to_string()],
            confidence_probability: 0.7,
            explanation: String::new(),
        });
        store.insert(done);
        store.insert(record("uid-a", "2024-01-15T10:00:00Z"));

        let history = HistoryService::new(store);
        let owner = OwnerId::new("uid-a");
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        let first = history.list_history(&owner, day, 0).await.unwrap();
        let second = history.list_history(&owner, day, 0).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.iter().filter(|e| e.result.is_none()).count(), 1);
    }
}
