//! crates/moa_core/src/normalize.rs
//!
//! Adapts heterogeneous user records into the item schema expected by
//! the diary-generation service. Records and the generation service use
//! independent, separately evolving type vocabularies; this module is
//! the only place the two are mapped onto each other.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Record, RecordKind};
use crate::ports::{ObjectStorageService, PortResult};

/// One item of the generation request payload. The `type` tag uses the
/// generation service's vocabulary (`image_with_text`, `audio`), not
/// the record store's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationItem {
    Text {
        content: String,
        time_stamp: Option<DateTime<Utc>>,
    },
    Image {
        path: String,
        time_stamp: Option<DateTime<Utc>>,
    },
    ImageWithText {
        content: String,
        path: Option<String>,
        time_stamp: Option<DateTime<Utc>>,
    },
    Audio {
        path: String,
        time_stamp: Option<DateTime<Utc>>,
    },
}

impl GenerationItem {
    pub fn time_stamp(&self) -> Option<DateTime<Utc>> {
        match self {
            GenerationItem::Text { time_stamp, .. }
            | GenerationItem::Image { time_stamp, .. }
            | GenerationItem::ImageWithText { time_stamp, .. }
            | GenerationItem::Audio { time_stamp, .. } => *time_stamp,
        }
    }

    /// True when the item carries non-empty text or a fetchable media
    /// path. The aggregation pipeline refuses to call the generation
    /// service unless at least one item has substance.
    pub fn has_substance(&self) -> bool {
        match self {
            GenerationItem::Text { content, .. } => !content.trim().is_empty(),
            GenerationItem::Image { .. } | GenerationItem::Audio { .. } => true,
            GenerationItem::ImageWithText { content, path, .. } => {
                !content.trim().is_empty() || path.is_some()
            }
        }
    }
}

/// Shapes a set of records into generation items.
///
/// Media paths are resolved to presigned URLs here because they are
/// mandatory payload content; a resolution failure propagates instead
/// of degrading. Image records that somehow lack a storage key are
/// skipped. Items are stable-sorted by source timestamp ascending; when
/// a timestamp is absent the original order is kept.
pub async fn to_generation_items(
    records: &[Record],
    storage: &dyn ObjectStorageService,
) -> PortResult<Vec<GenerationItem>> {
    let mut items = Vec::with_capacity(records.len());
    for record in records {
        let time_stamp = Some(record.created_at);
        match record.kind {
            RecordKind::Text => items.push(GenerationItem::Text {
                content: record.context.clone().unwrap_or_default(),
                time_stamp,
            }),
            RecordKind::Image => {
                if let Some(media) = &record.media {
                    let path = storage.signed_read_url(&media.key).await?;
                    items.push(GenerationItem::Image { path, time_stamp });
                }
            }
            RecordKind::TextImage => {
                let path = match &record.media {
                    Some(media) => Some(storage.signed_read_url(&media.key).await?),
                    None => None,
                };
                items.push(GenerationItem::ImageWithText {
                    content: record.context.clone().unwrap_or_default(),
                    path,
                    time_stamp,
                });
            }
            RecordKind::Audio => {
                // Only legacy audio rows carry media; voice submissions
                // are transcribed at ingestion and stored as text.
                if let Some(media) = &record.media {
                    let path = storage.signed_read_url(&media.key).await?;
                    items.push(GenerationItem::Audio { path, time_stamp });
                }
            }
        }
    }

    items.sort_by(|a, b| match (a.time_stamp(), b.time_stamp()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => Ordering::Equal,
    });
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Media;
    use crate::ports::PortError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use uuid::Uuid;

    struct FixedStorage;

    #[async_trait]
    impl ObjectStorageService for FixedStorage {
        async fn put_object(&self, _key: &str, _data: Bytes, _ct: &str) -> PortResult<()> {
            Ok(())
        }
        async fn delete_object(&self, _key: &str) -> PortResult<()> {
            Ok(())
        }
        async fn signed_read_url(&self, key: &str) -> PortResult<String> {
            Ok(format!("https://cdn.test/{key}?sig=fixed"))
        }
    }

    struct BrokenStorage;

    #[async_trait]
    impl ObjectStorageService for BrokenStorage {
        async fn put_object(&self, _key: &str, _data: Bytes, _ct: &str) -> PortResult<()> {
            Ok(())
        }
        async fn delete_object(&self, _key: &str) -> PortResult<()> {
            Ok(())
        }
        async fn signed_read_url(&self, _key: &str) -> PortResult<String> {
            Err(PortError::Unavailable("storage is down".into()))
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn record(kind: RecordKind, context: Option<&str>, key: Option<&str>, at: &str) -> Record {
        Record {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind,
            context: context.map(str::to_owned),
            media: key.map(|k| Media {
                key: k.to_owned(),
                content_type: "image/jpeg".to_owned(),
                size: 1024,
            }),
            created_at: utc(at),
            updated_at: utc(at),
        }
    }

    #[tokio::test]
    async fn text_and_image_records_become_two_ordered_items() {
        let records = vec![
            record(RecordKind::Image, None, Some("records/u/p.jpg"), "2024-01-15T03:00:00Z"),
            record(RecordKind::Text, Some("걱정되는 하루"), None, "2024-01-15T01:00:00Z"),
        ];

        let items = to_generation_items(&records, &FixedStorage).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0],
            GenerationItem::Text {
                content: "걱정되는 하루".to_owned(),
                time_stamp: Some(utc("2024-01-15T01:00:00Z")),
            }
        );
        assert_eq!(
            items[1],
            GenerationItem::Image {
                path: "https://cdn.test/records/u/p.jpg?sig=fixed".to_owned(),
                time_stamp: Some(utc("2024-01-15T03:00:00Z")),
            }
        );
    }

    #[tokio::test]
    async fn combined_record_uses_the_generation_vocabulary() {
        let records = vec![record(
            RecordKind::TextImage,
            Some("바닷가"),
            Some("records/u/sea.jpg"),
            "2024-01-15T05:00:00Z",
        )];

        let items = to_generation_items(&records, &FixedStorage).await.unwrap();
        let json = serde_json::to_value(&items).unwrap();
        assert_eq!(json[0]["type"], "image_with_text");
        assert_eq!(json[0]["content"], "바닷가");
        assert!(json[0]["path"].as_str().unwrap().starts_with("https://cdn.test/"));
    }

    #[tokio::test]
    async fn legacy_audio_record_with_media_resolves_a_path() {
        let records = vec![record(
            RecordKind::Audio,
            None,
            Some("records/u/old.webm"),
            "2024-01-15T02:00:00Z",
        )];

        let items = to_generation_items(&records, &FixedStorage).await.unwrap();
        assert!(matches!(&items[0], GenerationItem::Audio { path, .. }
            if path.contains("records/u/old.webm")));
        let json = serde_json::to_value(&items).unwrap();
        assert_eq!(json[0]["type"], "audio");
    }

    #[tokio::test]
    async fn image_record_without_a_key_is_skipped() {
        let records = vec![
            record(RecordKind::Image, None, None, "2024-01-15T02:00:00Z"),
            record(RecordKind::Text, Some("only me"), None, "2024-01-15T03:00:00Z"),
        ];

        let items = to_generation_items(&records, &FixedStorage).await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], GenerationItem::Text { content, .. } if content == "only me"));
    }

    #[tokio::test]
    async fn resolution_failure_propagates() {
        let records = vec![record(
            RecordKind::Image,
            None,
            Some("records/u/p.jpg"),
            "2024-01-15T02:00:00Z",
        )];

        let err = to_generation_items(&records, &BrokenStorage).await.unwrap_err();
        assert!(matches!(err, PortError::Unavailable(_)));
    }

    #[test]
    fn sort_without_timestamps_keeps_the_original_order() {
        let mut items = vec![
            GenerationItem::Text { content: "b".into(), time_stamp: None },
            GenerationItem::Text { content: "a".into(), time_stamp: None },
        ];
        items.sort_by(|x, y| match (x.time_stamp(), y.time_stamp()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => Ordering::Equal,
        });
        assert!(matches!(&items[0], GenerationItem::Text { content, .. } if content == "b"));
    }

    #[test]
    fn substance_check_rejects_blank_text() {
        let blank = GenerationItem::Text { content: "   ".into(), time_stamp: None };
        let text = GenerationItem::Text { content: "hi".into(), time_stamp: None };
        let combined_empty =
            GenerationItem::ImageWithText { content: String::new(), path: None, time_stamp: None };
        assert!(!blank.has_substance());
        assert!(text.has_substance());
        assert!(!combined_empty.has_substance());
    }
}
