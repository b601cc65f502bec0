//! Feed data model — raw wire records and the normalized `Item`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Identifier of an item within its feed. Monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record as returned by the feed's history API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: i64,
    /// Unix seconds.
    pub date: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub views: Option<i64>,
    #[serde(default)]
    pub forwards: Option<i64>,
    #[serde(default)]
    pub reply_to_msg_id: Option<i64>,
    #[serde(default)]
    pub grouped_id: Option<i64>,
    #[serde(default)]
    pub edit_date: Option<i64>,
    #[serde(default)]
    pub media: Option<RawMedia>,
    #[serde(default)]
    pub entities: Vec<RawEntity>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMedia {
    pub kind: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A formatting entity inside the message text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEntity {
    pub kind: String,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub length: usize,
    /// Target of a `text_url` entity.
    #[serde(default)]
    pub url: Option<String>,
}

/// One attachment carried by an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: String,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub size: Option<u64>,
    pub url: Option<String>,
}

/// Normalized content of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPayload {
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub links: Vec<String>,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub reply_to: Option<ItemId>,
    pub album_id: Option<i64>,
    pub edited_at: Option<DateTime<Utc>>,
}

/// A feed entry, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    pub payload: ItemPayload,
}

impl Item {
    /// Normalize a raw feed record into an `Item`.
    pub fn from_record(channel: &str, record: RawRecord) -> Result<Self, FeedError> {
        let timestamp =
            DateTime::from_timestamp(record.date, 0).ok_or_else(|| FeedError::InvalidRecord {
                id: record.id,
                reason: format!("date {} out of range", record.date),
            })?;

        let links = extract_links(&record.message, &record.entities);

        let text = record.message.trim();
        let text = (!text.is_empty()).then(|| text.to_string());

        let attachments = record
            .media
            .map(|m| Attachment {
                kind: m.kind,
                mime_type: m.mime_type,
                file_name: m.file_name,
                size: m.size,
                url: m.url,
            })
            .into_iter()
            .collect();

        Ok(Self {
            id: ItemId(record.id),
            channel: channel.to_string(),
            timestamp,
            payload: ItemPayload {
                text,
                attachments,
                links,
                views: record.views,
                forwards: record.forwards,
                reply_to: record.reply_to_msg_id.map(ItemId),
                album_id: record.grouped_id,
                // A bad edit date is not worth dropping the item for.
                edited_at: record.edit_date.and_then(|d| DateTime::from_timestamp(d, 0)),
            },
        })
    }
}

/// Collect link targets from `url` and `text_url` entities, first-seen order.
///
/// Entity offsets are in UTF-16 code units, as the feed reports them.
fn extract_links(text: &str, entities: &[RawEntity]) -> Vec<String> {
    let utf16: Vec<u16> = text.encode_utf16().collect();
    let mut links: Vec<String> = Vec::new();

    for entity in entities {
        let link = match entity.kind.as_str() {
            "text_url" => entity.url.clone(),
            "url" => utf16
                .get(entity.offset..entity.offset.saturating_add(entity.length))
                .and_then(|slice| String::from_utf16(slice).ok()),
            _ => None,
        };
        if let Some(link) = link
            && !link.is_empty()
            && !links.contains(&link)
        {
            links.push(link);
        }
    }

    links
}
