use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::images::SourceImage;
use crate::prompts::RenderType;

/// One generation batch, most recent first within its log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderHistoryItem {
    pub id: i64,
    pub timestamp: String,
    pub images: Vec<String>,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditHistoryItem {
    pub id: i64,
    pub timestamp: String,
    pub prompt: String,
    pub result_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image: Option<SourceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_image: Option<SourceImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    Exterior,
    Interior,
    Floorplan,
    Edit,
}

impl HistoryKind {
    pub const ALL: [HistoryKind; 4] = [Self::Exterior, Self::Interior, Self::Floorplan, Self::Edit];

    pub fn storage_key(self) -> &'static str {
        match self {
            Self::Exterior => "exteriorRenderHistory",
            Self::Interior => "interiorRenderHistory",
            Self::Floorplan => "floorplanHistory",
            Self::Edit => "editHistory",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exterior => "exterior",
            Self::Interior => "interior",
            Self::Floorplan => "floorplan",
            Self::Edit => "edit",
        }
    }

    pub fn render_type(self) -> Option<RenderType> {
        match self {
            Self::Exterior => Some(RenderType::Exterior),
            Self::Interior => Some(RenderType::Interior),
            Self::Floorplan => Some(RenderType::Floorplan),
            Self::Edit => None,
        }
    }
}

impl From<RenderType> for HistoryKind {
    fn from(value: RenderType) -> Self {
        match value {
            RenderType::Exterior => Self::Exterior,
            RenderType::Interior => Self::Interior,
            RenderType::Floorplan => Self::Floorplan,
        }
    }
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exterior" => Ok(Self::Exterior),
            "interior" => Ok(Self::Interior),
            "floorplan" => Ok(Self::Floorplan),
            "edit" => Ok(Self::Edit),
            other => Err(format!("unknown history log '{other}'")),
        }
    }
}

/// The four durable logs. Owned by the session; the store only sees serialized copies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryLogs {
    pub exterior: Vec<RenderHistoryItem>,
    pub interior: Vec<RenderHistoryItem>,
    pub floorplan: Vec<RenderHistoryItem>,
    pub edit: Vec<EditHistoryItem>,
}

impl HistoryLogs {
    pub fn render_log(&self, render_type: RenderType) -> &[RenderHistoryItem] {
        match render_type {
            RenderType::Exterior => &self.exterior,
            RenderType::Interior => &self.interior,
            RenderType::Floorplan => &self.floorplan,
        }
    }

    fn render_log_mut(&mut self, render_type: RenderType) -> &mut Vec<RenderHistoryItem> {
        match render_type {
            RenderType::Exterior => &mut self.exterior,
            RenderType::Interior => &mut self.interior,
            RenderType::Floorplan => &mut self.floorplan,
        }
    }

    pub fn len(&self, kind: HistoryKind) -> usize {
        match kind.render_type() {
            Some(render_type) => self.render_log(render_type).len(),
            None => self.edit.len(),
        }
    }

    pub fn is_empty(&self, kind: HistoryKind) -> bool {
        self.len(kind) == 0
    }

    /// Creates a render item for `render_type` and puts it at the head of that log.
    pub fn record_render(
        &mut self,
        render_type: RenderType,
        images: Vec<String>,
        prompt: String,
        now: DateTime<Utc>,
    ) -> &RenderHistoryItem {
        let log = self.render_log_mut(render_type);
        let id = next_history_id(now, log.first().map(|item| item.id));
        log.insert(
            0,
            RenderHistoryItem {
                id,
                timestamp: display_timestamp(now),
                images,
                prompt,
            },
        );
        &log[0]
    }

    pub fn record_edit(
        &mut self,
        prompt: String,
        result_image: String,
        source_image: Option<SourceImage>,
        mask_image: Option<SourceImage>,
        now: DateTime<Utc>,
    ) -> &EditHistoryItem {
        let id = next_history_id(now, self.edit.first().map(|item| item.id));
        self.edit.insert(
            0,
            EditHistoryItem {
                id,
                timestamp: display_timestamp(now),
                prompt,
                result_image,
                source_image,
                mask_image,
            },
        );
        &self.edit[0]
    }

    pub fn find_render(&self, render_type: RenderType, id: i64) -> Option<&RenderHistoryItem> {
        self.render_log(render_type).iter().find(|item| item.id == id)
    }

    pub fn find_edit(&self, id: i64) -> Option<&EditHistoryItem> {
        self.edit.iter().find(|item| item.id == id)
    }

    pub fn clear(&mut self, kind: HistoryKind) {
        match kind.render_type() {
            Some(render_type) => self.render_log_mut(render_type).clear(),
            None => self.edit.clear(),
        }
    }

    /// Swaps `original` for `upscaled` in the newest item of each render log that holds it.
    ///
    /// Only one position per log changes: `position` when it holds `original`, otherwise the
    /// first occurrence. A result set does not remember which log it came from, so every
    /// render log is scanned. Returns the logs that changed.
    pub fn patch_upscaled(
        &mut self,
        original: &str,
        position: usize,
        upscaled: &str,
    ) -> Vec<RenderType> {
        let mut touched = Vec::new();
        for render_type in RenderType::ALL {
            let log = self.render_log_mut(render_type);
            let Some(item) = log
                .iter_mut()
                .find(|item| item.images.iter().any(|image| image == original))
            else {
                continue;
            };
            let slot = if item.images.get(position).map(String::as_str) == Some(original) {
                Some(position)
            } else {
                item.images.iter().position(|image| image == original)
            };
            if let Some(slot) = slot {
                item.images[slot] = upscaled.to_string();
                touched.push(render_type);
            }
        }
        touched
    }
}

/// Millisecond timestamp, bumped past the current head so ids stay strictly increasing.
pub fn next_history_id(now: DateTime<Utc>, head: Option<i64>) -> i64 {
    let stamp = now.timestamp_millis();
    match head {
        Some(previous) if previous >= stamp => previous + 1,
        _ => stamp,
    }
}

pub fn display_timestamp(now: DateTime<Utc>) -> String {
    now.with_timezone(&Local).format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().unwrap()
    }

    #[test]
    fn record_render_prepends_to_matching_log_only() {
        let mut logs = HistoryLogs::default();
        logs.record_render(RenderType::Exterior, vec!["a".into()], "first".into(), at(1_000));
        logs.record_render(RenderType::Exterior, vec!["b".into()], "second".into(), at(2_000));

        assert_eq!(logs.exterior.len(), 2);
        assert_eq!(logs.exterior[0].prompt, "second");
        assert_eq!(logs.exterior[1].prompt, "first");
        assert!(logs.interior.is_empty());
        assert!(logs.floorplan.is_empty());
    }

    #[test]
    fn ids_stay_strictly_increasing_within_a_log() {
        let mut logs = HistoryLogs::default();
        let first = logs
            .record_render(RenderType::Interior, vec![], "a".into(), at(5_000))
            .id;
        let second = logs
            .record_render(RenderType::Interior, vec![], "b".into(), at(5_000))
            .id;
        assert_eq!(first, 5_000);
        assert_eq!(second, 5_001);
    }

    #[test]
    fn patch_upscaled_touches_only_logs_containing_the_url() {
        let mut logs = HistoryLogs::default();
        logs.record_render(
            RenderType::Exterior,
            vec!["data:image/png;base64,AAA".into(), "data:image/png;base64,XXX".into()],
            "house".into(),
            at(1_000),
        );
        logs.record_render(
            RenderType::Interior,
            vec!["data:image/png;base64,BBB".into()],
            "room".into(),
            at(1_000),
        );
        let interior_before = logs.interior.clone();

        let touched =
            logs.patch_upscaled("data:image/png;base64,XXX", 1, "data:image/png;base64,UP");

        assert_eq!(touched, vec![RenderType::Exterior]);
        assert_eq!(
            logs.exterior[0].images,
            vec!["data:image/png;base64,AAA", "data:image/png;base64,UP"]
        );
        assert_eq!(logs.interior, interior_before);
    }

    #[test]
    fn patch_upscaled_replaces_a_single_duplicate() {
        let mut logs = HistoryLogs::default();
        let same = "data:image/png;base64,SAME".to_string();
        logs.record_render(RenderType::Exterior, vec![same.clone(); 4], "older".into(), at(1_000));
        logs.record_render(RenderType::Exterior, vec![same.clone(); 4], "newer".into(), at(2_000));

        let touched = logs.patch_upscaled(&same, 2, "data:image/png;base64,UP");

        assert_eq!(touched, vec![RenderType::Exterior]);
        assert_eq!(
            logs.exterior[0].images,
            vec![same.as_str(), same.as_str(), "data:image/png;base64,UP", same.as_str()]
        );
        assert_eq!(logs.exterior[1].images, vec![same.clone(); 4]);

        // Falls back to the first occurrence when the position does not hold the URL.
        let touched = logs.patch_upscaled(&same, 2, "data:image/png;base64,UP2");
        assert_eq!(touched, vec![RenderType::Exterior]);
        assert_eq!(logs.exterior[0].images[0], "data:image/png;base64,UP2");
        assert_eq!(logs.exterior[0].images[2], "data:image/png;base64,UP");
    }

    #[test]
    fn clear_empties_exactly_one_log() {
        let mut logs = HistoryLogs::default();
        for render_type in RenderType::ALL {
            logs.record_render(render_type, vec!["x".into()], "p".into(), at(1));
        }
        logs.record_edit("e".into(), "r".into(), None, None, at(1));

        logs.clear(HistoryKind::Floorplan);

        assert!(logs.is_empty(HistoryKind::Floorplan));
        assert_eq!(logs.len(HistoryKind::Exterior), 1);
        assert_eq!(logs.len(HistoryKind::Interior), 1);
        assert_eq!(logs.len(HistoryKind::Edit), 1);
    }

    #[test]
    fn items_serialize_with_camel_case_keys() -> anyhow::Result<()> {
        let mut logs = HistoryLogs::default();
        logs.record_edit("lamp".into(), "data:image/png;base64,R".into(), None, None, at(7));
        let value = serde_json::to_value(&logs.edit[0])?;
        assert_eq!(value["resultImage"], "data:image/png;base64,R");
        assert!(value.get("sourceImage").is_none());

        let parsed: EditHistoryItem = serde_json::from_value(value)?;
        assert_eq!(parsed, logs.edit[0]);
        Ok(())
    }

    #[test]
    fn storage_keys_are_distinct() {
        let keys: Vec<&str> = HistoryKind::ALL.iter().map(|kind| kind.storage_key()).collect();
        assert_eq!(
            keys,
            vec!["exteriorRenderHistory", "interiorRenderHistory", "floorplanHistory", "editHistory"]
        );
    }
}
