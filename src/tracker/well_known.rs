//! Shorthands for the events the site records everywhere. They only shape
//! `name` and `properties` before calling [`EventTracker::track`].

use serde_json::{json, Map, Value};

use crate::tracker::constants;
use crate::tracker::service::EventTracker;

impl EventTracker {
    pub fn track_page_view(&self, path: &str) {
        self.track(constants::PAGE_VIEW, json!({ "path": path }));
    }

    pub fn track_click(&self, target: &str) {
        self.track(constants::CLICK, json!({ "target": target }));
    }

    /// `meta` is merged next to the form name; a non-object `meta` is kept
    /// under `meta`.
    pub fn track_form_submit(&self, form: &str, meta: Value) {
        let mut properties = with_meta(meta);
        properties.insert("form".to_string(), Value::String(form.to_string()));
        self.track(constants::FORM_SUBMIT, Value::Object(properties));
    }

    pub fn track_tip_submission(&self, case_id: &str, meta: Value) {
        let mut properties = with_meta(meta);
        properties.insert("caseId".to_string(), Value::String(case_id.to_string()));
        self.track(constants::TIP_SUBMISSION, Value::Object(properties));
    }

    pub fn track_media_view(&self, media_id: &str, media_type: &str) {
        self.track(
            constants::MEDIA_VIEW,
            json!({ "mediaId": media_id, "mediaType": media_type }),
        );
    }

    pub fn track_search(&self, query: &str, results: usize) {
        self.track(
            constants::SEARCH,
            json!({ "query": query, "results": results }),
        );
    }

    pub fn track_share(&self, channel: &str, url: &str) {
        self.track(
            constants::SHARE_CLICK,
            json!({ "channel": channel, "url": url }),
        );
    }
}

fn with_meta(meta: Value) -> Map<String, Value> {
    match meta {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("meta".to_string(), other);
            map
        }
    }
}
