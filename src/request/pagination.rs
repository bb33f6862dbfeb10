//! Cursor links for infinitely scrolled lists.

use serde_json::{Map, Value};

use super::context::{encode_query, RequestContext};
use super::interpret::scalar_text;

const BEFORE: &str = "before";
const AFTER: &str = "after";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrollHrefs {
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Links to the neighbouring pages of `web_path`.
///
/// A side is only linked when the current page was anchored on that side
/// or on neither; `before` additionally needs `hasBefore: true` and a
/// cursor.
pub fn scroll_hrefs(web_path: &str, query: &[(String, String)], data: &Map<String, Value>) -> ScrollHrefs {
    let anchored_before = query.iter().any(|(k, _)| k == BEFORE);
    let anchored_after = query.iter().any(|(k, _)| k == AFTER);
    let unanchored = !anchored_before && !anchored_after;

    let base: Vec<(String, String)> = query
        .iter()
        .filter(|(k, _)| k != BEFORE && k != AFTER)
        .cloned()
        .collect();
    let href = |key: &str, cursor: String| {
        let mut pairs = base.clone();
        pairs.push((key.to_string(), cursor));
        format!("{}?{}", web_path, encode_query(pairs))
    };

    let has_before = data.get("hasBefore").and_then(Value::as_bool).unwrap_or(false);
    let before = if (anchored_before || unanchored) && has_before {
        data.get("nextBefore")
            .and_then(scalar_text)
            .map(|cursor| href(BEFORE, cursor))
    } else {
        None
    };

    // without a cursor the after link still exists, minus the anchor
    let after = if anchored_after || unanchored {
        let link = match data.get("nextAfter").and_then(scalar_text) {
            Some(cursor) => href(AFTER, cursor),
            None => format!("{}?{}", web_path, encode_query(base.clone())),
        };
        Some(link)
    } else {
        None
    };

    ScrollHrefs { before, after }
}

impl RequestContext {
    /// `beforeHref`/`afterHref` for the current path from the payload.
    pub async fn set_scroll_hrefs(&mut self) {
        let path = self.parts.uri.path().to_string();
        let query = self.query_pairs();
        let hrefs = scroll_hrefs(&path, &query, self.data().await);
        self.apply_scroll_hrefs(hrefs).await;
    }

    /// Same, for a nested list object and another web path.
    pub async fn set_scroll_hrefs_with(&mut self, web_path: &str, data: &Map<String, Value>) {
        let hrefs = scroll_hrefs(web_path, &self.query_pairs(), data);
        self.apply_scroll_hrefs(hrefs).await;
    }

    async fn apply_scroll_hrefs(&mut self, hrefs: ScrollHrefs) {
        if let Some(before) = hrefs.before {
            self.set_data("beforeHref", before).await;
        }
        if let Some(after) = hrefs.after {
            self.set_data("afterHref", after).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::context::parse_query;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("object expected"),
        }
    }

    #[test]
    fn test_unanchored_sets_both() {
        let data = body(json!({"hasBefore": true, "nextBefore": "abc", "nextAfter": "xyz"}));
        let hrefs = scroll_hrefs("/feed", &parse_query("tag=rust"), &data);
        assert_eq!(hrefs.before.as_deref(), Some("/feed?before=abc&tag=rust"));
        assert_eq!(hrefs.after.as_deref(), Some("/feed?after=xyz&tag=rust"));
    }

    #[test]
    fn test_after_anchor_only_recomputes_after() {
        let data = body(json!({"hasBefore": true, "nextBefore": "abc", "nextAfter": "xyz"}));
        let hrefs = scroll_hrefs("/feed", &parse_query("after=xyz0"), &data);
        assert_eq!(hrefs.before, None);
        assert_eq!(hrefs.after.as_deref(), Some("/feed?after=xyz"));
    }

    #[test]
    fn test_before_anchor_only_recomputes_before() {
        let data = body(json!({"hasBefore": true, "nextBefore": 41, "nextAfter": 99}));
        let hrefs = scroll_hrefs("/feed", &parse_query("before=50"), &data);
        assert_eq!(hrefs.before.as_deref(), Some("/feed?before=41"));
        assert_eq!(hrefs.after, None);
    }

    #[test]
    fn test_before_requires_has_before() {
        let data = body(json!({"hasBefore": false, "nextBefore": "abc"}));
        let hrefs = scroll_hrefs("/feed", &[], &data);
        assert_eq!(hrefs.before, None);
    }

    #[test]
    fn test_after_without_cursor_drops_anchor() {
        let data = body(json!({"entries": []}));
        let hrefs = scroll_hrefs("/feed", &parse_query("after=9&tag=rust"), &data);
        assert_eq!(hrefs.before, None);
        assert_eq!(hrefs.after.as_deref(), Some("/feed?tag=rust"));

        let hrefs = scroll_hrefs("/feed", &[], &data);
        assert_eq!(hrefs.after.as_deref(), Some("/feed?"));

        let hrefs = scroll_hrefs("/feed", &parse_query("before=9"), &data);
        assert_eq!(hrefs.after, None);
    }

    #[tokio::test]
    async fn test_sets_view_model_fields() {
        use crate::request::testing::{context, request, upstream};

        let mut ctx = context(request("GET", "/feed?after=10", &[]));
        ctx.upstream = Some(upstream(200, r#"{"entries":[],"nextAfter":"20"}"#));
        ctx.set_scroll_hrefs().await;

        let view = ctx.data().await;
        assert_eq!(view.get("afterHref"), Some(&json!("/feed?after=20")));
        assert!(view.get("beforeHref").is_none());
    }
}
