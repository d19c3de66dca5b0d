use std::time::Duration;

/// Name given to events tracked with a blank name.
pub const UNNAMED_EVENT: &str = "unnamed_event";

/// Upper bound on the backoff exponent, keeps the multiplication in range.
pub const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Time the host gives beacon sends before the process exits.
pub const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

// Well-known event names
pub const PAGE_VIEW: &str = "page_view";
pub const CLICK: &str = "click";
pub const FORM_SUBMIT: &str = "form_submit";
pub const TIP_SUBMISSION: &str = "tip_submission";
pub const MEDIA_VIEW: &str = "media_view";
pub const SEARCH: &str = "search";
pub const SHARE_CLICK: &str = "share_click";
