use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::tracker::service::EventTracker;

/// Feeds newline-delimited records into a tracker.
///
/// Each line is `<event_name> [<json properties>]`. Properties that are not
/// valid JSON are kept as `{"raw": "<text>"}`; blank lines are skipped.
pub struct LineProducer<R> {
    lines: Lines<R>,
    tracker: EventTracker,
    cancel_token: CancellationToken,
}

impl<R> LineProducer<R>
where
    R: AsyncBufRead + Unpin,
{
    #[must_use]
    pub fn new(reader: R, tracker: EventTracker) -> Self {
        LineProducer {
            lines: reader.lines(),
            tracker,
            cancel_token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Reads until EOF or cancellation, returning how many events were tracked.
    pub async fn spin(&mut self) -> usize {
        let mut tracked = 0;
        loop {
            tokio::select! {
                line = self.lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some((name, properties)) = parse_line(&line) {
                            self.tracker.track(name, properties);
                            tracked += 1;
                        }
                    }
                    Ok(None) => {
                        debug!("PRODUCER | end of input");
                        break;
                    }
                    Err(e) => {
                        error!("PRODUCER | failed to read input: {}", e);
                        break;
                    }
                },
                () = self.cancel_token.cancelled() => {
                    debug!("PRODUCER | received shutdown signal");
                    break;
                }
            }
        }
        tracked
    }
}

#[must_use]
pub fn parse_line(line: &str) -> Option<(&str, Value)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    if rest.is_empty() {
        return Some((name, Value::Null));
    }
    let properties = serde_json::from_str(rest).unwrap_or_else(|e| {
        debug!("PRODUCER | properties of {} are not JSON: {}", name, e);
        json!({ "raw": rest })
    });
    Some((name, properties))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_properties() {
        assert_eq!(
            parse_line(r#"page_view {"path": "/case/7"}"#),
            Some(("page_view", json!({"path": "/case/7"})))
        );
        assert_eq!(parse_line("  share_click  "), Some(("share_click", Value::Null)));
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn keeps_malformed_properties_raw() {
        assert_eq!(
            parse_line("search query=candles"),
            Some(("search", json!({"raw": "query=candles"})))
        );
    }
}
