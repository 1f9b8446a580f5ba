//! Server-sent-events wire rendering (spec §6).
//!
//! Bit-exact with the EventSource wire format: `field: value\n` lines per
//! event, terminated by a blank line, with any `\r` stripped from field
//! values (a lone `\r` would otherwise be read by a browser's EventSource
//! parser as its own line terminator, splitting the field early) and
//! multi-line `data` values split into one `data:` line per input line.

/// Render one `sse.send` event as its complete wire block, including the
/// trailing blank line that terminates it.
pub(crate) fn render_event(data: &str, event: Option<&str>, id: Option<&str>, retry: Option<u64>) -> String {
    let mut out = String::new();
    if let Some(event) = event {
        push_field(&mut out, "event", event);
    }
    if data.is_empty() {
        out.push_str("data: \n");
    } else {
        for line in strip_cr(data).split('\n') {
            push_field(&mut out, "data", line);
        }
    }
    if let Some(id) = id {
        push_field(&mut out, "id", id);
    }
    if let Some(retry) = retry {
        out.push_str("retry: ");
        out.push_str(&retry.to_string());
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Render one `sse.comment` event (a `:`-prefixed line, used for keep-alives).
pub(crate) fn render_comment(comment: &str) -> String {
    let mut out = String::new();
    for line in strip_cr(comment).split('\n') {
        out.push(':');
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

fn push_field(out: &mut String, field: &str, value: &str) {
    out.push_str(field);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn strip_cr(s: &str) -> String {
    s.replace('\r', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_minimal_data_only_event() {
        let out = render_event("hello", None, None, None);
        assert_eq!(out, "data: hello\n\n");
    }

    #[test]
    fn renders_event_data_id_and_retry_in_wire_order() {
        let out = render_event("hello", Some("greeting"), Some("42"), Some(3000));
        assert_eq!(out, "event: greeting\ndata: hello\nid: 42\nretry: 3000\n\n");
    }

    #[test]
    fn splits_multi_line_data_into_one_field_per_line() {
        let out = render_event("line one\nline two", None, None, None);
        assert_eq!(out, "data: line one\ndata: line two\n\n");
    }

    #[test]
    fn strips_carriage_returns_from_data() {
        let out = render_event("line one\r\nline two", None, None, None);
        assert_eq!(out, "data: line one\ndata: line two\n\n");
    }

    #[test]
    fn empty_data_still_emits_a_blank_data_field() {
        let out = render_event("", None, None, None);
        assert_eq!(out, "data: \n\n");
    }

    #[test]
    fn renders_a_comment_line() {
        let out = render_comment("keep-alive");
        assert_eq!(out, ":keep-alive\n\n");
    }
}
