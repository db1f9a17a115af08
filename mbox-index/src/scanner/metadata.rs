//! Header metadata captured at index time
//!
//! Only the handful of fields the index needs for secondary lookups and
//! partitioning. Full MIME interpretation belongs to the processing layer.

use mail_parser::{HeaderValue, Message, MessageParser};

/// Upper bound for stored keys (RFC 5322 line length limit)
pub const MAX_KEY_LEN: usize = 998;

/// Gmail thread identifier header
const THREAD_HEADER: &str = "X-GM-THRID";

/// Fields extracted from a message's headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    /// Conversation identifier
    pub grouping_key: Option<String>,
    /// Sender domain, lower-cased
    pub secondary_key: Option<String>,
    /// `Date` header as epoch seconds
    pub timestamp: Option<i64>,
    pub has_attachments: bool,
}

/// Extract metadata from envelope-stripped message content
///
/// Returns `None` when the content has no parseable header block.
pub fn extract(content: &[u8]) -> Option<MessageMetadata> {
    let message = MessageParser::default().parse(content)?;

    Some(MessageMetadata {
        grouping_key: grouping_key(&message),
        secondary_key: sender_domain(&message),
        timestamp: message.date().map(|date| date.to_timestamp()),
        has_attachments: message.attachment_count() > 0,
    })
}

fn grouping_key(message: &Message<'_>) -> Option<String> {
    let thread_id = message
        .headers()
        .iter()
        .find(|header| header.name().eq_ignore_ascii_case(THREAD_HEADER))
        .and_then(|header| first_text(header.value()));

    thread_id
        .or_else(|| first_text(message.references()))
        .or_else(|| first_text(message.in_reply_to()))
        .map(|key| cap_key(&key))
}

fn sender_domain(message: &Message<'_>) -> Option<String> {
    let address = message.from()?.first()?.address()?;
    let (_, domain) = address.rsplit_once('@')?;
    let domain = domain.trim().trim_end_matches('>').to_lowercase();

    if domain.is_empty() {
        None
    } else {
        Some(cap_key(&domain))
    }
}

fn first_text(value: &HeaderValue<'_>) -> Option<String> {
    let text = match value {
        HeaderValue::Text(text) => text.as_ref(),
        HeaderValue::TextList(list) => list.first()?.as_ref(),
        _ => return None,
    };

    let text = text.trim().trim_start_matches('<').trim_end_matches('>');
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Truncate to [`MAX_KEY_LEN`] on a char boundary
fn cap_key(key: &str) -> String {
    if key.len() <= MAX_KEY_LEN {
        return key.to_string();
    }
    let mut end = MAX_KEY_LEN;
    while !key.is_char_boundary(end) {
        end -= 1;
    }
    key[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_thread_and_domain() {
        let content = b"From: Alice <alice@Example.COM>\r\n\
X-GM-THRID: 1847237176990937209\r\n\
Date: Tue, 28 Oct 2025 14:44:00 +0000\r\n\
Subject: hi\r\n\r\nbody\r\n";

        let meta = extract(content).unwrap();
        assert_eq!(meta.grouping_key.as_deref(), Some("1847237176990937209"));
        assert_eq!(meta.secondary_key.as_deref(), Some("example.com"));
        assert_eq!(meta.timestamp, Some(1_761_662_640));
        assert!(!meta.has_attachments);
    }

    #[test]
    fn test_references_fallback() {
        let content = b"From: bob@lists.org\n\
References: <root@lists.org> <child@lists.org>\n\
Subject: Re: hi\n\nreply\n";

        let meta = extract(content).unwrap();
        assert_eq!(meta.grouping_key.as_deref(), Some("root@lists.org"));
        assert_eq!(meta.secondary_key.as_deref(), Some("lists.org"));
        assert_eq!(meta.timestamp, None);
    }

    #[test]
    fn test_no_thread_headers() {
        let content = b"From: carol@example.net\nSubject: alone\n\nbody\n";
        let meta = extract(content).unwrap();
        assert_eq!(meta.grouping_key, None);
    }

    #[test]
    fn test_cap_key_respects_char_boundary() {
        let key = "é".repeat(MAX_KEY_LEN);
        let capped = cap_key(&key);
        assert!(capped.len() <= MAX_KEY_LEN);
        assert!(capped.chars().all(|c| c == 'é'));
    }
}
