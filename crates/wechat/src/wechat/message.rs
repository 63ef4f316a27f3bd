//! Inbound message parsing and normalization.
//!
//! WeChat posts XML. Some deployments sit behind proxies that convert the XML
//! into JSON first, wrapping every leaf in a single-element array
//! (`{"xml": {"MsgType": ["text"]}}`). Both shapes are parsed into a flat
//! [`RawPayload`] and then normalized into an [`InboundMessage`].

use quick_xml::Reader;
use quick_xml::events::Event;
use serde_json::{Map, Value};
use thiserror::Error;

use zhiweijz_core::ExternalId;

/// Flat field map of one delivery, before normalization.
pub type RawPayload = Map<String, Value>;

/// Errors that can occur while turning a request body into a message.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed XML body: {0}")]
    Xml(String),
    #[error("malformed JSON body: {0}")]
    Json(String),
    #[error("unrecognized body format")]
    UnknownFormat,
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Coarse message kind, used to pick the reply budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Voice,
    Image,
    Event,
    Other,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
            Self::Image => "image",
            Self::Event => "event",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push event names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Subscribe,
    Unsubscribe,
    /// Menu click carrying an event key
    Click,
    /// Menu link opened
    View,
    Scan,
    Location,
    Other(String),
}

impl EventKind {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "click" => Self::Click,
            "view" => Self::View,
            "scan" => Self::Scan,
            "location" => Self::Location,
            _ => Self::Other(raw.to_string()),
        }
    }
}

/// Kind-specific message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Text {
        content: String,
    },
    Voice {
        media_id: Option<String>,
        format: Option<String>,
        /// Platform speech recognition, when enabled for the account
        recognition: Option<String>,
    },
    Image {
        pic_url: Option<String>,
        media_id: Option<String>,
    },
    Event {
        event: EventKind,
        key: Option<String>,
    },
    /// Video, location, link and anything newer
    Other {
        msg_type: String,
    },
}

/// A normalized webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Platform message id; events carry none
    pub message_id: Option<String>,
    /// Sender (`FromUserName`)
    pub external_id: ExternalId,
    /// Official account that received the message (`ToUserName`)
    pub account_id: String,
    /// Platform timestamp in Unix seconds, when the delivery carries one
    pub created_at: Option<i64>,
    pub payload: MessagePayload,
}

impl InboundMessage {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self.payload {
            MessagePayload::Text { .. } => MessageKind::Text,
            MessagePayload::Voice { .. } => MessageKind::Voice,
            MessagePayload::Image { .. } => MessageKind::Image,
            MessagePayload::Event { .. } => MessageKind::Event,
            MessagePayload::Other { .. } => MessageKind::Other,
        }
    }

    /// Identity used to suppress redelivered copies.
    ///
    /// The platform message id when present, otherwise sender and timestamp.
    /// `None` when the delivery carries neither, so it cannot be told apart
    /// from other deliveries by the same sender.
    #[must_use]
    pub fn dedup_key(&self) -> Option<String> {
        match (&self.message_id, self.created_at) {
            (Some(id), _) => Some(format!("msg:{id}")),
            (None, Some(at)) => Some(format!("evt:{}:{at}", self.external_id)),
            (None, None) => None,
        }
    }
}

/// Parse a request body in either XML or JSON form.
///
/// # Errors
///
/// Returns [`NormalizeError`] if the body is neither well-formed XML nor a
/// JSON object.
pub fn parse_body(body: &str) -> Result<RawPayload, NormalizeError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        parse_xml(trimmed)
    } else if trimmed.starts_with('{') {
        parse_json(trimmed)
    } else {
        Err(NormalizeError::UnknownFormat)
    }
}

/// Parse the platform XML envelope into a flat field map.
///
/// Only direct children of the root element are collected; text and CDATA
/// sections inside one field are concatenated.
///
/// # Errors
///
/// Returns [`NormalizeError::Xml`] for malformed input.
pub fn parse_xml(body: &str) -> Result<RawPayload, NormalizeError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut fields = RawPayload::new();
    let mut depth = 0usize;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                depth += 1;
                if depth == 2 {
                    current = Some(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
                }
            }
            Ok(Event::End(_)) => {
                if depth == 2 {
                    current = None;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Empty(empty)) => {
                if depth == 1 {
                    let name = String::from_utf8_lossy(empty.local_name().as_ref()).into_owned();
                    fields.entry(name).or_insert_with(|| Value::String(String::new()));
                }
            }
            Ok(Event::Text(text)) => {
                if let (2, Some(name)) = (depth, current.as_ref()) {
                    let value = text
                        .unescape()
                        .map_err(|e| NormalizeError::Xml(e.to_string()))?;
                    append_text(&mut fields, name, &value);
                }
            }
            Ok(Event::CData(cdata)) => {
                if let (2, Some(name)) = (depth, current.as_ref()) {
                    let bytes = cdata.into_inner();
                    let value =
                        std::str::from_utf8(&bytes).map_err(|e| NormalizeError::Xml(e.to_string()))?;
                    append_text(&mut fields, name, value);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(NormalizeError::Xml(e.to_string())),
            Ok(_) => {}
        }
    }

    if depth != 0 {
        return Err(NormalizeError::Xml("unexpected end of document".to_string()));
    }
    Ok(fields)
}

fn append_text(fields: &mut RawPayload, name: &str, text: &str) {
    match fields.get_mut(name) {
        Some(Value::String(existing)) => existing.push_str(text),
        _ => {
            fields.insert(name.to_string(), Value::String(text.to_string()));
        }
    }
}

/// Parse a JSON body, unwrapping an outer `{"xml": {...}}` envelope.
///
/// # Errors
///
/// Returns [`NormalizeError::Json`] unless the body is a JSON object.
pub fn parse_json(body: &str) -> Result<RawPayload, NormalizeError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| NormalizeError::Json(e.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(NormalizeError::Json("expected an object".to_string()));
    };

    if map.len() == 1 {
        if let Some(Value::Object(inner)) = map.remove("xml") {
            return Ok(inner);
        }
    }
    Ok(map)
}

/// Read one leaf as a scalar string.
///
/// Single-element lists unwrap to their element; numbers and booleans are
/// rendered; empty strings, nulls and objects count as absent.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.first().and_then(scalar),
        Value::Null | Value::Object(_) => None,
    }
}

fn field(raw: &RawPayload, name: &str) -> Option<String> {
    raw.get(name).and_then(scalar)
}

/// Convert a raw payload into a canonical message.
///
/// # Errors
///
/// Returns [`NormalizeError`] when `FromUserName` or `MsgType` is missing,
/// or when the sender or timestamp is malformed.
pub fn normalize(raw: &RawPayload) -> Result<InboundMessage, NormalizeError> {
    let sender = field(raw, "FromUserName").ok_or(NormalizeError::MissingField("FromUserName"))?;
    let external_id = ExternalId::parse(&sender).map_err(|e| NormalizeError::InvalidField {
        field: "FromUserName",
        reason: e.to_string(),
    })?;
    let msg_type = field(raw, "MsgType").ok_or(NormalizeError::MissingField("MsgType"))?;
    let created_at = field(raw, "CreateTime")
        .map(|raw_time| {
            raw_time
                .trim()
                .parse::<i64>()
                .map_err(|e| NormalizeError::InvalidField {
                    field: "CreateTime",
                    reason: e.to_string(),
                })
        })
        .transpose()?;

    let payload = match msg_type.to_ascii_lowercase().as_str() {
        "text" => MessagePayload::Text {
            content: field(raw, "Content").unwrap_or_default(),
        },
        "voice" => MessagePayload::Voice {
            media_id: field(raw, "MediaId"),
            format: field(raw, "Format"),
            recognition: field(raw, "Recognition"),
        },
        "image" => MessagePayload::Image {
            pic_url: field(raw, "PicUrl"),
            media_id: field(raw, "MediaId"),
        },
        "event" => MessagePayload::Event {
            event: EventKind::parse(&field(raw, "Event").unwrap_or_default()),
            key: field(raw, "EventKey"),
        },
        _ => MessagePayload::Other { msg_type },
    };

    Ok(InboundMessage {
        message_id: field(raw, "MsgId"),
        external_id,
        account_id: field(raw, "ToUserName").unwrap_or_default(),
        created_at,
        payload,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    const TEXT_XML: &str = r"<xml>
  <ToUserName><![CDATA[gh_account]]></ToUserName>
  <FromUserName><![CDATA[openid-user-1]]></FromUserName>
  <CreateTime>1700000000</CreateTime>
  <MsgType><![CDATA[text]]></MsgType>
  <Content><![CDATA[午餐 35元 <麻辣烫>]]></Content>
  <MsgId>24000000000000001</MsgId>
</xml>";

    #[test]
    fn test_parse_xml_text_message() {
        let raw = parse_xml(TEXT_XML).unwrap();
        let message = normalize(&raw).unwrap();

        assert_eq!(message.external_id.as_str(), "openid-user-1");
        assert_eq!(message.account_id, "gh_account");
        assert_eq!(message.created_at, Some(1_700_000_000));
        assert_eq!(message.message_id.as_deref(), Some("24000000000000001"));
        assert_eq!(
            message.payload,
            MessagePayload::Text {
                content: "午餐 35元 <麻辣烫>".to_string()
            }
        );
        assert_eq!(message.kind(), MessageKind::Text);
    }

    #[test]
    fn test_parse_xml_unescapes_plain_text() {
        let raw = parse_xml(
            "<xml><FromUserName>u1</FromUserName><MsgType>text</MsgType>\
             <Content>a &amp; b</Content></xml>",
        )
        .unwrap();
        assert_eq!(raw.get("Content"), Some(&json!("a & b")));
    }

    #[test]
    fn test_parse_xml_ignores_nested_elements() {
        let raw = parse_xml(
            "<xml><FromUserName>u1</FromUserName><MsgType>event</MsgType>\
             <Event>scancode_push</Event>\
             <ScanCodeInfo><ScanType>qrcode</ScanType></ScanCodeInfo></xml>",
        )
        .unwrap();
        assert!(raw.get("ScanType").is_none());
        assert_eq!(raw.get("Event"), Some(&json!("scancode_push")));
    }

    #[test]
    fn test_parse_xml_rejects_truncated_document() {
        assert!(matches!(
            parse_xml("<xml><FromUserName>u1</FromUserName>"),
            Err(NormalizeError::Xml(_))
        ));
    }

    #[test]
    fn test_wrapped_and_scalar_normalize_equally() {
        let wrapped = parse_json(
            &json!({
                "xml": {
                    "ToUserName": ["gh_account"],
                    "FromUserName": ["openid-user-1"],
                    "CreateTime": ["1700000000"],
                    "MsgType": ["voice"],
                    "MediaId": ["media-1"],
                    "Format": ["amr"],
                    "Recognition": ["打车 二十块"],
                    "MsgId": ["42"]
                }
            })
            .to_string(),
        )
        .unwrap();
        let scalar = parse_json(
            &json!({
                "ToUserName": "gh_account",
                "FromUserName": "openid-user-1",
                "CreateTime": 1_700_000_000,
                "MsgType": "voice",
                "MediaId": "media-1",
                "Format": "amr",
                "Recognition": "打车 二十块",
                "MsgId": 42
            })
            .to_string(),
        )
        .unwrap();

        let a = normalize(&wrapped).unwrap();
        let b = normalize(&scalar).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.payload,
            MessagePayload::Voice {
                media_id: Some("media-1".to_string()),
                format: Some("amr".to_string()),
                recognition: Some("打车 二十块".to_string()),
            }
        );
    }

    #[test]
    fn test_event_normalization() {
        let raw = parse_json(
            &json!({
                "FromUserName": "openid-user-1",
                "CreateTime": "1700000000",
                "MsgType": "event",
                "Event": "CLICK",
                "EventKey": "BIND_ACCOUNT"
            })
            .to_string(),
        )
        .unwrap();
        let message = normalize(&raw).unwrap();
        assert_eq!(
            message.payload,
            MessagePayload::Event {
                event: EventKind::Click,
                key: Some("BIND_ACCOUNT".to_string())
            }
        );
        assert!(message.message_id.is_none());
        assert_eq!(
            message.dedup_key().as_deref(),
            Some("evt:openid-user-1:1700000000")
        );
    }

    #[test]
    fn test_dedup_key_prefers_message_id() {
        let message = normalize(&parse_xml(TEXT_XML).unwrap()).unwrap();
        assert_eq!(message.dedup_key().as_deref(), Some("msg:24000000000000001"));
    }

    #[test]
    fn test_no_dedup_key_without_id_or_time() {
        let subscribe =
            parse_json(r#"{"FromUserName":"openid-user-1","MsgType":"event","Event":"subscribe"}"#)
                .unwrap();
        let click = parse_json(
            r#"{"FromUserName":"openid-user-1","MsgType":"event","Event":"CLICK","EventKey":"HELP"}"#,
        )
        .unwrap();

        let subscribe = normalize(&subscribe).unwrap();
        let click = normalize(&click).unwrap();
        assert_eq!(subscribe.created_at, None);
        assert_eq!(subscribe.dedup_key(), None);
        assert_eq!(click.dedup_key(), None);
    }

    #[test]
    fn test_unknown_type_is_other() {
        let raw = parse_json(r#"{"FromUserName":"u1","MsgType":"video","MsgId":"1"}"#).unwrap();
        let message = normalize(&raw).unwrap();
        assert_eq!(
            message.payload,
            MessagePayload::Other {
                msg_type: "video".to_string()
            }
        );
    }

    #[test]
    fn test_missing_required_fields() {
        let raw = parse_json(r#"{"MsgType":"text"}"#).unwrap();
        assert!(matches!(
            normalize(&raw),
            Err(NormalizeError::MissingField("FromUserName"))
        ));

        let raw = parse_json(r#"{"FromUserName":["u1"],"MsgType":[]}"#).unwrap();
        assert!(matches!(
            normalize(&raw),
            Err(NormalizeError::MissingField("MsgType"))
        ));
    }

    #[test]
    fn test_invalid_create_time() {
        let raw = parse_json(r#"{"FromUserName":"u1","MsgType":"text","CreateTime":"soon"}"#)
            .unwrap();
        assert!(matches!(
            normalize(&raw),
            Err(NormalizeError::InvalidField {
                field: "CreateTime",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_body_dispatches_on_shape() {
        assert!(parse_body(TEXT_XML).is_ok());
        assert!(parse_body(r#"  {"FromUserName":"u1"}"#).is_ok());
        assert!(matches!(
            parse_body("FromUserName=u1"),
            Err(NormalizeError::UnknownFormat)
        ));
    }
}
