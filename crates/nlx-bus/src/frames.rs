//! Wire frames for the remote transport.
//!
//! One JSON object per line. The `type` field is the discriminator:
//!
//! - `{"type":"pub","subject":"…","payload":{…}}` — fire-and-forget
//! - `{"type":"req","id":"…","subject":"…","payload":{…}}` — request
//! - `{"type":"res","id":"…","payload":{…}}` — reply, correlated by `id`
//! - `{"type":"sub","subject":"…","queue":"…"?}` — subscription
//! - `{"type":"msg","subject":"…","payload":{…}}` — delivered message

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Pub {
        subject: String,
        payload: Value,
    },
    Req {
        id: String,
        subject: String,
        payload: Value,
    },
    Res {
        id: String,
        payload: Value,
    },
    Sub {
        subject: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
    },
    Msg {
        subject: String,
        payload: Value,
    },
}

impl Frame {
    /// Serialize for the line-delimited wire. Infallible for these shapes.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("frame serialization cannot fail")
    }

    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip_req_frame() {
        let frame = Frame::Req {
            id: "abc".into(),
            subject: "ai.llm.request".into(),
            payload: json!({"messages": []}),
        };
        let line = frame.encode();
        assert!(line.contains("\"type\":\"req\""));
        match Frame::decode(&line).expect("decode failed") {
            Frame::Req { id, subject, .. } => {
                assert_eq!(id, "abc");
                assert_eq!(subject, "ai.llm.request");
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn sub_frame_omits_absent_queue() {
        let frame = Frame::Sub {
            subject: "conversation.a@b".into(),
            queue: None,
        };
        assert!(!frame.encode().contains("queue"));
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(Frame::decode(r#"{"type":"nope","subject":"x"}"#).is_err());
    }
}
