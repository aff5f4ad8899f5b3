//! Chat types shared by the server and cli binaries

use pulsenet::{NetworkEvent, RemoteProcedure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
}

impl NetworkEvent for ChatMessage {
    const NAME: &'static str = "chat::ChatMessage";
}

/// Returns its argument unchanged
pub struct Echo;

impl RemoteProcedure for Echo {
    type Argument = String;
    type Response = String;
    const NAME: &'static str = "chat::Echo";
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsenet::protocol::{decode_payload, encode_payload, type_id};

    #[test]
    fn test_wire_ids_are_stable() {
        assert_eq!(ChatMessage::event_id(), type_id("chat::ChatMessage"));
        assert_eq!(Echo::id(), type_id("chat::Echo"));
        assert_ne!(ChatMessage::event_id(), Echo::id());
    }

    #[test]
    fn test_chat_message_payload() {
        let message = ChatMessage {
            author: "ana".to_string(),
            text: "hi".to_string(),
        };

        let decoded: ChatMessage = decode_payload(&encode_payload(&message).unwrap()).unwrap();
        assert_eq!(decoded.author, "ana");
        assert_eq!(decoded.text, "hi");
    }
}
