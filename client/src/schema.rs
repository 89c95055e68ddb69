//! Where each model lives in the document store.
//!
//! ```text
//! users/{uid}                         Profile
//! chats/{conversation}                Conversation
//! chats/{conversation}/messages/{id}  Message
//! chats/{conversation}/typing/status  TypingStatus
//! ```

use chatwave_messaging::{Conversation, ConversationId, Message, MessageId, Profile, UserId};
use serde::de::DeserializeOwned;

use crate::error::{ChatError, ChatResult};
use crate::store::{CollectionPath, DocPath, Document};

pub const USERS: &str = "users";
pub const CHATS: &str = "chats";
pub const MESSAGES: &str = "messages";
pub const TYPING: &str = "typing";
pub const TYPING_STATUS: &str = "status";

pub fn users() -> CollectionPath {
    CollectionPath::root(USERS)
}

pub fn user_doc(uid: &UserId) -> DocPath {
    DocPath::new(USERS, uid.as_str())
}

pub fn chats() -> CollectionPath {
    CollectionPath::root(CHATS)
}

pub fn chat_doc(id: &ConversationId) -> DocPath {
    DocPath::new(CHATS, id.as_str())
}

pub fn messages(id: &ConversationId) -> CollectionPath {
    chat_doc(id).collection(MESSAGES)
}

pub fn message_doc(id: &ConversationId, message: &MessageId) -> DocPath {
    messages(id).doc(message.as_str())
}

pub fn typing_doc(id: &ConversationId) -> DocPath {
    chat_doc(id).collection(TYPING).doc(TYPING_STATUS)
}

pub fn decode<T: DeserializeOwned>(doc: &Document) -> ChatResult<T> {
    doc.decode().map_err(|source| ChatError::Decode {
        path: doc.path.key(),
        source,
    })
}

pub fn decode_profile(doc: &Document) -> ChatResult<Profile> {
    let mut profile: Profile = decode(doc)?;
    profile.id = UserId::new(doc.id());
    Ok(profile)
}

pub fn decode_conversation(doc: &Document) -> ChatResult<Conversation> {
    let mut conversation: Conversation = decode(doc)?;
    conversation.id = ConversationId::new(doc.id());
    Ok(conversation)
}

pub fn decode_message(doc: &Document) -> ChatResult<Message> {
    let mut message: Message = decode(doc)?;
    message.id = MessageId::new(doc.id());
    Ok(message)
}
