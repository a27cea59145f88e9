pub mod chat_stream;
pub mod config;
pub mod conversation;
pub mod message;
pub mod tool_call;
pub mod tools;
pub mod transcript;
