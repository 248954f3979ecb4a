pub mod anthropic;
pub mod canonical;
pub mod mapping;
pub mod openai_chat;
pub mod tools;
