pub mod assembler;
pub mod conversation;
pub mod gateway;
pub mod openai;
