pub mod anthropic;
pub mod google;
pub mod imagen;
pub mod openai;
pub mod response;
pub mod to_anthropic;
pub mod to_google;
pub mod to_imagen;

pub use to_anthropic::{chat_to_anthropic, completion_to_chat, prepare_messages_passthrough};
pub use to_google::chat_to_gemini;
pub use to_imagen::images_to_predict;
