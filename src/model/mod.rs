//! 数据模型模块

pub mod request;
pub mod session;

pub use request::{Identity, RequestEvent, RequestKind};
pub use session::{SessionState, TransitionReason, VoiceTarget};
