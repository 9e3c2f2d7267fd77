//! # HMS认证模块
//!
//! 提供口令哈希协作方和已认证身份（Actor）。会话与Cookie处理不在本模块范围内。

pub mod identity;
pub mod password;

pub use identity::Actor;
pub use password::{PasswordHasher, Pbkdf2PasswordHasher};
