//! # HMS Core
//!
//! 医院管理系统的核心模块，提供领域模型、错误分类和输入校验工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{Entity, ErrorKind, HmsError, Result};
pub use models::*;
