//! # HMS数据库模块
//!
//! 负责医院管理数据的持久化，提供SQLite连接池、表结构初始化和按实体划分的查询操作。
//! 所有查询函数都接收 `&mut SqliteConnection`，既可在事务内调用，也可用池连接调用。

pub mod connection;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::{DatabasePool, DatabaseSettings};
pub use models::*;
pub use sqlx::SqliteConnection;
