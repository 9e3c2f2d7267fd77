//! # HMS存储模块
//!
//! 负责上传影像文件的落盘与删除。文件写入不在数据库事务之内，
//! 调用方需要容忍崩溃时遗留的孤儿文件。

pub mod storage;

pub use storage::*;
