//! 错误定义模块

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// 错误涉及的实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Patient,
    Doctor,
    Radiologist,
    Task,
    Image,
    Diagnosis,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::User => "user",
            Entity::Patient => "patient",
            Entity::Doctor => "doctor",
            Entity::Radiologist => "radiologist",
            Entity::Task => "task",
            Entity::Image => "medical image",
            Entity::Diagnosis => "diagnosis",
        };
        f.write_str(name)
    }
}

/// 调用方可见的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    Validation,
    Authorization,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

/// HMS系统统一错误类型
#[derive(Error, Debug)]
pub enum HmsError {
    #[error("资源未找到: {entity} {id}")]
    NotFound { entity: Entity, id: Uuid },

    #[error("患者不存在: {0}")]
    PatientNotFound(Uuid),

    #[error("无效状态转换: 从 {from} 到 {to}")]
    InvalidTransition { from: String, to: String },

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("权限错误: {0}")]
    Authorization(String),

    #[error("并发冲突: {0}")]
    Conflict(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl HmsError {
    pub fn not_found(entity: Entity, id: Uuid) -> Self {
        match entity {
            Entity::Patient => HmsError::PatientNotFound(id),
            _ => HmsError::NotFound { entity, id },
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        HmsError::Validation(msg.into())
    }

    /// 错误分类，供外部协作方决定如何呈现
    pub fn kind(&self) -> ErrorKind {
        match self {
            HmsError::NotFound { .. } | HmsError::PatientNotFound(_) => ErrorKind::NotFound,
            HmsError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            HmsError::Validation(_) => ErrorKind::Validation,
            HmsError::Authorization(_) => ErrorKind::Authorization,
            HmsError::Conflict(_) => ErrorKind::Conflict,
            HmsError::Database(_)
            | HmsError::Storage(_)
            | HmsError::Io(_)
            | HmsError::Config(_)
            | HmsError::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for HmsError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return HmsError::Conflict(db_err.message().to_string());
            }
            // SQLITE_BUSY / SQLITE_LOCKED 及其扩展码
            let busy = matches!(
                db_err.code().as_deref(),
                Some("5") | Some("6") | Some("261") | Some("262") | Some("517")
            );
            if busy {
                return HmsError::Conflict(db_err.message().to_string());
            }
        }
        HmsError::Database(err.to_string())
    }
}

/// HMS系统统一结果类型
pub type Result<T> = std::result::Result<T, HmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patient_not_found_is_classified_as_not_found() {
        let id = Uuid::new_v4();
        let err = HmsError::not_found(Entity::Patient, id);
        assert!(matches!(err, HmsError::PatientNotFound(found) if found == id));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = HmsError::not_found(Entity::Doctor, id);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("doctor"));
    }

    #[test]
    fn internal_errors_collapse_to_internal_kind() {
        assert_eq!(HmsError::Database("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(HmsError::Storage("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(HmsError::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(ErrorKind::InvalidTransition.as_str(), "invalid_transition");
    }
}
