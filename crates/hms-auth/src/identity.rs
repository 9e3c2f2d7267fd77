//! 已认证身份

use hms_core::{HmsError, Result, UserRole};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 会话协作方提供的当前用户
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub username: String,
    pub role: UserRole,
}

impl Actor {
    pub fn new(user_id: Uuid, username: impl Into<String>, role: UserRole) -> Self {
        Self {
            user_id,
            username: username.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// 角色不在允许列表内时返回权限错误
    pub fn require_role(&self, allowed: &[UserRole]) -> Result<()> {
        if allowed.contains(&self.role) {
            return Ok(());
        }
        tracing::warn!(user = %self.username, role = %self.role, "Rejected actor for role-restricted operation");
        Err(HmsError::Authorization(format!(
            "{} role may not perform this operation",
            self.role
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hms_core::ErrorKind;

    #[test]
    fn require_role() {
        let actor = Actor::new(Uuid::new_v4(), "rad", UserRole::Radiologist);
        assert!(actor.require_role(&[UserRole::Radiologist]).is_ok());

        let err = actor.require_role(&[UserRole::Admin, UserRole::Doctor]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(!actor.is_admin());
    }
}
