//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::HmsError;

/// 用户角色，创建后不可变更
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UserRole {
    Admin,
    Doctor,
    Radiologist,
    Patient,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Doctor => "DOCTOR",
            UserRole::Radiologist => "RADIOLOGIST",
            UserRole::Patient => "PATIENT",
        }
    }
}

impl FromStr for UserRole {
    type Err = HmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(UserRole::Admin),
            "DOCTOR" => Ok(UserRole::Doctor),
            "RADIOLOGIST" => Ok(UserRole::Radiologist),
            "PATIENT" => Ok(UserRole::Patient),
            other => Err(HmsError::Validation(format!("unknown role: {}", other))),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户账号
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// 患者信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub address: String,
    pub current_condition: Option<String>,
    pub assigned_doctor_id: Option<Uuid>,
    pub assigned_radiologist_id: Option<Uuid>,
    /// 累计费用（分），由费用账本维护
    pub total_cost: i64,
    pub last_visit: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 医生
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// 已分配患者（反向引用）
    pub patient_ids: Vec<Uuid>,
}

/// 放射科医生
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Radiologist {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub patient_ids: Vec<Uuid>,
}

/// 医护人员类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StaffKind {
    Doctor,
    Radiologist,
}

/// 指向某个医护人员的引用
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StaffRef {
    Doctor(Uuid),
    Radiologist(Uuid),
}

impl StaffRef {
    pub fn kind(&self) -> StaffKind {
        match self {
            StaffRef::Doctor(_) => StaffKind::Doctor,
            StaffRef::Radiologist(_) => StaffKind::Radiologist,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            StaffRef::Doctor(id) | StaffRef::Radiologist(id) => *id,
        }
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Cancelled,
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
        }
    }

    /// 终态不允许再转换
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Cancelled | TaskStatus::Completed)
    }
}

impl FromStr for TaskStatus {
    type Err = HmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            "PENDING" => Ok(TaskStatus::Pending),
            "IN_PROGRESS" | "INPROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            other => Err(HmsError::Validation(format!("unknown task status: {}", other))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 患者计费任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientTask {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub description: String,
    pub cost: i64,
    pub date: DateTime<Utc>,
    pub status: TaskStatus,
}

/// 影像类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ImageType {
    Mri,
    Ct,
    XRay,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Mri => "MRI",
            ImageType::Ct => "CT",
            ImageType::XRay => "XRAY",
        }
    }
}

impl FromStr for ImageType {
    type Err = HmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "").as_str() {
            "MRI" => Ok(ImageType::Mri),
            "CT" => Ok(ImageType::Ct),
            "XRAY" => Ok(ImageType::XRay),
            other => Err(HmsError::Validation(format!("unknown image type: {}", other))),
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 医学影像
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalImage {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub storage_path: String,
    pub image_type: ImageType,
    pub uploaded_by_radiologist_id: Option<Uuid>,
    pub cost: Option<i64>,
    pub is_classified: bool,
    pub disease_category: Option<String>,
    pub notes: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub classified_at: Option<DateTime<Utc>>,
    /// 上传时生成的计费任务
    pub billing_task_id: Option<Uuid>,
}

/// 诊断记录，只追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub diagnosed_by_doctor_id: Option<Uuid>,
    pub medical_image_id: Option<Uuid>,
    pub disease_type: String,
    pub notes: String,
    pub diagnosed_at: DateTime<Utc>,
}

/// 账号创建时的角色资料
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AccountProfile {
    Admin,
    Doctor {
        patient_ids: Vec<Uuid>,
    },
    Radiologist {
        patient_ids: Vec<Uuid>,
    },
    Patient {
        address: String,
        current_condition: Option<String>,
        doctor_id: Option<Uuid>,
        radiologist_id: Option<Uuid>,
    },
}

impl AccountProfile {
    pub fn role(&self) -> UserRole {
        match self {
            AccountProfile::Admin => UserRole::Admin,
            AccountProfile::Doctor { .. } => UserRole::Doctor,
            AccountProfile::Radiologist { .. } => UserRole::Radiologist,
            AccountProfile::Patient { .. } => UserRole::Patient,
        }
    }
}

/// 新账号请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub profile: AccountProfile,
}

/// 账号创建结果
#[derive(Debug, Clone, Serialize)]
pub enum RoleEntity {
    Admin(User),
    Doctor(Doctor),
    Radiologist(Radiologist),
    Patient(Patient),
}

impl RoleEntity {
    pub fn role(&self) -> UserRole {
        match self {
            RoleEntity::Admin(_) => UserRole::Admin,
            RoleEntity::Doctor(_) => UserRole::Doctor,
            RoleEntity::Radiologist(_) => UserRole::Radiologist,
            RoleEntity::Patient(_) => UserRole::Patient,
        }
    }
}
