//! 数据库模型

use chrono::{DateTime, Utc};
use hms_core::models::*;
use hms_core::{HmsError, Result};
use sqlx::FromRow;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 数据库用户表
#[derive(Debug, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String, // 存储为字符串，转换为UserRole枚举
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbUser> for User {
    type Error = HmsError;

    fn try_from(db_user: DbUser) -> Result<Self> {
        Ok(User {
            id: db_user.id,
            username: db_user.username,
            password_hash: db_user.password_hash,
            role: db_user.role.parse().map_err(corrupt_column("users.role"))?,
            display_name: db_user.display_name,
            created_at: db_user.created_at,
        })
    }
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub address: String,
    pub current_condition: Option<String>,
    pub assigned_doctor_id: Option<Uuid>,
    pub assigned_radiologist_id: Option<Uuid>,
    pub total_cost: i64,
    pub last_visit: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DbPatient> for Patient {
    fn from(db_patient: DbPatient) -> Self {
        Patient {
            id: db_patient.id,
            user_id: db_patient.user_id,
            name: db_patient.name,
            address: db_patient.address,
            current_condition: db_patient.current_condition,
            assigned_doctor_id: db_patient.assigned_doctor_id,
            assigned_radiologist_id: db_patient.assigned_radiologist_id,
            total_cost: db_patient.total_cost,
            last_visit: db_patient.last_visit,
            created_at: db_patient.created_at,
        }
    }
}

/// 医生表与放射科医生表共用的行结构
#[derive(Debug, Clone, FromRow)]
pub struct DbStaff {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
}

impl DbStaff {
    pub fn into_doctor(self, patient_ids: Vec<Uuid>) -> Doctor {
        Doctor {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            patient_ids,
        }
    }

    pub fn into_radiologist(self, patient_ids: Vec<Uuid>) -> Radiologist {
        Radiologist {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            patient_ids,
        }
    }
}

/// 数据库任务表
#[derive(Debug, FromRow)]
pub struct DbTask {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub description: String,
    pub cost: i64,
    pub task_date: DateTime<Utc>,
    pub status: String,
}

impl TryFrom<DbTask> for PatientTask {
    type Error = HmsError;

    fn try_from(db_task: DbTask) -> Result<Self> {
        Ok(PatientTask {
            id: db_task.id,
            patient_id: db_task.patient_id,
            description: db_task.description,
            cost: db_task.cost,
            date: db_task.task_date,
            status: db_task.status.parse().map_err(corrupt_column("patient_tasks.status"))?,
        })
    }
}

/// 数据库影像表
#[derive(Debug, FromRow)]
pub struct DbImage {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub storage_path: String,
    pub image_type: String,
    pub uploaded_by_radiologist_id: Option<Uuid>,
    pub cost: Option<i64>,
    pub is_classified: bool,
    pub disease_category: Option<String>,
    pub notes: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub classified_at: Option<DateTime<Utc>>,
    pub billing_task_id: Option<Uuid>,
}

impl TryFrom<DbImage> for MedicalImage {
    type Error = HmsError;

    fn try_from(db_image: DbImage) -> Result<Self> {
        Ok(MedicalImage {
            id: db_image.id,
            patient_id: db_image.patient_id,
            storage_path: db_image.storage_path,
            image_type: db_image
                .image_type
                .parse()
                .map_err(corrupt_column("medical_images.image_type"))?,
            uploaded_by_radiologist_id: db_image.uploaded_by_radiologist_id,
            cost: db_image.cost,
            is_classified: db_image.is_classified,
            disease_category: db_image.disease_category,
            notes: db_image.notes,
            uploaded_at: db_image.uploaded_at,
            classified_at: db_image.classified_at,
            billing_task_id: db_image.billing_task_id,
        })
    }
}

/// 数据库诊断表
#[derive(Debug, FromRow)]
pub struct DbDiagnosis {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub diagnosed_by_doctor_id: Option<Uuid>,
    pub medical_image_id: Option<Uuid>,
    pub disease_type: String,
    pub notes: String,
    pub diagnosed_at: DateTime<Utc>,
}

impl From<DbDiagnosis> for Diagnosis {
    fn from(db_diagnosis: DbDiagnosis) -> Self {
        Diagnosis {
            id: db_diagnosis.id,
            patient_id: db_diagnosis.patient_id,
            diagnosed_by_doctor_id: db_diagnosis.diagnosed_by_doctor_id,
            medical_image_id: db_diagnosis.medical_image_id,
            disease_type: db_diagnosis.disease_type,
            notes: db_diagnosis.notes,
            diagnosed_at: db_diagnosis.diagnosed_at,
        }
    }
}

// 投影模型 - 仪表盘查询结果，姓名通过users表解析

/// 患者概要行
#[derive(Debug, FromRow)]
pub struct DbPatientSummary {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub total_cost: i64,
    pub doctor_name: Option<String>,
    pub radiologist_name: Option<String>,
    pub image_count: i64,
}

/// 医护人员概要行
#[derive(Debug, FromRow)]
pub struct DbStaffSummary {
    pub id: Uuid,
    pub name: String,
    pub patient_count: i64,
}

// 插入模型 - 用于创建新记录

/// 新用户插入模型
#[derive(Debug)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: UserRole,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// 新患者插入模型，分配关系由分配登记簿单独写入
#[derive(Debug)]
pub struct NewPatient {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub address: String,
    pub current_condition: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 新医护人员插入模型
#[derive(Debug)]
pub struct NewStaff {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
}

/// 新任务插入模型
#[derive(Debug)]
pub struct NewTask {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub description: String,
    pub cost: i64,
    pub date: DateTime<Utc>,
    pub status: TaskStatus,
}

/// 新影像插入模型
#[derive(Debug)]
pub struct NewImage {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub storage_path: String,
    pub image_type: ImageType,
    pub uploaded_by_radiologist_id: Uuid,
    pub cost: i64,
    pub uploaded_at: DateTime<Utc>,
    pub billing_task_id: Option<Uuid>,
}

/// 新诊断插入模型
#[derive(Debug)]
pub struct NewDiagnosis {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub diagnosed_by_doctor_id: Uuid,
    pub medical_image_id: Option<Uuid>,
    pub disease_type: String,
    pub notes: String,
    pub diagnosed_at: DateTime<Utc>,
}

fn corrupt_column(column: &'static str) -> impl Fn(HmsError) -> HmsError {
    move |err| HmsError::Database(format!("corrupt value in {}: {}", column, err))
}
