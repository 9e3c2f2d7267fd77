//! 临床记录：诊断、影像分类和病情更新

use chrono::Utc;
use hms_core::utils::require_non_empty;
use hms_core::{Diagnosis, Entity, HmsError, MedicalImage, Patient, Result, StaffKind};
use hms_database::{queries, DatabasePool, NewDiagnosis};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// 诊断记录请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub disease_type: String,
    #[serde(default)]
    pub notes: String,
    pub medical_image_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct ClinicalRecords {
    db: DatabasePool,
}

impl ClinicalRecords {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// 记录诊断，关联影像必须属于同一患者
    pub async fn record_diagnosis(&self, request: DiagnosisRequest) -> Result<Diagnosis> {
        let disease_type = require_non_empty("disease type", &request.disease_type)?;

        let mut tx = self.db.begin_write().await?;
        if queries::get_patient(&mut tx, request.patient_id).await?.is_none() {
            return Err(HmsError::PatientNotFound(request.patient_id));
        }
        if queries::get_staff(&mut tx, StaffKind::Doctor, request.doctor_id)
            .await?
            .is_none()
        {
            return Err(HmsError::not_found(Entity::Doctor, request.doctor_id));
        }
        if let Some(image_id) = request.medical_image_id {
            let image = queries::get_image(&mut tx, image_id)
                .await?
                .ok_or_else(|| HmsError::not_found(Entity::Image, image_id))?;
            if image.patient_id != request.patient_id {
                return Err(HmsError::validation("medical image belongs to another patient"));
            }
        }

        let diagnosis = NewDiagnosis {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            diagnosed_by_doctor_id: request.doctor_id,
            medical_image_id: request.medical_image_id,
            disease_type,
            notes: request.notes.trim().to_string(),
            diagnosed_at: Utc::now(),
        };
        queries::insert_diagnosis(&mut tx, &diagnosis).await?;
        tx.commit().await?;

        info!(
            diagnosis_id = %diagnosis.id,
            patient_id = %diagnosis.patient_id,
            doctor_id = %diagnosis.diagnosed_by_doctor_id,
            "Diagnosis recorded"
        );
        Ok(Diagnosis {
            id: diagnosis.id,
            patient_id: diagnosis.patient_id,
            diagnosed_by_doctor_id: Some(diagnosis.diagnosed_by_doctor_id),
            medical_image_id: diagnosis.medical_image_id,
            disease_type: diagnosis.disease_type,
            notes: diagnosis.notes,
            diagnosed_at: diagnosis.diagnosed_at,
        })
    }

    /// 标注影像病种，重复分类覆盖上一次结果
    pub async fn classify_image(
        &self,
        image_id: Uuid,
        disease_category: &str,
        notes: Option<&str>,
    ) -> Result<MedicalImage> {
        let category = require_non_empty("disease category", disease_category)?;
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());

        let mut tx = self.db.begin_write().await?;
        if !queries::classify_image(&mut tx, image_id, &category, notes, Utc::now()).await? {
            return Err(HmsError::not_found(Entity::Image, image_id));
        }
        let image = queries::get_image(&mut tx, image_id)
            .await?
            .ok_or_else(|| HmsError::not_found(Entity::Image, image_id))?;
        tx.commit().await?;

        info!(image_id = %image_id, category = %category, "Medical image classified");
        Ok(image)
    }

    /// 更新病情并记录就诊时间
    pub async fn update_patient_condition(&self, patient_id: Uuid, condition: &str) -> Result<Patient> {
        let condition = require_non_empty("condition", condition)?;

        let mut tx = self.db.begin_write().await?;
        if !queries::update_patient_condition(&mut tx, patient_id, &condition, Utc::now()).await? {
            return Err(HmsError::PatientNotFound(patient_id));
        }
        let patient = queries::get_patient(&mut tx, patient_id)
            .await?
            .ok_or(HmsError::PatientNotFound(patient_id))?;
        tx.commit().await?;

        info!(patient_id = %patient_id, "Patient condition updated");
        Ok(patient)
    }
}
