//! 仪表盘聚合
//!
//! 各角色的只读视图。每次读取在一个读事务内完成，结果反映最近一次提交的状态。

use chrono::{DateTime, Utc};
use hms_core::{Diagnosis, Entity, HmsError, MedicalImage, Patient, PatientTask, Result, StaffKind};
use hms_database::{queries, DatabasePool, DbPatientSummary, DbStaffSummary, SqliteConnection};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// 默认展示的最近诊断条数
pub const DEFAULT_RECENT_DIAGNOSES: u32 = 10;

/// 患者概要
#[derive(Debug, Clone, Serialize)]
pub struct PatientSummary {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub doctor_name: Option<String>,
    pub radiologist_name: Option<String>,
    pub total_cost: i64,
    pub image_count: i64,
}

impl From<DbPatientSummary> for PatientSummary {
    fn from(row: DbPatientSummary) -> Self {
        PatientSummary {
            id: row.id,
            name: row.name,
            address: row.address,
            doctor_name: row.doctor_name,
            radiologist_name: row.radiologist_name,
            total_cost: row.total_cost,
            image_count: row.image_count,
        }
    }
}

/// 医护人员概要
#[derive(Debug, Clone, Serialize)]
pub struct StaffSummary {
    pub id: Uuid,
    pub name: String,
    pub patient_count: i64,
}

impl From<DbStaffSummary> for StaffSummary {
    fn from(row: DbStaffSummary) -> Self {
        StaffSummary {
            id: row.id,
            name: row.name,
            patient_count: row.patient_count,
        }
    }
}

/// 系统统计
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SystemStats {
    pub patient_count: i64,
    pub doctor_count: i64,
    pub radiologist_count: i64,
    pub image_count: i64,
    pub task_count: i64,
    pub total_cost: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminDashboard {
    pub stats: SystemStats,
    pub patients: Vec<PatientSummary>,
    pub doctors: Vec<StaffSummary>,
    pub radiologists: Vec<StaffSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorDashboard {
    pub doctor_id: Uuid,
    pub name: String,
    pub patient_count: usize,
    pub pending_tasks: i64,
    pub patients: Vec<PatientSummary>,
    pub recent_diagnoses: Vec<Diagnosis>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RadiologistDashboard {
    pub radiologist_id: Uuid,
    pub name: String,
    pub patients: Vec<PatientSummary>,
    pub uploaded_images: Vec<MedicalImage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientDashboard {
    pub patient: Patient,
    pub doctor_name: Option<String>,
    pub radiologist_name: Option<String>,
    pub tasks: Vec<PatientTask>,
    pub images: Vec<MedicalImage>,
    pub diagnoses: Vec<Diagnosis>,
}

/// 患者报告
#[derive(Debug, Clone, Serialize)]
pub struct PatientReport {
    pub patient_id: Uuid,
    pub name: String,
    pub address: String,
    pub current_condition: Option<String>,
    pub doctor_name: Option<String>,
    pub radiologist_name: Option<String>,
    pub total_cost: i64,
    pub images: Vec<MedicalImage>,
    pub tasks: Vec<PatientTask>,
    pub generated_at: DateTime<Utc>,
}

/// 仪表盘聚合器
#[derive(Clone)]
pub struct DashboardAggregator {
    db: DatabasePool,
    recent_diagnoses_limit: u32,
}

impl DashboardAggregator {
    pub fn new(db: DatabasePool, recent_diagnoses_limit: u32) -> Self {
        Self {
            db,
            recent_diagnoses_limit: recent_diagnoses_limit.max(1),
        }
    }

    pub async fn system_stats(&self) -> Result<SystemStats> {
        let mut tx = self.db.begin().await?;
        let stats = load_stats(&mut tx).await?;
        tx.commit().await?;
        Ok(stats)
    }

    pub async fn admin_dashboard(&self) -> Result<AdminDashboard> {
        let mut tx = self.db.begin().await?;
        let stats = load_stats(&mut tx).await?;
        let patients = queries::list_patient_summaries(&mut tx).await?;
        let doctors = queries::list_staff_summaries(&mut tx, StaffKind::Doctor).await?;
        let radiologists = queries::list_staff_summaries(&mut tx, StaffKind::Radiologist).await?;
        tx.commit().await?;

        debug!(patients = patients.len(), "Built admin dashboard");
        Ok(AdminDashboard {
            stats,
            patients: patients.into_iter().map(PatientSummary::from).collect(),
            doctors: doctors.into_iter().map(StaffSummary::from).collect(),
            radiologists: radiologists.into_iter().map(StaffSummary::from).collect(),
        })
    }

    pub async fn doctor_dashboard(&self, doctor_id: Uuid) -> Result<DoctorDashboard> {
        let mut tx = self.db.begin().await?;
        let name = queries::staff_display_name(&mut tx, StaffKind::Doctor, doctor_id)
            .await?
            .ok_or_else(|| HmsError::not_found(Entity::Doctor, doctor_id))?;
        let patients = queries::list_patient_summaries_for_staff(&mut tx, StaffKind::Doctor, doctor_id).await?;
        let pending_tasks = queries::count_pending_tasks_for_doctor(&mut tx, doctor_id).await?;
        let recent_diagnoses =
            queries::list_recent_diagnoses_by_doctor(&mut tx, doctor_id, i64::from(self.recent_diagnoses_limit))
                .await?;
        tx.commit().await?;

        debug!(doctor_id = %doctor_id, patients = patients.len(), "Built doctor dashboard");
        Ok(DoctorDashboard {
            doctor_id,
            name,
            patient_count: patients.len(),
            pending_tasks,
            patients: patients.into_iter().map(PatientSummary::from).collect(),
            recent_diagnoses,
        })
    }

    pub async fn radiologist_dashboard(&self, radiologist_id: Uuid) -> Result<RadiologistDashboard> {
        let mut tx = self.db.begin().await?;
        let name = queries::staff_display_name(&mut tx, StaffKind::Radiologist, radiologist_id)
            .await?
            .ok_or_else(|| HmsError::not_found(Entity::Radiologist, radiologist_id))?;
        let patients =
            queries::list_patient_summaries_for_staff(&mut tx, StaffKind::Radiologist, radiologist_id).await?;
        let uploaded_images = queries::list_images_by_radiologist(&mut tx, radiologist_id).await?;
        tx.commit().await?;

        Ok(RadiologistDashboard {
            radiologist_id,
            name,
            patients: patients.into_iter().map(PatientSummary::from).collect(),
            uploaded_images,
        })
    }

    pub async fn patient_dashboard(&self, patient_id: Uuid) -> Result<PatientDashboard> {
        let mut tx = self.db.begin().await?;
        let patient = queries::get_patient(&mut tx, patient_id)
            .await?
            .ok_or(HmsError::PatientNotFound(patient_id))?;
        let (doctor_name, radiologist_name) = assigned_names(&mut tx, &patient).await?;
        let tasks = queries::list_tasks_for_patient(&mut tx, patient_id).await?;
        let images = queries::list_images_for_patient(&mut tx, patient_id).await?;
        let diagnoses = queries::list_diagnoses_for_patient(&mut tx, patient_id).await?;
        tx.commit().await?;

        Ok(PatientDashboard {
            patient,
            doctor_name,
            radiologist_name,
            tasks,
            images,
            diagnoses,
        })
    }

    pub async fn patient_report(&self, patient_id: Uuid) -> Result<PatientReport> {
        let mut tx = self.db.begin().await?;
        let patient = queries::get_patient(&mut tx, patient_id)
            .await?
            .ok_or(HmsError::PatientNotFound(patient_id))?;
        let (doctor_name, radiologist_name) = assigned_names(&mut tx, &patient).await?;
        let images = queries::list_images_for_patient(&mut tx, patient_id).await?;
        let tasks = queries::list_tasks_for_patient(&mut tx, patient_id).await?;
        tx.commit().await?;

        Ok(PatientReport {
            patient_id,
            name: patient.name,
            address: patient.address,
            current_condition: patient.current_condition,
            doctor_name,
            radiologist_name,
            total_cost: patient.total_cost,
            images,
            tasks,
            generated_at: Utc::now(),
        })
    }
}

async fn load_stats(conn: &mut SqliteConnection) -> Result<SystemStats> {
    Ok(SystemStats {
        patient_count: queries::count_rows(&mut *conn, "patients").await?,
        doctor_count: queries::count_rows(&mut *conn, "doctors").await?,
        radiologist_count: queries::count_rows(&mut *conn, "radiologists").await?,
        image_count: queries::count_rows(&mut *conn, "medical_images").await?,
        task_count: queries::count_rows(&mut *conn, "patient_tasks").await?,
        total_cost: queries::total_system_cost(&mut *conn).await?,
    })
}

async fn assigned_names(
    conn: &mut SqliteConnection,
    patient: &Patient,
) -> Result<(Option<String>, Option<String>)> {
    let doctor_name = match patient.assigned_doctor_id {
        Some(id) => queries::staff_display_name(&mut *conn, StaffKind::Doctor, id).await?,
        None => None,
    };
    let radiologist_name = match patient.assigned_radiologist_id {
        Some(id) => queries::staff_display_name(&mut *conn, StaffKind::Radiologist, id).await?,
        None => None,
    };
    Ok((doctor_name, radiologist_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::AssignmentRegistry;
    use crate::clinical::{ClinicalRecords, DiagnosisRequest};
    use crate::lifecycle::{ImageUpload, TaskLifecycle};
    use crate::test_support::{doctor, fixture, patient, radiologist};
    use hms_core::{ErrorKind, ImageType};

    #[tokio::test]
    async fn dashboards_reflect_committed_state() {
        let fx = fixture().await;
        let registry = AssignmentRegistry::new(fx.db.clone());
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let dashboards = DashboardAggregator::new(fx.db.clone(), 2);

        let p = patient(&fx.db, "Ada").await;
        let d = doctor(&fx.db, "Dr House").await;
        let r = radiologist(&fx.db, "Dr Ray").await;
        registry.assign_doctor(p, d).await.unwrap();
        registry.assign_radiologist(p, r).await.unwrap();

        lifecycle.add_task(p, "Consultation", 100, Utc::now()).await.unwrap();
        lifecycle
            .upload_image(ImageUpload {
                patient_id: p,
                radiologist_id: r,
                image_type: ImageType::Mri,
                cost: 50,
                file_name: "knee.jpeg".to_string(),
                data: vec![1],
            })
            .await
            .unwrap();

        let admin = dashboards.admin_dashboard().await.unwrap();
        assert_eq!(admin.stats.patient_count, 1);
        assert_eq!(admin.stats.total_cost, 150);
        assert_eq!(admin.stats.task_count, 2);
        assert_eq!(admin.patients[0].doctor_name.as_deref(), Some("Dr House"));
        assert_eq!(admin.patients[0].radiologist_name.as_deref(), Some("Dr Ray"));
        assert_eq!(admin.doctors[0].patient_count, 1);

        let doctor_view = dashboards.doctor_dashboard(d).await.unwrap();
        assert_eq!(doctor_view.name, "Dr House");
        assert_eq!(doctor_view.patient_count, 1);
        assert_eq!(doctor_view.pending_tasks, 2);
        assert_eq!(doctor_view.patients[0].image_count, 1);

        let radiologist_view = dashboards.radiologist_dashboard(r).await.unwrap();
        assert_eq!(radiologist_view.uploaded_images.len(), 1);

        let patient_view = dashboards.patient_dashboard(p).await.unwrap();
        assert_eq!(patient_view.patient.total_cost, 150);
        assert_eq!(patient_view.tasks.len(), 2);

        registry.unassign_doctor(p).await.unwrap();
        let report = dashboards.patient_report(p).await.unwrap();
        assert_eq!(report.doctor_name, None);
        assert_eq!(report.radiologist_name.as_deref(), Some("Dr Ray"));
        assert_eq!(report.total_cost, 150);
        assert_eq!(dashboards.doctor_dashboard(d).await.unwrap().patient_count, 0);
    }

    #[tokio::test]
    async fn recent_diagnoses_are_limited() {
        let fx = fixture().await;
        let clinical = ClinicalRecords::new(fx.db.clone());
        let dashboards = DashboardAggregator::new(fx.db.clone(), 2);
        let p = patient(&fx.db, "Ada").await;
        let d = doctor(&fx.db, "Dr House").await;

        for disease in ["Flu", "Cold", "Asthma"] {
            clinical
                .record_diagnosis(DiagnosisRequest {
                    patient_id: p,
                    doctor_id: d,
                    disease_type: disease.to_string(),
                    notes: String::new(),
                    medical_image_id: None,
                })
                .await
                .unwrap();
        }

        let view = dashboards.doctor_dashboard(d).await.unwrap();
        assert_eq!(view.recent_diagnoses.len(), 2);
        assert_eq!(dashboards.patient_dashboard(p).await.unwrap().diagnoses.len(), 3);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let fx = fixture().await;
        let dashboards = DashboardAggregator::new(fx.db.clone(), DEFAULT_RECENT_DIAGNOSES);

        let err = dashboards.doctor_dashboard(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = dashboards.patient_report(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, HmsError::PatientNotFound(_)));

        let stats = dashboards.system_stats().await.unwrap();
        assert_eq!(stats.total_cost, 0);
        assert_eq!(stats.patient_count, 0);
    }
}
