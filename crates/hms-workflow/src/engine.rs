//! 医院管理引擎
//!
//! 组合费用账本、分配登记簿、任务影像生命周期、临床记录、账号管理和仪表盘，
//! 对外提供统一入口并记录每次操作的指标

use chrono::{DateTime, Utc};
use hms_auth::{Actor, PasswordHasher};
use hms_core::{
    Diagnosis, HmsError, MedicalImage, NewAccount, Patient, PatientTask, Result, RoleEntity, StaffKind, StaffRef,
    UserRole,
};
use hms_database::{queries, DatabasePool};
use hms_storage::ImageStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::accounts::{AccountService, PatientProfileEdit};
use crate::assignment::{AssignmentRegistry, AssignmentReport};
use crate::clinical::{ClinicalRecords, DiagnosisRequest};
use crate::dashboard::{
    AdminDashboard, DashboardAggregator, DoctorDashboard, PatientDashboard, PatientReport, RadiologistDashboard,
    SystemStats, DEFAULT_RECENT_DIAGNOSES,
};
use crate::ledger::CostLedger;
use crate::lifecycle::{ImageUpload, TaskEdit, TaskLifecycle, TaskRemoval};
use crate::metrics::EngineMetrics;

/// 引擎选项
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub recent_diagnoses_limit: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            recent_diagnoses_limit: DEFAULT_RECENT_DIAGNOSES,
        }
    }
}

/// 医院管理引擎
#[derive(Clone)]
pub struct HospitalEngine {
    db: DatabasePool,
    ledger: CostLedger,
    registry: AssignmentRegistry,
    lifecycle: TaskLifecycle,
    clinical: ClinicalRecords,
    accounts: AccountService,
    dashboards: DashboardAggregator,
    metrics: EngineMetrics,
}

impl HospitalEngine {
    /// 创建新的引擎
    pub fn new(
        db: DatabasePool,
        store: Arc<dyn ImageStore>,
        hasher: Arc<dyn PasswordHasher>,
        options: EngineOptions,
    ) -> Result<Self> {
        Ok(Self {
            ledger: CostLedger::new(db.clone()),
            registry: AssignmentRegistry::new(db.clone()),
            lifecycle: TaskLifecycle::new(db.clone(), store.clone()),
            clinical: ClinicalRecords::new(db.clone()),
            accounts: AccountService::new(db.clone(), hasher, store),
            dashboards: DashboardAggregator::new(db.clone(), options.recent_diagnoses_limit),
            metrics: EngineMetrics::new()?,
            db,
        })
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    async fn observe<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.metrics.record(operation, started.elapsed(), &result);

        if let Err(e) = &result {
            tracing::debug!(operation, kind = e.kind().as_str(), error = %e, "Operation failed");
        }
        result
    }

    // ========== 费用账本 ==========

    pub async fn recompute(&self, patient_id: Uuid) -> Result<i64> {
        self.observe("recompute", self.ledger.recompute(patient_id)).await
    }

    pub async fn apply_delta(&self, patient_id: Uuid, delta: i64) -> Result<i64> {
        self.observe("apply_delta", self.ledger.apply_delta(patient_id, delta)).await
    }

    // ========== 分配登记簿 ==========

    pub async fn assign_doctor(&self, patient_id: Uuid, doctor_id: Uuid) -> Result<()> {
        self.observe("assign_doctor", self.registry.assign_doctor(patient_id, doctor_id))
            .await
    }

    pub async fn assign_radiologist(&self, patient_id: Uuid, radiologist_id: Uuid) -> Result<()> {
        self.observe(
            "assign_radiologist",
            self.registry.assign_radiologist(patient_id, radiologist_id),
        )
        .await
    }

    pub async fn unassign_doctor(&self, patient_id: Uuid) -> Result<Option<Uuid>> {
        self.observe("unassign_doctor", self.registry.unassign_doctor(patient_id))
            .await
    }

    pub async fn unassign_radiologist(&self, patient_id: Uuid) -> Result<Option<Uuid>> {
        self.observe("unassign_radiologist", self.registry.unassign_radiologist(patient_id))
            .await
    }

    pub async fn remove_staff(&self, staff: StaffRef) -> Result<Vec<Uuid>> {
        self.observe("remove_staff", self.registry.remove_staff(staff)).await
    }

    pub async fn set_staff_patients(&self, staff: StaffRef, patient_ids: &[Uuid]) -> Result<()> {
        self.observe("set_staff_patients", self.registry.set_staff_patients(staff, patient_ids))
            .await
    }

    pub async fn verify_assignments(&self) -> Result<AssignmentReport> {
        self.observe("verify_assignments", self.registry.verify_assignments())
            .await
    }

    // ========== 任务与影像 ==========

    pub async fn add_task(
        &self,
        patient_id: Uuid,
        description: &str,
        cost: i64,
        date: DateTime<Utc>,
    ) -> Result<PatientTask> {
        self.observe("add_task", self.lifecycle.add_task(patient_id, description, cost, date))
            .await
    }

    pub async fn edit_task(&self, task_id: Uuid, edit: TaskEdit) -> Result<PatientTask> {
        self.observe("edit_task", self.lifecycle.edit_task(task_id, edit)).await
    }

    pub async fn delete_task(&self, task_id: Uuid) -> Result<TaskRemoval> {
        self.observe("delete_task", self.lifecycle.delete_task(task_id)).await
    }

    pub async fn upload_image(&self, upload: ImageUpload) -> Result<MedicalImage> {
        self.observe("upload_image", self.lifecycle.upload_image(upload)).await
    }

    pub async fn delete_image(&self, image_id: Uuid, radiologist_id: Uuid) -> Result<i64> {
        self.observe("delete_image", self.lifecycle.delete_image(image_id, radiologist_id))
            .await
    }

    /// 以当前登录的放射科医生身份上传，上传者取自身份
    pub async fn upload_image_as(&self, actor: &Actor, mut upload: ImageUpload) -> Result<MedicalImage> {
        self.observe("upload_image", async {
            upload.radiologist_id = self.radiologist_for(actor).await?;
            self.lifecycle.upload_image(upload).await
        })
        .await
    }

    /// 以当前登录的放射科医生身份删除影像
    pub async fn delete_image_as(&self, actor: &Actor, image_id: Uuid) -> Result<i64> {
        self.observe("delete_image", async {
            let radiologist_id = self.radiologist_for(actor).await?;
            self.lifecycle.delete_image(image_id, radiologist_id).await
        })
        .await
    }

    async fn radiologist_for(&self, actor: &Actor) -> Result<Uuid> {
        actor.require_role(&[UserRole::Radiologist])?;
        let mut conn = self.db.acquire().await?;
        let staff = queries::get_staff_by_user(&mut conn, StaffKind::Radiologist, actor.user_id).await?;
        staff
            .map(|row| row.id)
            .ok_or_else(|| HmsError::Authorization("actor has no radiologist profile".to_string()))
    }

    pub async fn list_patient_tasks(&self, patient_id: Uuid) -> Result<Vec<PatientTask>> {
        self.observe("list_patient_tasks", self.lifecycle.list_patient_tasks(patient_id))
            .await
    }

    pub async fn list_patient_images(&self, patient_id: Uuid) -> Result<Vec<MedicalImage>> {
        self.observe("list_patient_images", self.lifecycle.list_patient_images(patient_id))
            .await
    }

    // ========== 临床记录 ==========

    pub async fn record_diagnosis(&self, request: DiagnosisRequest) -> Result<Diagnosis> {
        self.observe("record_diagnosis", self.clinical.record_diagnosis(request))
            .await
    }

    pub async fn classify_image(
        &self,
        image_id: Uuid,
        disease_category: &str,
        notes: Option<&str>,
    ) -> Result<MedicalImage> {
        self.observe(
            "classify_image",
            self.clinical.classify_image(image_id, disease_category, notes),
        )
        .await
    }

    pub async fn update_patient_condition(&self, patient_id: Uuid, condition: &str) -> Result<Patient> {
        self.observe(
            "update_patient_condition",
            self.clinical.update_patient_condition(patient_id, condition),
        )
        .await
    }

    // ========== 账号 ==========

    pub async fn create_account(&self, account: NewAccount) -> Result<RoleEntity> {
        self.observe("create_account", self.accounts.create_account(account))
            .await
    }

    pub async fn edit_patient_profile(&self, patient_id: Uuid, edit: PatientProfileEdit) -> Result<Patient> {
        self.observe(
            "edit_patient_profile",
            self.accounts.edit_patient_profile(patient_id, edit),
        )
        .await
    }

    pub async fn rename_staff(&self, staff: StaffRef, name: &str) -> Result<()> {
        self.observe("rename_staff", self.accounts.rename_staff(staff, name)).await
    }

    pub async fn delete_patient(&self, patient_id: Uuid) -> Result<()> {
        self.observe("delete_patient", self.accounts.delete_patient(patient_id))
            .await
    }

    pub async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        self.observe("delete_user", self.accounts.delete_user(user_id)).await
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Actor> {
        self.observe("authenticate", self.accounts.authenticate(username, password))
            .await
    }

    // ========== 仪表盘 ==========

    pub async fn admin_dashboard(&self) -> Result<AdminDashboard> {
        self.observe("admin_dashboard", self.dashboards.admin_dashboard()).await
    }

    pub async fn doctor_dashboard(&self, doctor_id: Uuid) -> Result<DoctorDashboard> {
        self.observe("doctor_dashboard", self.dashboards.doctor_dashboard(doctor_id))
            .await
    }

    pub async fn radiologist_dashboard(&self, radiologist_id: Uuid) -> Result<RadiologistDashboard> {
        self.observe(
            "radiologist_dashboard",
            self.dashboards.radiologist_dashboard(radiologist_id),
        )
        .await
    }

    pub async fn patient_dashboard(&self, patient_id: Uuid) -> Result<PatientDashboard> {
        self.observe("patient_dashboard", self.dashboards.patient_dashboard(patient_id))
            .await
    }

    pub async fn patient_report(&self, patient_id: Uuid) -> Result<PatientReport> {
        self.observe("patient_report", self.dashboards.patient_report(patient_id))
            .await
    }

    pub async fn system_stats(&self) -> Result<SystemStats> {
        self.observe("system_stats", self.dashboards.system_stats()).await
    }
}
