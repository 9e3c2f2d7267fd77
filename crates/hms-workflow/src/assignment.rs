//! 分配登记簿
//!
//! 患者与医生、放射科医生之间的关系双向存储：患者行上的外键，
//! 以及医护人员侧的患者集合表。所有变更在同一事务内同时更新两侧。

use hms_core::{Doctor, Entity, HmsError, Radiologist, Result, StaffKind, StaffRef};
use hms_database::{queries, DatabasePool, DbStaff, SqliteConnection};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

/// 双向一致性检查结果，列出不一致的患者ID
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AssignmentReport {
    pub doctor_mismatches: Vec<Uuid>,
    pub radiologist_mismatches: Vec<Uuid>,
}

impl AssignmentReport {
    pub fn is_consistent(&self) -> bool {
        self.doctor_mismatches.is_empty() && self.radiologist_mismatches.is_empty()
    }
}

/// 分配登记簿
#[derive(Clone)]
pub struct AssignmentRegistry {
    db: DatabasePool,
}

impl AssignmentRegistry {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn assign_doctor(&self, patient_id: Uuid, doctor_id: Uuid) -> Result<()> {
        self.assign(StaffRef::Doctor(doctor_id), patient_id).await
    }

    pub async fn assign_radiologist(&self, patient_id: Uuid, radiologist_id: Uuid) -> Result<()> {
        self.assign(StaffRef::Radiologist(radiologist_id), patient_id).await
    }

    /// 返回原先分配的医生
    pub async fn unassign_doctor(&self, patient_id: Uuid) -> Result<Option<Uuid>> {
        self.unassign(StaffKind::Doctor, patient_id).await
    }

    pub async fn unassign_radiologist(&self, patient_id: Uuid) -> Result<Option<Uuid>> {
        self.unassign(StaffKind::Radiologist, patient_id).await
    }

    async fn assign(&self, staff: StaffRef, patient_id: Uuid) -> Result<()> {
        let mut tx = self.db.begin_write().await?;
        let previous = assign_in(&mut tx, staff, patient_id).await?;
        tx.commit().await?;

        info!(
            patient_id = %patient_id,
            staff = ?staff,
            previous = ?previous,
            "Assigned patient"
        );
        Ok(())
    }

    async fn unassign(&self, kind: StaffKind, patient_id: Uuid) -> Result<Option<Uuid>> {
        let mut tx = self.db.begin_write().await?;
        let previous = unassign_in(&mut tx, kind, patient_id).await?;
        tx.commit().await?;

        info!(patient_id = %patient_id, kind = ?kind, previous = ?previous, "Unassigned patient");
        Ok(previous)
    }

    /// 删除医护人员及其用户账号，返回被解除分配的患者
    pub async fn remove_staff(&self, staff: StaffRef) -> Result<Vec<Uuid>> {
        let mut tx = self.db.begin_write().await?;
        let released = remove_staff_in(&mut tx, staff).await?;
        tx.commit().await?;

        info!(staff = ?staff, released = released.len(), "Removed staff member");
        Ok(released)
    }

    /// 以给定集合整体替换医护人员的患者集合
    pub async fn set_staff_patients(&self, staff: StaffRef, patient_ids: &[Uuid]) -> Result<()> {
        let mut tx = self.db.begin_write().await?;
        set_staff_patients_in(&mut tx, staff, patient_ids).await?;
        tx.commit().await?;

        info!(staff = ?staff, patients = patient_ids.len(), "Replaced staff patient set");
        Ok(())
    }

    pub async fn get_doctor(&self, doctor_id: Uuid) -> Result<Doctor> {
        let mut conn = self.db.acquire().await?;
        let row = require_staff(&mut conn, StaffRef::Doctor(doctor_id)).await?;
        let patient_ids = queries::assigned_patient_ids(&mut conn, StaffKind::Doctor, doctor_id).await?;
        Ok(row.into_doctor(patient_ids))
    }

    pub async fn get_radiologist(&self, radiologist_id: Uuid) -> Result<Radiologist> {
        let mut conn = self.db.acquire().await?;
        let row = require_staff(&mut conn, StaffRef::Radiologist(radiologist_id)).await?;
        let patient_ids =
            queries::assigned_patient_ids(&mut conn, StaffKind::Radiologist, radiologist_id).await?;
        Ok(row.into_radiologist(patient_ids))
    }

    /// 检查两侧存储是否一致
    pub async fn verify_assignments(&self) -> Result<AssignmentReport> {
        let mut tx = self.db.begin().await?;
        let report = AssignmentReport {
            doctor_mismatches: queries::inconsistent_assignments(&mut tx, StaffKind::Doctor).await?,
            radiologist_mismatches: queries::inconsistent_assignments(&mut tx, StaffKind::Radiologist)
                .await?,
        };
        tx.commit().await?;

        if !report.is_consistent() {
            warn!(
                doctor_mismatches = report.doctor_mismatches.len(),
                radiologist_mismatches = report.radiologist_mismatches.len(),
                "Assignment registry is inconsistent"
            );
        }
        Ok(report)
    }
}

fn staff_entity(kind: StaffKind) -> Entity {
    match kind {
        StaffKind::Doctor => Entity::Doctor,
        StaffKind::Radiologist => Entity::Radiologist,
    }
}

/// 医护人员必须存在
pub async fn require_staff(conn: &mut SqliteConnection, staff: StaffRef) -> Result<DbStaff> {
    queries::get_staff(&mut *conn, staff.kind(), staff.id())
        .await?
        .ok_or_else(|| HmsError::not_found(staff_entity(staff.kind()), staff.id()))
}

async fn require_patient(conn: &mut SqliteConnection, patient_id: Uuid) -> Result<hms_core::Patient> {
    queries::get_patient(&mut *conn, patient_id)
        .await?
        .ok_or(HmsError::PatientNotFound(patient_id))
}

fn current_assignee(patient: &hms_core::Patient, kind: StaffKind) -> Option<Uuid> {
    match kind {
        StaffKind::Doctor => patient.assigned_doctor_id,
        StaffKind::Radiologist => patient.assigned_radiologist_id,
    }
}

/// 在调用方事务内分配，返回被替换的原医护人员
pub async fn assign_in(conn: &mut SqliteConnection, staff: StaffRef, patient_id: Uuid) -> Result<Option<Uuid>> {
    let patient = require_patient(&mut *conn, patient_id).await?;
    require_staff(&mut *conn, staff).await?;

    let kind = staff.kind();
    let previous = current_assignee(&patient, kind);

    // 集合表以患者为主键，先移除旧关系再写入新关系
    queries::remove_assignment(&mut *conn, kind, patient_id).await?;
    queries::insert_assignment(&mut *conn, kind, staff.id(), patient_id).await?;
    queries::set_patient_staff(&mut *conn, kind, patient_id, Some(staff.id())).await?;

    Ok(previous.filter(|id| *id != staff.id()))
}

/// 在调用方事务内解除分配，未分配时为空操作
pub async fn unassign_in(conn: &mut SqliteConnection, kind: StaffKind, patient_id: Uuid) -> Result<Option<Uuid>> {
    let patient = require_patient(&mut *conn, patient_id).await?;
    let previous = current_assignee(&patient, kind);

    queries::remove_assignment(&mut *conn, kind, patient_id).await?;
    if previous.is_some() {
        queries::set_patient_staff(&mut *conn, kind, patient_id, None).await?;
    }
    Ok(previous)
}

/// 在调用方事务内删除医护人员
pub async fn remove_staff_in(conn: &mut SqliteConnection, staff: StaffRef) -> Result<Vec<Uuid>> {
    let row = require_staff(&mut *conn, staff).await?;
    let kind = staff.kind();

    let mut patients: BTreeSet<Uuid> = queries::assigned_patient_ids(&mut *conn, kind, row.id)
        .await?
        .into_iter()
        .collect();
    for patient in queries::list_patients_for_staff(&mut *conn, kind, row.id).await? {
        patients.insert(patient.id);
    }

    for patient_id in &patients {
        unassign_in(&mut *conn, kind, *patient_id).await?;
    }

    match kind {
        StaffKind::Doctor => {
            queries::clear_diagnosis_doctor(&mut *conn, row.id).await?;
        }
        StaffKind::Radiologist => {
            queries::clear_image_uploader(&mut *conn, row.id).await?;
        }
    }

    queries::delete_staff(&mut *conn, kind, row.id).await?;
    queries::delete_user(&mut *conn, row.user_id).await?;

    Ok(patients.into_iter().collect())
}

/// 在调用方事务内替换患者集合
pub async fn set_staff_patients_in(
    conn: &mut SqliteConnection,
    staff: StaffRef,
    patient_ids: &[Uuid],
) -> Result<()> {
    require_staff(&mut *conn, staff).await?;
    let kind = staff.kind();

    let wanted: BTreeSet<Uuid> = patient_ids.iter().copied().collect();
    let current: BTreeSet<Uuid> = queries::assigned_patient_ids(&mut *conn, kind, staff.id())
        .await?
        .into_iter()
        .collect();

    for patient_id in current.difference(&wanted) {
        unassign_in(&mut *conn, kind, *patient_id).await?;
    }
    for patient_id in wanted.difference(&current) {
        assign_in(&mut *conn, staff, *patient_id).await?;
    }
    Ok(())
}
