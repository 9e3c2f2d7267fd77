//! 账号管理
//!
//! 创建带角色资料的账号，编辑资料，删除账号并级联清理关联记录，以及口令认证。

use chrono::Utc;
use hms_auth::{Actor, PasswordHasher};
use hms_core::utils::require_non_empty;
use hms_core::{
    AccountProfile, Entity, HmsError, NewAccount, Patient, Result, RoleEntity, StaffKind, StaffRef, UserRole,
};
use hms_database::{queries, DatabasePool, NewPatient, NewStaff, NewUser, SqliteConnection};
use hms_storage::ImageStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assignment::{assign_in, remove_staff_in, require_staff, set_staff_patients_in};

/// 患者资料编辑
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProfileEdit {
    pub name: String,
    pub address: String,
    pub current_condition: Option<String>,
}

#[derive(Clone)]
pub struct AccountService {
    db: DatabasePool,
    hasher: Arc<dyn PasswordHasher>,
    store: Arc<dyn ImageStore>,
}

impl AccountService {
    pub fn new(db: DatabasePool, hasher: Arc<dyn PasswordHasher>, store: Arc<dyn ImageStore>) -> Self {
        Self { db, hasher, store }
    }

    /// 创建用户及其角色实体，患者可同时指定医生和放射科医生
    pub async fn create_account(&self, account: NewAccount) -> Result<RoleEntity> {
        let username = require_non_empty("username", &account.username)?;
        let display_name = require_non_empty("display name", &account.display_name)?;
        let password_hash = self.hasher.hash(&account.password)?;

        let user = NewUser {
            id: Uuid::new_v4(),
            username,
            password_hash,
            role: account.profile.role(),
            display_name,
            created_at: Utc::now(),
        };

        let mut tx = self.db.begin_write().await?;
        if queries::get_user_by_username(&mut tx, &user.username).await?.is_some() {
            return Err(HmsError::Validation(format!("username '{}' already exists", user.username)));
        }
        queries::insert_user(&mut tx, &user).await?;

        let entity = match account.profile {
            AccountProfile::Admin => {
                let created = queries::get_user(&mut tx, user.id)
                    .await?
                    .ok_or_else(|| HmsError::not_found(Entity::User, user.id))?;
                RoleEntity::Admin(created)
            }
            AccountProfile::Doctor { patient_ids } => {
                let staff = create_staff(&mut tx, StaffKind::Doctor, &user, &patient_ids).await?;
                let assigned = queries::assigned_patient_ids(&mut tx, StaffKind::Doctor, staff.id).await?;
                RoleEntity::Doctor(staff.into_doctor(assigned))
            }
            AccountProfile::Radiologist { patient_ids } => {
                let staff = create_staff(&mut tx, StaffKind::Radiologist, &user, &patient_ids).await?;
                let assigned = queries::assigned_patient_ids(&mut tx, StaffKind::Radiologist, staff.id).await?;
                RoleEntity::Radiologist(staff.into_radiologist(assigned))
            }
            AccountProfile::Patient {
                address,
                current_condition,
                doctor_id,
                radiologist_id,
            } => {
                let patient = NewPatient {
                    id: Uuid::new_v4(),
                    user_id: user.id,
                    name: user.display_name.clone(),
                    address: require_non_empty("address", &address)?,
                    current_condition: current_condition.filter(|c| !c.trim().is_empty()),
                    created_at: user.created_at,
                };
                queries::insert_patient(&mut tx, &patient).await?;

                if let Some(doctor_id) = doctor_id {
                    assign_in(&mut tx, StaffRef::Doctor(doctor_id), patient.id).await?;
                }
                if let Some(radiologist_id) = radiologist_id {
                    assign_in(&mut tx, StaffRef::Radiologist(radiologist_id), patient.id).await?;
                }

                let created = queries::get_patient(&mut tx, patient.id)
                    .await?
                    .ok_or(HmsError::PatientNotFound(patient.id))?;
                RoleEntity::Patient(created)
            }
        };
        tx.commit().await?;

        info!(user_id = %user.id, username = %user.username, role = %user.role, "Account created");
        Ok(entity)
    }

    /// 编辑患者资料，用户显示名同步更新
    pub async fn edit_patient_profile(&self, patient_id: Uuid, edit: PatientProfileEdit) -> Result<Patient> {
        let name = require_non_empty("name", &edit.name)?;
        let address = require_non_empty("address", &edit.address)?;
        let condition = edit
            .current_condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let mut tx = self.db.begin_write().await?;
        let patient = queries::get_patient(&mut tx, patient_id)
            .await?
            .ok_or(HmsError::PatientNotFound(patient_id))?;

        queries::update_patient_profile(&mut tx, patient_id, &name, &address, condition).await?;
        queries::update_user_display_name(&mut tx, patient.user_id, &name).await?;
        let updated = queries::get_patient(&mut tx, patient_id)
            .await?
            .ok_or(HmsError::PatientNotFound(patient_id))?;
        tx.commit().await?;

        info!(patient_id = %patient_id, "Patient profile updated");
        Ok(updated)
    }

    pub async fn rename_staff(&self, staff: StaffRef, name: &str) -> Result<()> {
        let name = require_non_empty("name", name)?;

        let mut tx = self.db.begin_write().await?;
        let row = require_staff(&mut tx, staff).await?;
        queries::update_staff_name(&mut tx, staff.kind(), row.id, &name).await?;
        queries::update_user_display_name(&mut tx, row.user_id, &name).await?;
        tx.commit().await?;

        info!(staff = ?staff, "Staff member renamed");
        Ok(())
    }

    /// 删除患者及其任务、影像、诊断和用户账号
    pub async fn delete_patient(&self, patient_id: Uuid) -> Result<()> {
        let mut tx = self.db.begin_write().await?;
        let patient = queries::get_patient(&mut tx, patient_id)
            .await?
            .ok_or(HmsError::PatientNotFound(patient_id))?;
        let files = delete_patient_in(&mut tx, &patient).await?;
        tx.commit().await?;

        self.discard_files(&files).await;
        info!(patient_id = %patient_id, images = files.len(), "Patient deleted");
        Ok(())
    }

    /// 按角色删除用户
    pub async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        let mut tx = self.db.begin_write().await?;
        let user = queries::get_user(&mut tx, user_id)
            .await?
            .ok_or_else(|| HmsError::not_found(Entity::User, user_id))?;

        let mut files = Vec::new();
        match user.role {
            UserRole::Patient => match queries::get_patient_by_user(&mut tx, user_id).await? {
                Some(patient) => files = delete_patient_in(&mut tx, &patient).await?,
                None => {
                    queries::delete_user(&mut tx, user_id).await?;
                }
            },
            UserRole::Doctor | UserRole::Radiologist => {
                let kind = if user.role == UserRole::Doctor {
                    StaffKind::Doctor
                } else {
                    StaffKind::Radiologist
                };
                match queries::get_staff_by_user(&mut tx, kind, user_id).await? {
                    Some(row) => {
                        let staff = match kind {
                            StaffKind::Doctor => StaffRef::Doctor(row.id),
                            StaffKind::Radiologist => StaffRef::Radiologist(row.id),
                        };
                        remove_staff_in(&mut tx, staff).await?;
                    }
                    None => {
                        queries::delete_user(&mut tx, user_id).await?;
                    }
                }
            }
            UserRole::Admin => {
                queries::delete_user(&mut tx, user_id).await?;
            }
        }
        tx.commit().await?;

        self.discard_files(&files).await;
        info!(user_id = %user_id, role = %user.role, "User deleted");
        Ok(())
    }

    /// 校验用户名口令，未知用户与错误口令返回相同错误
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Actor> {
        let mut conn = self.db.acquire().await?;
        let user = queries::get_user_by_username(&mut conn, username.trim()).await?;
        drop(conn);

        let rejected = || HmsError::Authorization("invalid username or password".to_string());
        let user = match user {
            Some(user) => user,
            None => {
                warn!(username = %username, "Login attempt for unknown user");
                return Err(rejected());
            }
        };

        if !self.hasher.verify(password, &user.password_hash)? {
            warn!(username = %username, "Login attempt with wrong password");
            return Err(rejected());
        }

        info!(user_id = %user.id, role = %user.role, "User authenticated");
        Ok(Actor::new(user.id, user.username, user.role))
    }

    async fn discard_files(&self, files: &[String]) {
        for path in files {
            if let Err(e) = self.store.delete(path).await {
                warn!(path = %path, error = %e, "Failed to remove image file");
            }
        }
    }
}

async fn create_staff(
    conn: &mut SqliteConnection,
    kind: StaffKind,
    user: &NewUser,
    patient_ids: &[Uuid],
) -> Result<hms_database::DbStaff> {
    let staff = NewStaff {
        id: Uuid::new_v4(),
        user_id: user.id,
        name: user.display_name.clone(),
    };
    queries::insert_staff(&mut *conn, kind, &staff).await?;

    let staff_ref = match kind {
        StaffKind::Doctor => StaffRef::Doctor(staff.id),
        StaffKind::Radiologist => StaffRef::Radiologist(staff.id),
    };
    set_staff_patients_in(&mut *conn, staff_ref, patient_ids).await?;
    require_staff(&mut *conn, staff_ref).await
}

/// 在调用方事务内删除患者，返回待删除的影像文件路径
async fn delete_patient_in(conn: &mut SqliteConnection, patient: &Patient) -> Result<Vec<String>> {
    let files = queries::list_images_for_patient(&mut *conn, patient.id)
        .await?
        .into_iter()
        .map(|image| image.storage_path)
        .collect();

    queries::delete_diagnoses_for_patient(&mut *conn, patient.id).await?;
    queries::delete_images_for_patient(&mut *conn, patient.id).await?;
    queries::delete_tasks_for_patient(&mut *conn, patient.id).await?;
    queries::remove_assignment(&mut *conn, StaffKind::Doctor, patient.id).await?;
    queries::remove_assignment(&mut *conn, StaffKind::Radiologist, patient.id).await?;
    queries::delete_patient(&mut *conn, patient.id).await?;
    queries::delete_user(&mut *conn, patient.user_id).await?;

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::AssignmentRegistry;
    use crate::lifecycle::{ImageUpload, TaskLifecycle};
    use crate::test_support::fixture;
    use hms_auth::Pbkdf2PasswordHasher;
    use hms_core::{ErrorKind, ImageType};

    fn service(fx: &crate::test_support::Fixture) -> AccountService {
        AccountService::new(
            fx.db.clone(),
            Arc::new(Pbkdf2PasswordHasher::new(10)),
            fx.store.clone(),
        )
    }

    fn account(username: &str, profile: AccountProfile) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            password: "hunter2".to_string(),
            display_name: username.to_uppercase(),
            profile,
        }
    }

    fn patient_profile(doctor_id: Option<Uuid>, radiologist_id: Option<Uuid>) -> AccountProfile {
        AccountProfile::Patient {
            address: "42 Elm Street".to_string(),
            current_condition: Some("Stable".to_string()),
            doctor_id,
            radiologist_id,
        }
    }

    async fn create_doctor(accounts: &AccountService, username: &str) -> Uuid {
        match accounts
            .create_account(account(username, AccountProfile::Doctor { patient_ids: vec![] }))
            .await
            .unwrap()
        {
            RoleEntity::Doctor(doctor) => doctor.id,
            other => panic!("unexpected entity {:?}", other.role()),
        }
    }

    async fn create_radiologist(accounts: &AccountService, username: &str) -> Uuid {
        match accounts
            .create_account(account(username, AccountProfile::Radiologist { patient_ids: vec![] }))
            .await
            .unwrap()
        {
            RoleEntity::Radiologist(radiologist) => radiologist.id,
            other => panic!("unexpected entity {:?}", other.role()),
        }
    }

    async fn create_patient(accounts: &AccountService, username: &str, doctor_id: Option<Uuid>) -> Patient {
        match accounts
            .create_account(account(username, patient_profile(doctor_id, None)))
            .await
            .unwrap()
        {
            RoleEntity::Patient(patient) => patient,
            other => panic!("unexpected entity {:?}", other.role()),
        }
    }

    #[tokio::test]
    async fn create_patient_with_assignments() {
        let fx = fixture().await;
        let accounts = service(&fx);
        let d = create_doctor(&accounts, "house").await;
        let r = create_radiologist(&accounts, "ray").await;

        let created = accounts
            .create_account(account("ada", patient_profile(Some(d), Some(r))))
            .await
            .unwrap();
        let patient = match created {
            RoleEntity::Patient(patient) => patient,
            other => panic!("unexpected entity {:?}", other.role()),
        };

        assert_eq!(patient.name, "ADA");
        assert_eq!(patient.total_cost, 0);
        assert_eq!(patient.assigned_doctor_id, Some(d));
        assert_eq!(patient.assigned_radiologist_id, Some(r));

        let registry = AssignmentRegistry::new(fx.db.clone());
        assert_eq!(registry.get_doctor(d).await.unwrap().patient_ids, vec![patient.id]);
        assert!(registry.verify_assignments().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn create_doctor_with_patient_set() {
        let fx = fixture().await;
        let accounts = service(&fx);
        let p = create_patient(&accounts, "ada", None).await;

        let created = accounts
            .create_account(account("house", AccountProfile::Doctor { patient_ids: vec![p.id] }))
            .await
            .unwrap();
        match created {
            RoleEntity::Doctor(doctor) => assert_eq!(doctor.patient_ids, vec![p.id]),
            other => panic!("unexpected entity {:?}", other.role()),
        }
    }

    #[tokio::test]
    async fn failed_account_creation_leaves_nothing_behind() {
        let fx = fixture().await;
        let accounts = service(&fx);

        let err = accounts
            .create_account(account("ada", patient_profile(Some(Uuid::new_v4()), None)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // 用户行随事务回滚，用户名仍可使用
        create_patient(&accounts, "ada", None).await;
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let fx = fixture().await;
        let accounts = service(&fx);
        create_patient(&accounts, "ada", None).await;

        let err = accounts
            .create_account(account("ada", AccountProfile::Admin))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn authenticate_hides_which_part_failed() {
        let fx = fixture().await;
        let accounts = service(&fx);
        accounts
            .create_account(account("root", AccountProfile::Admin))
            .await
            .unwrap();

        let actor = accounts.authenticate("root", "hunter2").await.unwrap();
        assert!(actor.is_admin());

        let wrong_password = accounts.authenticate("root", "nope").await.unwrap_err();
        let unknown_user = accounts.authenticate("nobody", "hunter2").await.unwrap_err();
        assert_eq!(wrong_password.kind(), ErrorKind::Authorization);
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[tokio::test]
    async fn edit_profile_and_rename_staff() {
        let fx = fixture().await;
        let accounts = service(&fx);
        let d = create_doctor(&accounts, "house").await;
        let p = create_patient(&accounts, "ada", Some(d)).await;

        let edited = accounts
            .edit_patient_profile(
                p.id,
                PatientProfileEdit {
                    name: "Ada Lovelace".to_string(),
                    address: "12 St James's Square".to_string(),
                    current_condition: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.name, "Ada Lovelace");
        assert_eq!(edited.current_condition, None);
        assert_eq!(edited.assigned_doctor_id, Some(d));

        accounts.rename_staff(StaffRef::Doctor(d), "Gregory House").await.unwrap();
        let registry = AssignmentRegistry::new(fx.db.clone());
        assert_eq!(registry.get_doctor(d).await.unwrap().name, "Gregory House");

        let err = accounts.rename_staff(StaffRef::Radiologist(d), "Nobody").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_patient_cascades() {
        let fx = fixture().await;
        let accounts = service(&fx);
        let d = create_doctor(&accounts, "house").await;
        let r = create_radiologist(&accounts, "ray").await;
        let p = create_patient(&accounts, "ada", Some(d)).await;

        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        lifecycle
            .upload_image(ImageUpload {
                patient_id: p.id,
                radiologist_id: r,
                image_type: ImageType::Ct,
                cost: 300,
                file_name: "head.dcm".to_string(),
                data: vec![7; 16],
            })
            .await
            .unwrap();
        assert_eq!(fx.stored_files(), 1);

        accounts.delete_patient(p.id).await.unwrap();

        assert_eq!(fx.stored_files(), 0);
        let registry = AssignmentRegistry::new(fx.db.clone());
        assert!(registry.get_doctor(d).await.unwrap().patient_ids.is_empty());
        let err = accounts.authenticate("ada", "hunter2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn delete_user_removes_staff_role() {
        let fx = fixture().await;
        let accounts = service(&fx);
        let r = create_radiologist(&accounts, "ray").await;
        let p = create_patient(&accounts, "ada", None).await;
        let registry = AssignmentRegistry::new(fx.db.clone());
        registry.assign_radiologist(p.id, r).await.unwrap();

        let actor = accounts.authenticate("ray", "hunter2").await.unwrap();
        accounts.delete_user(actor.user_id).await.unwrap();

        assert_eq!(registry.get_radiologist(r).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert!(registry.verify_assignments().await.unwrap().is_consistent());

        let err = accounts.delete_user(actor.user_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
