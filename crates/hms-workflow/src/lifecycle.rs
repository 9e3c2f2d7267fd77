//! 任务与影像生命周期
//!
//! 任务、影像的增删改与费用账本在同一事务内提交。影像文件在事务前写入，
//! 事务失败时尽力删除；删除影像时文件在提交后移除，失败只记录日志。

use chrono::{DateTime, Utc};
use hms_core::utils::{require_non_empty, validate_cost, validate_image_extension, BILLING_TASK_DESCRIPTION};
use hms_core::{Entity, HmsError, ImageType, MedicalImage, PatientTask, Result, StaffKind, TaskStatus};
use hms_database::{queries, DatabasePool, NewImage, NewTask, SqliteConnection};
use hms_storage::ImageStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::apply_delta_in;
use crate::state_machine::TaskStateMachine;

/// 影像上传请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUpload {
    pub patient_id: Uuid,
    pub radiologist_id: Uuid,
    pub image_type: ImageType,
    pub cost: i64,
    pub file_name: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// 任务编辑请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEdit {
    pub description: String,
    pub cost: i64,
    pub status: TaskStatus,
}

/// 删除任务的结果
#[derive(Debug, Clone, Serialize)]
pub struct TaskRemoval {
    pub task: PatientTask,
    pub removed_image: Option<Uuid>,
    pub total_cost: i64,
}

/// 任务与影像生命周期
#[derive(Clone)]
pub struct TaskLifecycle {
    db: DatabasePool,
    store: Arc<dyn ImageStore>,
    state_machine: Arc<TaskStateMachine>,
}

impl TaskLifecycle {
    pub fn new(db: DatabasePool, store: Arc<dyn ImageStore>) -> Self {
        Self {
            db,
            store,
            state_machine: Arc::new(TaskStateMachine::new()),
        }
    }

    // ========== 任务相关操作 ==========

    /// 新建任务，状态为待处理，费用计入账本
    pub async fn add_task(
        &self,
        patient_id: Uuid,
        description: &str,
        cost: i64,
        date: DateTime<Utc>,
    ) -> Result<PatientTask> {
        let description = require_non_empty("description", description)?;
        validate_cost(cost)?;

        let task = NewTask {
            id: Uuid::new_v4(),
            patient_id,
            description,
            cost,
            date,
            status: TaskStatus::Pending,
        };

        let mut tx = self.db.begin_write().await?;
        if queries::get_patient(&mut tx, patient_id).await?.is_none() {
            return Err(HmsError::PatientNotFound(patient_id));
        }
        queries::insert_task(&mut tx, &task).await?;
        let total = apply_delta_in(&mut tx, patient_id, cost).await?;
        tx.commit().await?;

        info!(task_id = %task.id, patient_id = %patient_id, cost, total_cost = total, "Task added");
        Ok(PatientTask {
            id: task.id,
            patient_id,
            description: task.description,
            cost,
            date,
            status: TaskStatus::Pending,
        })
    }

    /// 编辑任务，按新旧费用差额调整账本
    pub async fn edit_task(&self, task_id: Uuid, edit: TaskEdit) -> Result<PatientTask> {
        let description = require_non_empty("description", &edit.description)?;
        validate_cost(edit.cost)?;

        let mut tx = self.db.begin_write().await?;
        let task = queries::get_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| HmsError::not_found(Entity::Task, task_id))?;

        let status = self.state_machine.transition(task.status, edit.status)?;
        queries::update_task(&mut tx, task_id, &description, edit.cost, status).await?;

        // 计费任务与其影像的费用保持一致
        if let Some(image) = queries::get_image_by_billing_task(&mut tx, task_id).await? {
            queries::update_image_cost(&mut tx, image.id, edit.cost).await?;
        }

        let delta = edit.cost - task.cost;
        let total = apply_delta_in(&mut tx, task.patient_id, delta).await?;
        tx.commit().await?;

        info!(
            task_id = %task_id,
            from = %task.status,
            to = %status,
            delta,
            total_cost = total,
            "Task updated"
        );
        Ok(PatientTask {
            id: task_id,
            patient_id: task.patient_id,
            description,
            cost: edit.cost,
            date: task.date,
            status,
        })
    }

    /// 删除任务，计费任务连同其影像一起删除
    pub async fn delete_task(&self, task_id: Uuid) -> Result<TaskRemoval> {
        let mut tx = self.db.begin_write().await?;
        let task = queries::get_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| HmsError::not_found(Entity::Task, task_id))?;

        let image = queries::get_image_by_billing_task(&mut tx, task_id).await?;
        if let Some(image) = &image {
            remove_image_rows(&mut tx, image.id).await?;
        }
        queries::delete_task(&mut tx, task_id).await?;
        let total = apply_delta_in(&mut tx, task.patient_id, -task.cost).await?;
        tx.commit().await?;

        if let Some(image) = &image {
            self.discard_file(&image.storage_path).await;
        }

        info!(task_id = %task_id, patient_id = %task.patient_id, total_cost = total, "Task deleted");
        Ok(TaskRemoval {
            removed_image: image.map(|image| image.id),
            task,
            total_cost: total,
        })
    }

    pub async fn list_patient_tasks(&self, patient_id: Uuid) -> Result<Vec<PatientTask>> {
        let mut conn = self.db.acquire().await?;
        if queries::get_patient(&mut conn, patient_id).await?.is_none() {
            return Err(HmsError::PatientNotFound(patient_id));
        }
        queries::list_tasks_for_patient(&mut conn, patient_id).await
    }

    // ========== 影像相关操作 ==========

    /// 上传影像：写入文件，在一个事务内创建影像、计费任务并计入费用
    pub async fn upload_image(&self, upload: ImageUpload) -> Result<MedicalImage> {
        let extension = validate_image_extension(&upload.file_name)?;
        if upload.data.is_empty() {
            return Err(HmsError::validation("no file uploaded"));
        }
        validate_cost(upload.cost)?;

        let mut tx = self.db.begin_write().await?;
        if queries::get_patient(&mut tx, upload.patient_id).await?.is_none() {
            return Err(HmsError::PatientNotFound(upload.patient_id));
        }
        if queries::get_staff(&mut tx, StaffKind::Radiologist, upload.radiologist_id)
            .await?
            .is_none()
        {
            return Err(HmsError::not_found(Entity::Radiologist, upload.radiologist_id));
        }

        let image_id = Uuid::new_v4();
        let file_name = format!("{}{}", image_id, extension);
        let storage_path = self.store.store(&file_name, &upload.data).await?;

        let now = Utc::now();
        let image = NewImage {
            id: image_id,
            patient_id: upload.patient_id,
            storage_path,
            image_type: upload.image_type,
            uploaded_by_radiologist_id: upload.radiologist_id,
            cost: upload.cost,
            uploaded_at: now,
            billing_task_id: Some(Uuid::new_v4()),
        };

        let outcome = match persist_upload(&mut tx, &image).await {
            Ok(total) => tx.commit().await.map(|()| total).map_err(HmsError::from),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback after failed upload also failed");
                }
                Err(e)
            }
        };

        let total = match outcome {
            Ok(total) => total,
            Err(e) => {
                self.discard_file(&image.storage_path).await;
                return Err(e);
            }
        };

        info!(
            image_id = %image.id,
            patient_id = %image.patient_id,
            cost = image.cost,
            total_cost = total,
            "Medical image uploaded"
        );
        Ok(MedicalImage {
            id: image.id,
            patient_id: image.patient_id,
            storage_path: image.storage_path,
            image_type: image.image_type,
            uploaded_by_radiologist_id: Some(image.uploaded_by_radiologist_id),
            cost: Some(image.cost),
            is_classified: false,
            disease_category: None,
            notes: None,
            uploaded_at: now,
            classified_at: None,
            billing_task_id: image.billing_task_id,
        })
    }

    /// 删除影像，只允许上传者本人操作；连同计费任务一起删除
    pub async fn delete_image(&self, image_id: Uuid, radiologist_id: Uuid) -> Result<i64> {
        let mut tx = self.db.begin_write().await?;
        let image = queries::get_image(&mut tx, image_id)
            .await?
            .ok_or_else(|| HmsError::not_found(Entity::Image, image_id))?;

        if image.uploaded_by_radiologist_id != Some(radiologist_id) {
            warn!(image_id = %image_id, radiologist_id = %radiologist_id, "Rejected image deletion by non-uploader");
            return Err(HmsError::Authorization(
                "only the uploading radiologist may delete this image".to_string(),
            ));
        }

        remove_image_rows(&mut tx, image_id).await?;
        if let Some(task_id) = image.billing_task_id {
            queries::delete_task(&mut tx, task_id).await?;
        }
        let total = apply_delta_in(&mut tx, image.patient_id, -image.cost.unwrap_or(0)).await?;
        tx.commit().await?;

        self.discard_file(&image.storage_path).await;

        info!(image_id = %image_id, patient_id = %image.patient_id, total_cost = total, "Medical image deleted");
        Ok(total)
    }

    pub async fn list_patient_images(&self, patient_id: Uuid) -> Result<Vec<MedicalImage>> {
        let mut conn = self.db.acquire().await?;
        if queries::get_patient(&mut conn, patient_id).await?.is_none() {
            return Err(HmsError::PatientNotFound(patient_id));
        }
        queries::list_images_for_patient(&mut conn, patient_id).await
    }

    /// 尽力删除文件，失败不影响已提交的数据
    async fn discard_file(&self, storage_path: &str) {
        if let Err(e) = self.store.delete(storage_path).await {
            warn!(path = %storage_path, error = %e, "Failed to remove image file");
        }
    }
}

/// 计费任务、影像记录和费用增量
async fn persist_upload(conn: &mut SqliteConnection, image: &NewImage) -> Result<i64> {
    if let Some(task_id) = image.billing_task_id {
        let task = NewTask {
            id: task_id,
            patient_id: image.patient_id,
            description: BILLING_TASK_DESCRIPTION.to_string(),
            cost: image.cost,
            date: image.uploaded_at,
            status: TaskStatus::Pending,
        };
        queries::insert_task(&mut *conn, &task).await?;
    }
    queries::insert_image(&mut *conn, image).await?;
    apply_delta_in(&mut *conn, image.patient_id, image.cost).await
}

/// 诊断保留，只解除对影像的引用
pub(crate) async fn remove_image_rows(conn: &mut SqliteConnection, image_id: Uuid) -> Result<()> {
    queries::clear_diagnosis_image(&mut *conn, image_id).await?;
    queries::delete_image(&mut *conn, image_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CostLedger;
    use crate::test_support::{fixture, patient, radiologist, total_cost, FailingStore, StickyStore};
    use hms_core::ErrorKind;
    use std::sync::atomic::Ordering;

    fn edit(description: &str, cost: i64, status: TaskStatus) -> TaskEdit {
        TaskEdit {
            description: description.to_string(),
            cost,
            status,
        }
    }

    fn upload(patient_id: Uuid, radiologist_id: Uuid, cost: i64) -> ImageUpload {
        ImageUpload {
            patient_id,
            radiologist_id,
            image_type: ImageType::Mri,
            cost,
            file_name: "brain.PNG".to_string(),
            data: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn ledger_follows_task_and_image_changes() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;
        let r = radiologist(&fx.db, "Dr Ray").await;

        assert_eq!(total_cost(&fx.db, p).await, 0);

        let task = lifecycle.add_task(p, "Consultation", 100, Utc::now()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(total_cost(&fx.db, p).await, 100);

        let image = lifecycle.upload_image(upload(p, r, 50)).await.unwrap();
        assert_eq!(total_cost(&fx.db, p).await, 150);

        lifecycle.delete_task(task.id).await.unwrap();
        assert_eq!(total_cost(&fx.db, p).await, 50);

        lifecycle.delete_image(image.id, r).await.unwrap();
        assert_eq!(total_cost(&fx.db, p).await, 0);
        assert!(lifecycle.list_patient_tasks(p).await.unwrap().is_empty());
        assert_eq!(fx.stored_files(), 0);
    }

    #[tokio::test]
    async fn edit_applies_cost_delta_once() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;

        let task = lifecycle.add_task(p, "X-ray review", 100, Utc::now()).await.unwrap();
        let updated = lifecycle
            .edit_task(task.id, edit("X-ray review", 30, TaskStatus::InProgress))
            .await
            .unwrap();

        assert_eq!(updated.cost, 30);
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(total_cost(&fx.db, p).await, 30);
    }

    #[tokio::test]
    async fn edit_rejects_reopening_completed_task() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;

        let task = lifecycle.add_task(p, "Surgery", 500, Utc::now()).await.unwrap();
        lifecycle
            .edit_task(task.id, edit("Surgery", 500, TaskStatus::InProgress))
            .await
            .unwrap();
        lifecycle
            .edit_task(task.id, edit("Surgery", 500, TaskStatus::Completed))
            .await
            .unwrap();

        let err = lifecycle
            .edit_task(task.id, edit("Surgery", 100, TaskStatus::Pending))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        // 失败的编辑不改变账本
        assert_eq!(total_cost(&fx.db, p).await, 500);
    }

    #[tokio::test]
    async fn pending_task_can_be_cancelled() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;

        let task = lifecycle.add_task(p, "Checkup", 80, Utc::now()).await.unwrap();
        let cancelled = lifecycle
            .edit_task(task.id, edit("Checkup", 80, TaskStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        // 增量更新不排除已取消任务，重算会排除
        assert_eq!(total_cost(&fx.db, p).await, 80);
        let ledger = CostLedger::new(fx.db.clone());
        assert_eq!(ledger.recompute(p).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn add_task_validates_input() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;

        let err = lifecycle.add_task(p, "  ", 10, Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = lifecycle.add_task(p, "Checkup", -1, Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = lifecycle
            .add_task(Uuid::new_v4(), "Checkup", 10, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, HmsError::PatientNotFound(_)));

        let err = lifecycle
            .edit_task(Uuid::new_v4(), edit("Checkup", 10, TaskStatus::Pending))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn upload_creates_billing_task_and_file() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;
        let r = radiologist(&fx.db, "Dr Ray").await;

        let image = lifecycle.upload_image(upload(p, r, 75)).await.unwrap();
        assert!(image.storage_path.ends_with(".png"));
        assert_eq!(fx.stored_files(), 1);

        let tasks = lifecycle.list_patient_tasks(p).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, BILLING_TASK_DESCRIPTION);
        assert_eq!(tasks[0].cost, 75);
        assert_eq!(Some(tasks[0].id), image.billing_task_id);

        // 重算与增量结果一致
        let ledger = CostLedger::new(fx.db.clone());
        assert_eq!(ledger.recompute(p).await.unwrap(), 75);
    }

    #[tokio::test]
    async fn upload_rejects_bad_input_without_side_effects() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;
        let r = radiologist(&fx.db, "Dr Ray").await;

        let mut bad_type = upload(p, r, 10);
        bad_type.file_name = "notes.txt".to_string();
        assert_eq!(
            lifecycle.upload_image(bad_type).await.unwrap_err().kind(),
            ErrorKind::Validation
        );

        let mut empty = upload(p, r, 10);
        empty.data.clear();
        assert_eq!(lifecycle.upload_image(empty).await.unwrap_err().kind(), ErrorKind::Validation);

        assert_eq!(
            lifecycle.upload_image(upload(p, r, -5)).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            lifecycle
                .upload_image(upload(p, Uuid::new_v4(), 10))
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );

        assert_eq!(fx.stored_files(), 0);
        assert_eq!(total_cost(&fx.db, p).await, 0);
        assert!(lifecycle.list_patient_images(p).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_file_write_leaves_no_records() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), Arc::new(FailingStore));
        let p = patient(&fx.db, "Ada").await;
        let r = radiologist(&fx.db, "Dr Ray").await;

        let err = lifecycle.upload_image(upload(p, r, 60)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);

        assert_eq!(total_cost(&fx.db, p).await, 0);
        assert!(lifecycle.list_patient_tasks(p).await.unwrap().is_empty());
        assert!(lifecycle.list_patient_images(p).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_uploader_may_delete_image() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;
        let r1 = radiologist(&fx.db, "Dr Ray").await;
        let r2 = radiologist(&fx.db, "Dr Xavier").await;

        let image = lifecycle.upload_image(upload(p, r1, 40)).await.unwrap();

        let err = lifecycle.delete_image(image.id, r2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(lifecycle.list_patient_images(p).await.unwrap().len(), 1);
        assert_eq!(total_cost(&fx.db, p).await, 40);

        let err = lifecycle.delete_image(Uuid::new_v4(), r1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn deleting_billing_task_removes_image() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;
        let r = radiologist(&fx.db, "Dr Ray").await;

        let image = lifecycle.upload_image(upload(p, r, 90)).await.unwrap();
        let task_id = image.billing_task_id.unwrap();

        let removal = lifecycle.delete_task(task_id).await.unwrap();
        assert_eq!(removal.removed_image, Some(image.id));
        assert_eq!(removal.total_cost, 0);
        assert!(lifecycle.list_patient_images(p).await.unwrap().is_empty());
        assert_eq!(fx.stored_files(), 0);
    }

    #[tokio::test]
    async fn editing_billing_task_updates_image_cost() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;
        let r = radiologist(&fx.db, "Dr Ray").await;

        let image = lifecycle.upload_image(upload(p, r, 90)).await.unwrap();
        let task_id = image.billing_task_id.unwrap();
        lifecycle
            .edit_task(task_id, edit(BILLING_TASK_DESCRIPTION, 120, TaskStatus::Pending))
            .await
            .unwrap();

        let images = lifecycle.list_patient_images(p).await.unwrap();
        assert_eq!(images[0].cost, Some(120));
        assert_eq!(total_cost(&fx.db, p).await, 120);

        lifecycle.delete_image(image.id, r).await.unwrap();
        assert_eq!(total_cost(&fx.db, p).await, 0);
    }

    #[tokio::test]
    async fn file_removal_failure_does_not_undo_delete() {
        let fx = fixture().await;
        let store = Arc::new(StickyStore::default());
        let lifecycle = TaskLifecycle::new(fx.db.clone(), store.clone());
        let p = patient(&fx.db, "Ada").await;
        let r = radiologist(&fx.db, "Dr Ray").await;

        let image = lifecycle.upload_image(upload(p, r, 25)).await.unwrap();
        assert_eq!(lifecycle.delete_image(image.id, r).await.unwrap(), 0);

        assert_eq!(store.delete_attempts.load(Ordering::SeqCst), 1);
        assert!(lifecycle.list_patient_images(p).await.unwrap().is_empty());
        assert!(lifecycle.list_patient_tasks(p).await.unwrap().is_empty());
    }

    /// 增量维护的总费用必须等于重算结果
    async fn assert_reconciled(db: &DatabasePool, patient_id: Uuid) {
        let incremental = total_cost(db, patient_id).await;
        let recomputed = CostLedger::new(db.clone()).recompute(patient_id).await.unwrap();
        assert_eq!(incremental, recomputed);
    }

    #[tokio::test]
    async fn incremental_total_matches_recompute_at_every_step() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;
        let r = radiologist(&fx.db, "Dr Ray").await;

        let consult = lifecycle.add_task(p, "Consultation", 100, Utc::now()).await.unwrap();
        assert_reconciled(&fx.db, p).await;

        let scan = lifecycle.upload_image(upload(p, r, 250)).await.unwrap();
        assert_reconciled(&fx.db, p).await;

        let blood = lifecycle.add_task(p, "Blood test", 40, Utc::now()).await.unwrap();
        assert_reconciled(&fx.db, p).await;

        lifecycle
            .edit_task(blood.id, edit("Blood test", 65, TaskStatus::InProgress))
            .await
            .unwrap();
        assert_reconciled(&fx.db, p).await;

        let second_scan = lifecycle.upload_image(upload(p, r, 80)).await.unwrap();
        assert_reconciled(&fx.db, p).await;

        lifecycle.delete_task(consult.id).await.unwrap();
        assert_reconciled(&fx.db, p).await;

        lifecycle.delete_image(scan.id, r).await.unwrap();
        assert_reconciled(&fx.db, p).await;

        lifecycle.delete_task(second_scan.billing_task_id.unwrap()).await.unwrap();
        assert_reconciled(&fx.db, p).await;

        lifecycle.delete_task(blood.id).await.unwrap();
        assert_reconciled(&fx.db, p).await;
        assert_eq!(total_cost(&fx.db, p).await, 0);
    }

    #[tokio::test]
    async fn overflowing_cost_is_rejected_without_changes() {
        let fx = fixture().await;
        let lifecycle = TaskLifecycle::new(fx.db.clone(), fx.store.clone());
        let p = patient(&fx.db, "Ada").await;
        let r = radiologist(&fx.db, "Dr Ray").await;
        let half = i64::MAX / 2 + 1;

        lifecycle.add_task(p, "Transplant", half, Utc::now()).await.unwrap();

        let err = lifecycle.add_task(p, "Transplant", half, Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(total_cost(&fx.db, p).await, half);
        assert_eq!(lifecycle.list_patient_tasks(p).await.unwrap().len(), 1);

        // 文件已写入后事务失败，文件随之删除
        let err = lifecycle.upload_image(upload(p, r, half)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(fx.stored_files(), 0);
        assert!(lifecycle.list_patient_images(p).await.unwrap().is_empty());
        assert_eq!(lifecycle.list_patient_tasks(p).await.unwrap().len(), 1);
        assert_eq!(total_cost(&fx.db, p).await, half);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_wait_for_the_write_lock() {
        let dir = tempfile::tempdir().unwrap();
        let settings = hms_database::DatabaseSettings {
            url: format!("sqlite://{}", dir.path().join("hms.db").display()),
            max_connections: 8,
            busy_timeout: std::time::Duration::from_secs(5),
        };
        let db = DatabasePool::connect(&settings).await.unwrap();
        db.create_tables().await.unwrap();
        let store = Arc::new(hms_storage::LocalImageStore::new(dir.path()));
        let lifecycle = TaskLifecycle::new(db.clone(), store);
        let p = patient(&db, "Ada").await;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.add_task(p, "Ward round", 10, Utc::now()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(total_cost(&db, p).await, 200);
        assert_eq!(lifecycle.list_patient_tasks(p).await.unwrap().len(), 20);
        db.close().await;
    }
}
