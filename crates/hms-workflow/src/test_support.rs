//! 测试夹具：内存数据库、临时目录存储和直接写库的账号构造

use async_trait::async_trait;
use chrono::Utc;
use hms_core::{HmsError, Result, StaffKind, UserRole};
use hms_database::{queries, DatabasePool, NewPatient, NewStaff, NewUser};
use hms_storage::{ImageStore, LocalImageStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub(crate) struct Fixture {
    pub db: DatabasePool,
    pub store: Arc<LocalImageStore>,
    pub dir: TempDir,
}

pub(crate) async fn fixture() -> Fixture {
    let db = DatabasePool::in_memory().await.unwrap();
    db.create_tables().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalImageStore::new(dir.path()));
    Fixture { db, store, dir }
}

impl Fixture {
    /// 影像目录下现存文件数
    pub fn stored_files(&self) -> usize {
        match std::fs::read_dir(self.dir.path().join(hms_storage::IMAGE_DIR)) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

async fn user(db: &DatabasePool, name: &str, role: UserRole) -> Uuid {
    let mut conn = db.acquire().await.unwrap();
    let id = Uuid::new_v4();
    let new_user = NewUser {
        id,
        username: format!("{}-{}", name.to_lowercase().replace(' ', "."), &id.to_string()[..8]),
        password_hash: "unused".to_string(),
        role,
        display_name: name.to_string(),
        created_at: Utc::now(),
    };
    queries::insert_user(&mut *conn, &new_user).await.unwrap();
    id
}

pub(crate) async fn patient(db: &DatabasePool, name: &str) -> Uuid {
    let user_id = user(db, name, UserRole::Patient).await;
    let mut conn = db.acquire().await.unwrap();
    let id = Uuid::new_v4();
    let new_patient = NewPatient {
        id,
        user_id,
        name: name.to_string(),
        address: "1 Hospital Road".to_string(),
        current_condition: None,
        created_at: Utc::now(),
    };
    queries::insert_patient(&mut *conn, &new_patient).await.unwrap();
    id
}

async fn staff(db: &DatabasePool, name: &str, kind: StaffKind) -> Uuid {
    let role = match kind {
        StaffKind::Doctor => UserRole::Doctor,
        StaffKind::Radiologist => UserRole::Radiologist,
    };
    let user_id = user(db, name, role).await;
    let mut conn = db.acquire().await.unwrap();
    let id = Uuid::new_v4();
    let new_staff = NewStaff {
        id,
        user_id,
        name: name.to_string(),
    };
    queries::insert_staff(&mut *conn, kind, &new_staff).await.unwrap();
    id
}

pub(crate) async fn doctor(db: &DatabasePool, name: &str) -> Uuid {
    staff(db, name, StaffKind::Doctor).await
}

pub(crate) async fn radiologist(db: &DatabasePool, name: &str) -> Uuid {
    staff(db, name, StaffKind::Radiologist).await
}

pub(crate) async fn total_cost(db: &DatabasePool, patient_id: Uuid) -> i64 {
    let mut conn = db.acquire().await.unwrap();
    queries::get_total_cost(&mut *conn, patient_id)
        .await
        .unwrap()
        .unwrap()
}

/// 写入总是失败的存储
pub(crate) struct FailingStore;

#[async_trait]
impl ImageStore for FailingStore {
    async fn store(&self, _file_name: &str, _data: &[u8]) -> Result<String> {
        Err(HmsError::Storage("disk full".to_string()))
    }

    async fn delete(&self, _storage_path: &str) -> Result<()> {
        Err(HmsError::Storage("disk unavailable".to_string()))
    }

    async fn read(&self, _storage_path: &str) -> Result<Vec<u8>> {
        Err(HmsError::Storage("disk unavailable".to_string()))
    }
}

/// 写入成功、删除失败的存储，记录删除尝试次数
#[derive(Default)]
pub(crate) struct StickyStore {
    pub delete_attempts: AtomicUsize,
}

#[async_trait]
impl ImageStore for StickyStore {
    async fn store(&self, file_name: &str, _data: &[u8]) -> Result<String> {
        Ok(format!("{}/{}", hms_storage::IMAGE_DIR, file_name))
    }

    async fn delete(&self, _storage_path: &str) -> Result<()> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        Err(HmsError::Storage("permission denied".to_string()))
    }

    async fn read(&self, _storage_path: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}
