//! 数据库查询操作
//!
//! 每个函数只执行自身的语句，事务边界由调用方决定。

use crate::models::*;
use chrono::{DateTime, Utc};
use hms_core::{HmsError, MedicalImage, Patient, PatientTask, Result, StaffKind, TaskStatus, User};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

/// 创建数据库表
pub async fn create_tables(conn: &mut SqliteConnection) -> Result<()> {
    let tables = [
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id BLOB PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            display_name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS doctors (
            id BLOB PRIMARY KEY,
            user_id BLOB NOT NULL UNIQUE REFERENCES users(id),
            name TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS radiologists (
            id BLOB PRIMARY KEY,
            user_id BLOB NOT NULL UNIQUE REFERENCES users(id),
            name TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS patients (
            id BLOB PRIMARY KEY,
            user_id BLOB NOT NULL UNIQUE REFERENCES users(id),
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            current_condition TEXT,
            assigned_doctor_id BLOB REFERENCES doctors(id),
            assigned_radiologist_id BLOB REFERENCES radiologists(id),
            total_cost INTEGER NOT NULL DEFAULT 0 CHECK (total_cost >= 0),
            last_visit TEXT,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS doctor_patients (
            patient_id BLOB PRIMARY KEY REFERENCES patients(id),
            doctor_id BLOB NOT NULL REFERENCES doctors(id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS radiologist_patients (
            patient_id BLOB PRIMARY KEY REFERENCES patients(id),
            radiologist_id BLOB NOT NULL REFERENCES radiologists(id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS patient_tasks (
            id BLOB PRIMARY KEY,
            patient_id BLOB NOT NULL REFERENCES patients(id),
            description TEXT NOT NULL,
            cost INTEGER NOT NULL,
            task_date TEXT NOT NULL,
            status TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS medical_images (
            id BLOB PRIMARY KEY,
            patient_id BLOB NOT NULL REFERENCES patients(id),
            storage_path TEXT NOT NULL,
            image_type TEXT NOT NULL,
            uploaded_by_radiologist_id BLOB REFERENCES radiologists(id),
            cost INTEGER,
            is_classified BOOLEAN NOT NULL DEFAULT 0,
            disease_category TEXT,
            notes TEXT,
            uploaded_at TEXT NOT NULL,
            classified_at TEXT,
            billing_task_id BLOB REFERENCES patient_tasks(id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS diagnoses (
            id BLOB PRIMARY KEY,
            patient_id BLOB NOT NULL REFERENCES patients(id),
            diagnosed_by_doctor_id BLOB REFERENCES doctors(id),
            medical_image_id BLOB REFERENCES medical_images(id),
            disease_type TEXT NOT NULL,
            notes TEXT NOT NULL,
            diagnosed_at TEXT NOT NULL
        )
        "#,
    ];

    for table_sql in tables {
        sqlx::query(table_sql).execute(&mut *conn).await?;
    }

    // 创建索引以优化查询性能
    create_indexes(conn).await?;

    tracing::info!("Database tables created successfully");
    Ok(())
}

/// 创建数据库索引
async fn create_indexes(conn: &mut SqliteConnection) -> Result<()> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_patients_doctor ON patients(assigned_doctor_id)",
        "CREATE INDEX IF NOT EXISTS idx_patients_radiologist ON patients(assigned_radiologist_id)",
        "CREATE INDEX IF NOT EXISTS idx_doctor_patients_doctor ON doctor_patients(doctor_id)",
        "CREATE INDEX IF NOT EXISTS idx_radiologist_patients_radiologist ON radiologist_patients(radiologist_id)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_patient ON patient_tasks(patient_id)",
        "CREATE INDEX IF NOT EXISTS idx_images_patient ON medical_images(patient_id)",
        "CREATE INDEX IF NOT EXISTS idx_images_billing_task ON medical_images(billing_task_id)",
        "CREATE INDEX IF NOT EXISTS idx_diagnoses_patient ON diagnoses(patient_id)",
        "CREATE INDEX IF NOT EXISTS idx_diagnoses_doctor ON diagnoses(diagnosed_by_doctor_id)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(&mut *conn).await?;
    }

    tracing::debug!("Database indexes created successfully");
    Ok(())
}

// ========== 用户相关操作 ==========

/// 创建新用户
pub async fn insert_user(conn: &mut SqliteConnection, user: &NewUser) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (id, username, password_hash, role, display_name, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(&user.password_hash)
    .bind(user.role.as_str())
    .bind(&user.display_name)
    .bind(user.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// 根据ID查找用户
pub async fn get_user(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<User>> {
    let result = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    result.map(User::try_from).transpose()
}

/// 根据用户名查找用户
pub async fn get_user_by_username(conn: &mut SqliteConnection, username: &str) -> Result<Option<User>> {
    let result = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;

    result.map(User::try_from).transpose()
}

pub async fn update_user_display_name(conn: &mut SqliteConnection, id: Uuid, display_name: &str) -> Result<()> {
    sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
        .bind(display_name)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_user(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ========== 患者相关操作 ==========

/// 创建新患者，初始费用为零
pub async fn insert_patient(conn: &mut SqliteConnection, patient: &NewPatient) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO patients (id, user_id, name, address, current_condition, total_cost, last_visit, created_at)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(patient.id)
    .bind(patient.user_id)
    .bind(&patient.name)
    .bind(&patient.address)
    .bind(&patient.current_condition)
    .bind(patient.created_at)
    .bind(patient.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// 根据ID查找患者
pub async fn get_patient(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Patient>> {
    let result = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(result.map(Patient::from))
}

pub async fn get_patient_by_user(conn: &mut SqliteConnection, user_id: Uuid) -> Result<Option<Patient>> {
    let result = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(result.map(Patient::from))
}

/// 按患者外键列出某医护人员的患者
pub async fn list_patients_for_staff(
    conn: &mut SqliteConnection,
    kind: StaffKind,
    staff_id: Uuid,
) -> Result<Vec<Patient>> {
    let sql = format!(
        "SELECT * FROM patients WHERE {} = ? ORDER BY name",
        patient_fk_column(kind)
    );
    let results = sqlx::query_as::<_, DbPatient>(&sql)
        .bind(staff_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(results.into_iter().map(Patient::from).collect())
}

pub async fn update_patient_profile(
    conn: &mut SqliteConnection,
    id: Uuid,
    name: &str,
    address: &str,
    current_condition: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE patients SET name = ?, address = ?, current_condition = ? WHERE id = ?",
    )
    .bind(name)
    .bind(address)
    .bind(current_condition)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_patient_condition(
    conn: &mut SqliteConnection,
    id: Uuid,
    condition: &str,
    last_visit: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query("UPDATE patients SET current_condition = ?, last_visit = ? WHERE id = ?")
        .bind(condition)
        .bind(last_visit)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// 设置患者侧的医护外键
pub async fn set_patient_staff(
    conn: &mut SqliteConnection,
    kind: StaffKind,
    patient_id: Uuid,
    staff_id: Option<Uuid>,
) -> Result<()> {
    let sql = format!("UPDATE patients SET {} = ? WHERE id = ?", patient_fk_column(kind));
    sqlx::query(&sql)
        .bind(staff_id)
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_patient(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM patients WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ========== 费用账本 ==========

/// 调整累计费用并截断到零，返回新值；患者不存在时返回None
///
/// 须在写事务内调用，读取与更新之间不会有其他写入。溢出时返回验证错误且不修改数据。
pub async fn adjust_total_cost(conn: &mut SqliteConnection, patient_id: Uuid, delta: i64) -> Result<Option<i64>> {
    let Some(current) = get_total_cost(&mut *conn, patient_id).await? else {
        return Ok(None);
    };
    let total = current
        .checked_add(delta)
        .ok_or_else(|| HmsError::Validation(format!("total cost overflow: {} + {}", current, delta)))?
        .max(0);

    set_total_cost(conn, patient_id, total).await?;
    Ok(Some(total))
}

pub async fn set_total_cost(conn: &mut SqliteConnection, patient_id: Uuid, total: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE patients SET total_cost = ? WHERE id = ?")
        .bind(total)
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_total_cost(conn: &mut SqliteConnection, patient_id: Uuid) -> Result<Option<i64>> {
    let row = sqlx::query("SELECT total_cost FROM patients WHERE id = ?")
        .bind(patient_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|row| row.try_get::<i64, _>("total_cost")).transpose()?)
}

/// 未取消任务的费用加上没有计费任务的影像费用
pub async fn sum_billable_costs(conn: &mut SqliteConnection, patient_id: Uuid) -> Result<i64> {
    let row = sqlx::query(
        r#"
        SELECT
            (SELECT COALESCE(SUM(cost), 0) FROM patient_tasks
                WHERE patient_id = ? AND status <> ?) AS task_total,
            (SELECT COALESCE(SUM(cost), 0) FROM medical_images
                WHERE patient_id = ? AND billing_task_id IS NULL AND cost IS NOT NULL) AS image_total
        "#,
    )
    .bind(patient_id)
    .bind(TaskStatus::Cancelled.as_str())
    .bind(patient_id)
    .fetch_one(&mut *conn)
    .await?;

    let task_total = row.try_get::<i64, _>("task_total")?;
    let image_total = row.try_get::<i64, _>("image_total")?;
    task_total
        .checked_add(image_total)
        .ok_or_else(|| HmsError::Validation(format!("total cost overflow: {} + {}", task_total, image_total)))
}

// ========== 医护人员相关操作 ==========

pub async fn insert_staff(conn: &mut SqliteConnection, kind: StaffKind, staff: &NewStaff) -> Result<()> {
    let sql = format!("INSERT INTO {} (id, user_id, name) VALUES (?, ?, ?)", staff_table(kind));
    sqlx::query(&sql)
        .bind(staff.id)
        .bind(staff.user_id)
        .bind(&staff.name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn get_staff(conn: &mut SqliteConnection, kind: StaffKind, id: Uuid) -> Result<Option<DbStaff>> {
    let sql = format!("SELECT id, user_id, name FROM {} WHERE id = ?", staff_table(kind));
    let result = sqlx::query_as::<_, DbStaff>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(result)
}

pub async fn get_staff_by_user(conn: &mut SqliteConnection, kind: StaffKind, user_id: Uuid) -> Result<Option<DbStaff>> {
    let sql = format!("SELECT id, user_id, name FROM {} WHERE user_id = ?", staff_table(kind));
    let result = sqlx::query_as::<_, DbStaff>(&sql)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(result)
}

pub async fn update_staff_name(conn: &mut SqliteConnection, kind: StaffKind, id: Uuid, name: &str) -> Result<bool> {
    let sql = format!("UPDATE {} SET name = ? WHERE id = ?", staff_table(kind));
    let result = sqlx::query(&sql)
        .bind(name)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_staff(conn: &mut SqliteConnection, kind: StaffKind, id: Uuid) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?", staff_table(kind));
    let result = sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(result.rows_affected() > 0)
}

/// 医护人员的显示名，经由users表解析
pub async fn staff_display_name(conn: &mut SqliteConnection, kind: StaffKind, id: Uuid) -> Result<Option<String>> {
    let sql = format!(
        "SELECT u.display_name FROM {} s JOIN users u ON u.id = s.user_id WHERE s.id = ?",
        staff_table(kind)
    );
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    Ok(row.map(|row| row.try_get::<String, _>("display_name")).transpose()?)
}

// ========== 分配关系（医护侧集合） ==========

/// 医护侧集合中的患者ID
pub async fn assigned_patient_ids(conn: &mut SqliteConnection, kind: StaffKind, staff_id: Uuid) -> Result<Vec<Uuid>> {
    let sql = format!(
        "SELECT patient_id FROM {} WHERE {} = ?",
        assignment_table(kind),
        assignment_column(kind)
    );
    let rows = sqlx::query(&sql).bind(staff_id).fetch_all(&mut *conn).await?;
    Ok(rows.iter().map(|row| row.try_get::<Uuid, _>("patient_id")).collect::<sqlx::Result<_>>()?)
}

/// 某患者在医护侧集合中的归属
pub async fn assignment_owner(conn: &mut SqliteConnection, kind: StaffKind, patient_id: Uuid) -> Result<Option<Uuid>> {
    let sql = format!(
        "SELECT {col} FROM {} WHERE patient_id = ?",
        assignment_table(kind),
        col = assignment_column(kind)
    );
    let row = sqlx::query(&sql).bind(patient_id).fetch_optional(&mut *conn).await?;
    Ok(row.map(|row| row.try_get::<Uuid, _>(assignment_column(kind))).transpose()?)
}

pub async fn insert_assignment(
    conn: &mut SqliteConnection,
    kind: StaffKind,
    staff_id: Uuid,
    patient_id: Uuid,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (patient_id, {}) VALUES (?, ?)",
        assignment_table(kind),
        assignment_column(kind)
    );
    sqlx::query(&sql)
        .bind(patient_id)
        .bind(staff_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn remove_assignment(conn: &mut SqliteConnection, kind: StaffKind, patient_id: Uuid) -> Result<()> {
    let sql = format!("DELETE FROM {} WHERE patient_id = ?", assignment_table(kind));
    sqlx::query(&sql).bind(patient_id).execute(&mut *conn).await?;
    Ok(())
}

/// 双向不一致的患者ID
pub async fn inconsistent_assignments(conn: &mut SqliteConnection, kind: StaffKind) -> Result<Vec<Uuid>> {
    let sql = format!(
        r#"
        SELECT p.id AS id FROM patients p
        LEFT JOIN {table} a ON a.patient_id = p.id
        WHERE (p.{fk} IS NULL AND a.{col} IS NOT NULL)
           OR (p.{fk} IS NOT NULL AND (a.{col} IS NULL OR a.{col} <> p.{fk}))
        ORDER BY p.name
        "#,
        table = assignment_table(kind),
        fk = patient_fk_column(kind),
        col = assignment_column(kind)
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    Ok(rows.iter().map(|row| row.try_get::<Uuid, _>("id")).collect::<sqlx::Result<_>>()?)
}

// ========== 任务相关操作 ==========

pub async fn insert_task(conn: &mut SqliteConnection, task: &NewTask) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO patient_tasks (id, patient_id, description, cost, task_date, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task.id)
    .bind(task.patient_id)
    .bind(&task.description)
    .bind(task.cost)
    .bind(task.date)
    .bind(task.status.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_task(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<PatientTask>> {
    let result = sqlx::query_as::<_, DbTask>("SELECT * FROM patient_tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    result.map(PatientTask::try_from).transpose()
}

/// 患者的任务，按日期倒序
pub async fn list_tasks_for_patient(conn: &mut SqliteConnection, patient_id: Uuid) -> Result<Vec<PatientTask>> {
    let results = sqlx::query_as::<_, DbTask>(
        "SELECT * FROM patient_tasks WHERE patient_id = ? ORDER BY task_date DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    results.into_iter().map(PatientTask::try_from).collect()
}

pub async fn update_task(
    conn: &mut SqliteConnection,
    id: Uuid,
    description: &str,
    cost: i64,
    status: TaskStatus,
) -> Result<()> {
    sqlx::query("UPDATE patient_tasks SET description = ?, cost = ?, status = ? WHERE id = ?")
        .bind(description)
        .bind(cost)
        .bind(status.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_task(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM patient_tasks WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_tasks_for_patient(conn: &mut SqliteConnection, patient_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM patient_tasks WHERE patient_id = ?")
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// 某医生名下患者的待处理任务数
pub async fn count_pending_tasks_for_doctor(conn: &mut SqliteConnection, doctor_id: Uuid) -> Result<i64> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS pending FROM patient_tasks t
        JOIN patients p ON p.id = t.patient_id
        WHERE p.assigned_doctor_id = ? AND t.status = ?
        "#,
    )
    .bind(doctor_id)
    .bind(TaskStatus::Pending.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.try_get::<i64, _>("pending")?)
}

// ========== 影像相关操作 ==========

pub async fn insert_image(conn: &mut SqliteConnection, image: &NewImage) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO medical_images
            (id, patient_id, storage_path, image_type, uploaded_by_radiologist_id, cost,
             is_classified, uploaded_at, billing_task_id)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(image.id)
    .bind(image.patient_id)
    .bind(&image.storage_path)
    .bind(image.image_type.as_str())
    .bind(image.uploaded_by_radiologist_id)
    .bind(image.cost)
    .bind(image.uploaded_at)
    .bind(image.billing_task_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_image(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<MedicalImage>> {
    let result = sqlx::query_as::<_, DbImage>("SELECT * FROM medical_images WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    result.map(MedicalImage::try_from).transpose()
}

pub async fn get_image_by_billing_task(conn: &mut SqliteConnection, task_id: Uuid) -> Result<Option<MedicalImage>> {
    let result = sqlx::query_as::<_, DbImage>("SELECT * FROM medical_images WHERE billing_task_id = ?")
        .bind(task_id)
        .fetch_optional(&mut *conn)
        .await?;
    result.map(MedicalImage::try_from).transpose()
}

/// 患者的影像，按上传时间倒序
pub async fn list_images_for_patient(conn: &mut SqliteConnection, patient_id: Uuid) -> Result<Vec<MedicalImage>> {
    let results = sqlx::query_as::<_, DbImage>(
        "SELECT * FROM medical_images WHERE patient_id = ? ORDER BY uploaded_at DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    results.into_iter().map(MedicalImage::try_from).collect()
}

pub async fn list_images_by_radiologist(
    conn: &mut SqliteConnection,
    radiologist_id: Uuid,
) -> Result<Vec<MedicalImage>> {
    let results = sqlx::query_as::<_, DbImage>(
        "SELECT * FROM medical_images WHERE uploaded_by_radiologist_id = ? ORDER BY uploaded_at DESC",
    )
    .bind(radiologist_id)
    .fetch_all(&mut *conn)
    .await?;
    results.into_iter().map(MedicalImage::try_from).collect()
}

pub async fn update_image_cost(conn: &mut SqliteConnection, id: Uuid, cost: i64) -> Result<()> {
    sqlx::query("UPDATE medical_images SET cost = ? WHERE id = ?")
        .bind(cost)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn classify_image(
    conn: &mut SqliteConnection,
    id: Uuid,
    disease_category: &str,
    notes: Option<&str>,
    classified_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE medical_images
        SET disease_category = ?, notes = ?, is_classified = 1, classified_at = ?
        WHERE id = ?
        "#,
    )
    .bind(disease_category)
    .bind(notes)
    .bind(classified_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// 放射科医生被删除后，其上传的影像保留但不再有上传者
pub async fn clear_image_uploader(conn: &mut SqliteConnection, radiologist_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE medical_images SET uploaded_by_radiologist_id = NULL WHERE uploaded_by_radiologist_id = ?",
    )
    .bind(radiologist_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_image(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM medical_images WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_images_for_patient(conn: &mut SqliteConnection, patient_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM medical_images WHERE patient_id = ?")
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

// ========== 诊断相关操作 ==========

pub async fn insert_diagnosis(conn: &mut SqliteConnection, diagnosis: &NewDiagnosis) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO diagnoses
            (id, patient_id, diagnosed_by_doctor_id, medical_image_id, disease_type, notes, diagnosed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(diagnosis.id)
    .bind(diagnosis.patient_id)
    .bind(diagnosis.diagnosed_by_doctor_id)
    .bind(diagnosis.medical_image_id)
    .bind(&diagnosis.disease_type)
    .bind(&diagnosis.notes)
    .bind(diagnosis.diagnosed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_diagnoses_for_patient(
    conn: &mut SqliteConnection,
    patient_id: Uuid,
) -> Result<Vec<hms_core::Diagnosis>> {
    let results = sqlx::query_as::<_, DbDiagnosis>(
        "SELECT * FROM diagnoses WHERE patient_id = ? ORDER BY diagnosed_at DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(results.into_iter().map(Into::into).collect())
}

pub async fn list_recent_diagnoses_by_doctor(
    conn: &mut SqliteConnection,
    doctor_id: Uuid,
    limit: i64,
) -> Result<Vec<hms_core::Diagnosis>> {
    let results = sqlx::query_as::<_, DbDiagnosis>(
        "SELECT * FROM diagnoses WHERE diagnosed_by_doctor_id = ? ORDER BY diagnosed_at DESC LIMIT ?",
    )
    .bind(doctor_id)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    Ok(results.into_iter().map(Into::into).collect())
}

pub async fn clear_diagnosis_doctor(conn: &mut SqliteConnection, doctor_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE diagnoses SET diagnosed_by_doctor_id = NULL WHERE diagnosed_by_doctor_id = ?",
    )
    .bind(doctor_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn clear_diagnosis_image(conn: &mut SqliteConnection, image_id: Uuid) -> Result<u64> {
    let result = sqlx::query("UPDATE diagnoses SET medical_image_id = NULL WHERE medical_image_id = ?")
        .bind(image_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_diagnoses_for_patient(conn: &mut SqliteConnection, patient_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM diagnoses WHERE patient_id = ?")
        .bind(patient_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

// ========== 仪表盘投影 ==========

/// 表行数，表名只接受内部常量
pub async fn count_rows(conn: &mut SqliteConnection, table: &'static str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) AS total FROM {}", table);
    let row = sqlx::query(&sql).fetch_one(&mut *conn).await?;
    Ok(row.try_get::<i64, _>("total")?)
}

pub async fn total_system_cost(conn: &mut SqliteConnection) -> Result<i64> {
    let row = sqlx::query("SELECT COALESCE(SUM(total_cost), 0) AS total FROM patients")
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get::<i64, _>("total")?)
}

const PATIENT_SUMMARY_SELECT: &str = r#"
    SELECT p.id AS id, p.name AS name, p.address AS address, p.total_cost AS total_cost,
           du.display_name AS doctor_name, ru.display_name AS radiologist_name,
           (SELECT COUNT(*) FROM medical_images m WHERE m.patient_id = p.id) AS image_count
    FROM patients p
    LEFT JOIN doctors d ON d.id = p.assigned_doctor_id
    LEFT JOIN users du ON du.id = d.user_id
    LEFT JOIN radiologists r ON r.id = p.assigned_radiologist_id
    LEFT JOIN users ru ON ru.id = r.user_id
"#;

pub async fn list_patient_summaries(conn: &mut SqliteConnection) -> Result<Vec<DbPatientSummary>> {
    let sql = format!("{} ORDER BY p.name", PATIENT_SUMMARY_SELECT);
    let results = sqlx::query_as::<_, DbPatientSummary>(&sql)
        .fetch_all(&mut *conn)
        .await?;
    Ok(results)
}

pub async fn list_patient_summaries_for_staff(
    conn: &mut SqliteConnection,
    kind: StaffKind,
    staff_id: Uuid,
) -> Result<Vec<DbPatientSummary>> {
    let sql = format!(
        "{} WHERE p.{} = ? ORDER BY p.name",
        PATIENT_SUMMARY_SELECT,
        patient_fk_column(kind)
    );
    let results = sqlx::query_as::<_, DbPatientSummary>(&sql)
        .bind(staff_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(results)
}

pub async fn get_patient_summary(conn: &mut SqliteConnection, patient_id: Uuid) -> Result<Option<DbPatientSummary>> {
    let sql = format!("{} WHERE p.id = ?", PATIENT_SUMMARY_SELECT);
    let result = sqlx::query_as::<_, DbPatientSummary>(&sql)
        .bind(patient_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(result)
}

pub async fn list_staff_summaries(conn: &mut SqliteConnection, kind: StaffKind) -> Result<Vec<DbStaffSummary>> {
    let sql = format!(
        r#"
        SELECT s.id AS id, u.display_name AS name,
               (SELECT COUNT(*) FROM {assign} a WHERE a.{col} = s.id) AS patient_count
        FROM {table} s
        JOIN users u ON u.id = s.user_id
        ORDER BY u.display_name
        "#,
        assign = assignment_table(kind),
        col = assignment_column(kind),
        table = staff_table(kind)
    );
    let results = sqlx::query_as::<_, DbStaffSummary>(&sql)
        .fetch_all(&mut *conn)
        .await?;
    Ok(results)
}

// ========== 表名映射 ==========

pub fn staff_table(kind: StaffKind) -> &'static str {
    match kind {
        StaffKind::Doctor => "doctors",
        StaffKind::Radiologist => "radiologists",
    }
}

fn assignment_table(kind: StaffKind) -> &'static str {
    match kind {
        StaffKind::Doctor => "doctor_patients",
        StaffKind::Radiologist => "radiologist_patients",
    }
}

fn assignment_column(kind: StaffKind) -> &'static str {
    match kind {
        StaffKind::Doctor => "doctor_id",
        StaffKind::Radiologist => "radiologist_id",
    }
}

fn patient_fk_column(kind: StaffKind) -> &'static str {
    match kind {
        StaffKind::Doctor => "assigned_doctor_id",
        StaffKind::Radiologist => "assigned_radiologist_id",
    }
}
