//! 费用账本
//!
//! 维护患者 `total_cost` 字段。日常变更使用增量更新，`recompute` 从任务和影像重新汇总，
//! 两者结果一致：带计费任务的影像费用只通过计费任务计入一次。

use hms_core::utils::clamp_total;
use hms_core::{HmsError, Result};
use hms_database::{queries, DatabasePool, SqliteConnection};
use tracing::{debug, info};
use uuid::Uuid;

/// 费用账本
#[derive(Clone)]
pub struct CostLedger {
    db: DatabasePool,
}

impl CostLedger {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// 从未取消任务和未计费影像重新计算总费用
    pub async fn recompute(&self, patient_id: Uuid) -> Result<i64> {
        let mut tx = self.db.begin_write().await?;
        let total = recompute_in(&mut tx, patient_id).await?;
        tx.commit().await?;

        info!(patient_id = %patient_id, total_cost = total, "Recomputed patient ledger");
        Ok(total)
    }

    /// 按增量调整总费用，结果不低于零
    pub async fn apply_delta(&self, patient_id: Uuid, delta: i64) -> Result<i64> {
        let mut tx = self.db.begin_write().await?;
        let total = apply_delta_in(&mut tx, patient_id, delta).await?;
        tx.commit().await?;
        Ok(total)
    }

    pub async fn total_cost(&self, patient_id: Uuid) -> Result<i64> {
        let mut conn = self.db.acquire().await?;
        queries::get_total_cost(&mut conn, patient_id)
            .await?
            .ok_or(HmsError::PatientNotFound(patient_id))
    }
}

/// 在调用方事务内重算
pub async fn recompute_in(conn: &mut SqliteConnection, patient_id: Uuid) -> Result<i64> {
    if queries::get_total_cost(&mut *conn, patient_id).await?.is_none() {
        return Err(HmsError::PatientNotFound(patient_id));
    }

    let total = clamp_total(queries::sum_billable_costs(&mut *conn, patient_id).await?);
    queries::set_total_cost(&mut *conn, patient_id, total).await?;
    Ok(total)
}

/// 在调用方写事务内应用增量，溢出时返回验证错误
pub async fn apply_delta_in(conn: &mut SqliteConnection, patient_id: Uuid, delta: i64) -> Result<i64> {
    let total = queries::adjust_total_cost(&mut *conn, patient_id, delta)
        .await?
        .ok_or(HmsError::PatientNotFound(patient_id))?;

    debug!(patient_id = %patient_id, delta, total_cost = total, "Applied ledger delta");
    Ok(total)
}
