//! # HMS工作流模块
//!
//! 医院管理的核心业务逻辑，包括：
//! - 费用账本：维护患者总费用，增量更新与重算结果一致
//! - 分配登记簿：患者与医生、放射科医生的双向关系
//! - 任务与影像生命周期：任务状态机、影像上传删除与计费
//! - 临床记录和账号管理
//! - 仪表盘：各角色的只读视图

pub mod accounts;
pub mod assignment;
pub mod clinical;
pub mod dashboard;
pub mod engine;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod state_machine;

#[cfg(test)]
mod test_support;

// 重新导出主要类型
pub use accounts::{AccountService, PatientProfileEdit};
pub use assignment::{AssignmentRegistry, AssignmentReport};
pub use clinical::{ClinicalRecords, DiagnosisRequest};
pub use dashboard::{
    AdminDashboard, DashboardAggregator, DoctorDashboard, PatientDashboard, PatientReport, PatientSummary,
    RadiologistDashboard, StaffSummary, SystemStats, DEFAULT_RECENT_DIAGNOSES,
};
pub use engine::{EngineOptions, HospitalEngine};
pub use ledger::CostLedger;
pub use lifecycle::{ImageUpload, TaskEdit, TaskLifecycle, TaskRemoval};
pub use metrics::EngineMetrics;
pub use state_machine::TaskStateMachine;
