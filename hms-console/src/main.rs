//! HMS管理控制台

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use hms_admin::{init_logging, ConfigManager, HmsConfig};
use hms_auth::Pbkdf2PasswordHasher;
use hms_core::{AccountProfile, ImageType, NewAccount, StaffRef, TaskStatus};
use hms_database::{DatabasePool, DatabaseSettings};
use hms_storage::LocalImageStore;
use hms_workflow::{DiagnosisRequest, EngineOptions, HospitalEngine, ImageUpload, TaskEdit};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// HMS命令行参数
#[derive(Parser, Debug)]
#[command(name = "hms")]
#[command(about = "医院管理系统：费用账本与分配引擎控制台")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Admin,
    Doctor,
    Radiologist,
    Patient,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StaffType {
    Doctor,
    Radiologist,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 初始化数据库表
    Init,
    /// 创建账号
    CreateAccount {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        display_name: String,
        #[arg(long, value_enum)]
        role: Role,
        /// 患者地址
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        condition: Option<String>,
        #[arg(long)]
        doctor: Option<Uuid>,
        #[arg(long)]
        radiologist: Option<Uuid>,
        /// 医护人员的初始患者
        #[arg(long = "patient")]
        patients: Vec<Uuid>,
    },
    /// 验证用户名和口令
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    AssignDoctor {
        #[arg(long)]
        patient: Uuid,
        #[arg(long)]
        doctor: Uuid,
    },
    AssignRadiologist {
        #[arg(long)]
        patient: Uuid,
        #[arg(long)]
        radiologist: Uuid,
    },
    UnassignDoctor {
        #[arg(long)]
        patient: Uuid,
    },
    UnassignRadiologist {
        #[arg(long)]
        patient: Uuid,
    },
    /// 删除医护人员并解除其全部分配
    RemoveStaff {
        #[arg(value_enum)]
        kind: StaffType,
        id: Uuid,
    },
    DeleteUser {
        #[arg(long)]
        user: Uuid,
    },
    AddTask {
        #[arg(long)]
        patient: Uuid,
        #[arg(long)]
        description: String,
        /// 费用（分）
        #[arg(long)]
        cost: i64,
        /// RFC 3339 日期，默认当前时间
        #[arg(long)]
        date: Option<DateTime<Utc>>,
    },
    EditTask {
        #[arg(long)]
        task: Uuid,
        #[arg(long)]
        description: String,
        #[arg(long)]
        cost: i64,
        #[arg(long)]
        status: TaskStatus,
    },
    DeleteTask {
        #[arg(long)]
        task: Uuid,
    },
    UploadImage {
        #[arg(long)]
        patient: Uuid,
        #[arg(long)]
        radiologist: Uuid,
        #[arg(long)]
        image_type: ImageType,
        #[arg(long)]
        cost: i64,
        #[arg(long)]
        file: PathBuf,
    },
    DeleteImage {
        #[arg(long)]
        image: Uuid,
        #[arg(long)]
        radiologist: Uuid,
    },
    Diagnose {
        #[arg(long)]
        patient: Uuid,
        #[arg(long)]
        doctor: Uuid,
        #[arg(long)]
        disease: String,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long)]
        image: Option<Uuid>,
    },
    ClassifyImage {
        #[arg(long)]
        image: Uuid,
        #[arg(long)]
        category: String,
        #[arg(long)]
        notes: Option<String>,
    },
    UpdateCondition {
        #[arg(long)]
        patient: Uuid,
        #[arg(long)]
        condition: String,
    },
    /// 从任务和影像重算总费用
    Recompute {
        #[arg(long)]
        patient: Uuid,
    },
    #[command(subcommand)]
    Dashboard(DashboardCommand),
    Report {
        #[arg(long)]
        patient: Uuid,
    },
    Stats,
    /// 检查分配关系两侧是否一致
    VerifyAssignments,
}

#[derive(Subcommand, Debug)]
enum DashboardCommand {
    Admin,
    Doctor { id: Uuid },
    Radiologist { id: Uuid },
    Patient { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(args.config.as_deref()).context("Failed to load configuration")?;
    let mut config = manager.get_config().await;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging)?;

    let engine = build_engine(&config).await?;

    if let Err(e) = run(&engine, &config, args.command).await {
        error!("命令执行失败: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn build_engine(config: &HmsConfig) -> Result<HospitalEngine> {
    let settings = DatabaseSettings {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        busy_timeout: Duration::from_secs(config.database.busy_timeout_secs),
    };
    let db = DatabasePool::connect(&settings)
        .await
        .context("Failed to connect to database")?;
    db.create_tables().await.context("Failed to create tables")?;

    let store = Arc::new(LocalImageStore::new(&config.storage.root_path));
    let hasher = Arc::new(Pbkdf2PasswordHasher::new(config.security.pbkdf2_iterations));
    let options = EngineOptions {
        recent_diagnoses_limit: config.dashboard.recent_diagnoses_limit,
    };

    Ok(HospitalEngine::new(db, store, hasher, options)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(engine: &HospitalEngine, config: &HmsConfig, command: Command) -> Result<()> {
    match command {
        Command::Init => {
            info!("数据库已初始化: {}", config.database.url);
            print_json(&serde_json::json!({
                "database": config.database.url,
                "storage": config.storage.root_path,
            }))
        }
        Command::CreateAccount {
            username,
            password,
            display_name,
            role,
            address,
            condition,
            doctor,
            radiologist,
            patients,
        } => {
            let profile = match role {
                Role::Admin => AccountProfile::Admin,
                Role::Doctor => AccountProfile::Doctor { patient_ids: patients },
                Role::Radiologist => AccountProfile::Radiologist { patient_ids: patients },
                Role::Patient => AccountProfile::Patient {
                    address: address.unwrap_or_default(),
                    current_condition: condition,
                    doctor_id: doctor,
                    radiologist_id: radiologist,
                },
            };
            let entity = engine
                .create_account(NewAccount {
                    username,
                    password,
                    display_name,
                    profile,
                })
                .await?;
            print_json(&entity)
        }
        Command::Login { username, password } => {
            print_json(&engine.authenticate(&username, &password).await?)
        }
        Command::AssignDoctor { patient, doctor } => {
            engine.assign_doctor(patient, doctor).await?;
            print_json(&engine.patient_report(patient).await?)
        }
        Command::AssignRadiologist { patient, radiologist } => {
            engine.assign_radiologist(patient, radiologist).await?;
            print_json(&engine.patient_report(patient).await?)
        }
        Command::UnassignDoctor { patient } => {
            print_json(&serde_json::json!({ "previous": engine.unassign_doctor(patient).await? }))
        }
        Command::UnassignRadiologist { patient } => {
            print_json(&serde_json::json!({ "previous": engine.unassign_radiologist(patient).await? }))
        }
        Command::RemoveStaff { kind, id } => {
            let staff = match kind {
                StaffType::Doctor => StaffRef::Doctor(id),
                StaffType::Radiologist => StaffRef::Radiologist(id),
            };
            let released = engine.remove_staff(staff).await?;
            print_json(&serde_json::json!({ "released_patients": released }))
        }
        Command::DeleteUser { user } => {
            engine.delete_user(user).await?;
            print_json(&serde_json::json!({ "deleted": user }))
        }
        Command::AddTask {
            patient,
            description,
            cost,
            date,
        } => {
            let task = engine
                .add_task(patient, &description, cost, date.unwrap_or_else(Utc::now))
                .await?;
            print_json(&task)
        }
        Command::EditTask {
            task,
            description,
            cost,
            status,
        } => {
            let updated = engine
                .edit_task(
                    task,
                    TaskEdit {
                        description,
                        cost,
                        status,
                    },
                )
                .await?;
            print_json(&updated)
        }
        Command::DeleteTask { task } => print_json(&engine.delete_task(task).await?),
        Command::UploadImage {
            patient,
            radiologist,
            image_type,
            cost,
            file,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let image = engine
                .upload_image(ImageUpload {
                    patient_id: patient,
                    radiologist_id: radiologist,
                    image_type,
                    cost,
                    file_name,
                    data,
                })
                .await?;
            print_json(&image)
        }
        Command::DeleteImage { image, radiologist } => {
            let total = engine.delete_image(image, radiologist).await?;
            print_json(&serde_json::json!({ "deleted": image, "total_cost": total }))
        }
        Command::Diagnose {
            patient,
            doctor,
            disease,
            notes,
            image,
        } => {
            let diagnosis = engine
                .record_diagnosis(DiagnosisRequest {
                    patient_id: patient,
                    doctor_id: doctor,
                    disease_type: disease,
                    notes,
                    medical_image_id: image,
                })
                .await?;
            print_json(&diagnosis)
        }
        Command::ClassifyImage { image, category, notes } => {
            print_json(&engine.classify_image(image, &category, notes.as_deref()).await?)
        }
        Command::UpdateCondition { patient, condition } => {
            print_json(&engine.update_patient_condition(patient, &condition).await?)
        }
        Command::Recompute { patient } => {
            let total = engine.recompute(patient).await?;
            print_json(&serde_json::json!({ "patient": patient, "total_cost": total }))
        }
        Command::Dashboard(view) => match view {
            DashboardCommand::Admin => print_json(&engine.admin_dashboard().await?),
            DashboardCommand::Doctor { id } => print_json(&engine.doctor_dashboard(id).await?),
            DashboardCommand::Radiologist { id } => print_json(&engine.radiologist_dashboard(id).await?),
            DashboardCommand::Patient { id } => print_json(&engine.patient_dashboard(id).await?),
        },
        Command::Report { patient } => print_json(&engine.patient_report(patient).await?),
        Command::Stats => print_json(&engine.system_stats().await?),
        Command::VerifyAssignments => {
            let report = engine.verify_assignments().await?;
            print_json(&report)?;
            if !report.is_consistent() {
                anyhow::bail!("assignment registry is inconsistent");
            }
            Ok(())
        }
    }
}
