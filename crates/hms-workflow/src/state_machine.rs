//! 任务状态机
//!
//! 管理患者任务的生命周期状态转换

use hms_core::{HmsError, Result, TaskStatus};
use std::collections::HashSet;

/// 任务状态机
#[derive(Debug)]
pub struct TaskStateMachine {
    transitions: HashSet<(TaskStatus, TaskStatus)>,
}

impl TaskStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashSet::new();

        // 定义状态转换规则
        transitions.insert((TaskStatus::Pending, TaskStatus::InProgress));
        transitions.insert((TaskStatus::InProgress, TaskStatus::Completed));
        transitions.insert((TaskStatus::Pending, TaskStatus::Cancelled));
        transitions.insert((TaskStatus::InProgress, TaskStatus::Cancelled));

        Self { transitions }
    }

    /// 检查状态转换是否有效，保持原状态总是允许
    pub fn can_transition(&self, from: TaskStatus, to: TaskStatus) -> bool {
        from == to || self.transitions.contains(&(from, to))
    }

    /// 执行状态转换
    pub fn transition(&self, from: TaskStatus, to: TaskStatus) -> Result<TaskStatus> {
        if self.can_transition(from, to) {
            Ok(to)
        } else {
            Err(HmsError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// 获取所有可能的状态
    pub fn get_all_states() -> Vec<TaskStatus> {
        vec![
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ]
    }

    /// 获取状态的所有后继状态
    pub fn get_possible_targets(&self, current_state: TaskStatus) -> Vec<TaskStatus> {
        let mut targets: Vec<TaskStatus> = self
            .transitions
            .iter()
            .filter(|(state, _)| *state == current_state)
            .map(|(_, to)| *to)
            .collect();
        targets.sort_by_key(|status| status.as_str());
        targets
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
