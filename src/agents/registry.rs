//! Agent 注册表：角色 → Agent 实例
//!
//! 读写锁保护；注册与查找并发安全，查找到的 Agent 以 Arc 返回，不持锁调用。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::agents::{Agent, AgentDescriptor};
use crate::core::AgentRole;

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentRole, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（同角色覆盖），返回被替换的旧实例
    pub fn register(&self, role: AgentRole, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        tracing::debug!(role = %role, "agent registered");
        match self.agents.write() {
            Ok(mut map) => map.insert(role, agent),
            Err(poisoned) => poisoned.into_inner().insert(role, agent),
        }
    }

    pub fn unregister(&self, role: &AgentRole) -> Option<Arc<dyn Agent>> {
        match self.agents.write() {
            Ok(mut map) => map.remove(role),
            Err(poisoned) => poisoned.into_inner().remove(role),
        }
    }

    pub fn lookup(&self, role: &AgentRole) -> Option<Arc<dyn Agent>> {
        match self.agents.read() {
            Ok(map) => map.get(role).cloned(),
            Err(poisoned) => poisoned.into_inner().get(role).cloned(),
        }
    }

    pub fn contains(&self, role: &AgentRole) -> bool {
        self.lookup(role).is_some()
    }

    /// 按角色名排序的描述列表（shell `agents` 命令）
    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        let agents: Vec<Arc<dyn Agent>> = match self.agents.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        let mut out: Vec<AgentDescriptor> = agents.iter().map(|a| a.describe()).collect();
        out.sort_by(|a, b| a.role.as_str().cmp(b.role.as_str()));
        out
    }

    pub fn len(&self) -> usize {
        match self.agents.read() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{GeneralAgent, ReconAgent};

    #[test]
    fn test_register_lookup_replace() {
        let reg = AgentRegistry::new();
        assert!(reg.lookup(&AgentRole::Recon).is_none());
        assert!(reg.register(AgentRole::Recon, Arc::new(ReconAgent::new(true))).is_none());
        assert!(reg.register(AgentRole::Recon, Arc::new(ReconAgent::new(false))).is_some());
        assert_eq!(reg.len(), 1);
        assert!(reg.contains(&AgentRole::Recon));
        assert!(reg.unregister(&AgentRole::Recon).is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_descriptors_sorted() {
        let reg = AgentRegistry::new();
        reg.register(AgentRole::Recon, Arc::new(ReconAgent::new(true)));
        reg.register(AgentRole::General, Arc::new(GeneralAgent::new(true)));
        let names: Vec<String> = reg.descriptors().into_iter().map(|d| d.role.to_string()).collect();
        assert_eq!(names, vec!["general", "recon"]);
    }
}
