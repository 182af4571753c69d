//! 静态依赖表：消费方角色依赖同一请求中**更早**出现的生产方角色任务

use crate::core::{AgentRole, Task};

/// role 消费哪些角色的输出
pub fn upstream_roles(role: &AgentRole) -> &'static [AgentRole] {
    match role {
        AgentRole::Report => &[
            AgentRole::Recon,
            AgentRole::Exploit,
            AgentRole::Chain,
            AgentRole::Pattern,
            AgentRole::Bypass,
            AgentRole::General,
        ],
        AgentRole::Chain => &[AgentRole::Recon, AgentRole::Pattern],
        AgentRole::Exploit | AgentRole::Bypass => &[AgentRole::Recon],
        _ => &[],
    }
}

/// 按表给任务列表补依赖边（只指向更早的任务，不会成环）
pub fn infer_dependencies(tasks: &mut [Task]) {
    for i in 0..tasks.len() {
        let upstream = upstream_roles(&tasks[i].role);
        if upstream.is_empty() {
            continue;
        }
        let deps: Vec<_> = tasks[..i]
            .iter()
            .filter(|t| upstream.contains(&t.role))
            .map(|t| t.id.clone())
            .collect();
        for dep in deps {
            if !tasks[i].depends_on.contains(&dep) {
                tasks[i].depends_on.push(dep);
            }
        }
    }
}
