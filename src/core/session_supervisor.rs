//! 会话监管：请求级取消
//!
//! 每个进行中的请求持有根 token 的一个子 token；取消单个请求只影响它自己，
//! 取消根 token（Ctrl+C / 关闭）会级联到全部请求。

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::core::{OrchestratorError, RequestId};

#[derive(Debug)]
pub struct SessionSupervisor {
    root: CancellationToken,
    active: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::with_root(CancellationToken::new())
    }

    /// 以外部 token（如关闭信号）为根
    pub fn with_root(root: CancellationToken) -> Self {
        Self {
            root,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// 为请求登记一个子 token；同一 ID 仍在进行中时拒绝
    pub fn begin(&self, request_id: &RequestId) -> Result<CancellationToken, OrchestratorError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.entry(request_id.clone()) {
            Entry::Occupied(_) => Err(OrchestratorError::DuplicateRequest(request_id.to_string())),
            Entry::Vacant(slot) => Ok(slot.insert(self.root.child_token()).clone()),
        }
    }

    /// 请求结束后移除登记
    pub fn finish(&self, request_id: &RequestId) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(request_id);
    }

    /// 取消单个请求；请求不存在（已结束）返回 false
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(request_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(request_id = %request_id, "request cancelled");
                true
            }
            None => false,
        }
    }

    /// 取消全部进行中的请求，返回被取消的数量；根 token 不受影响
    pub fn cancel_all(&self) -> usize {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        for token in active.values() {
            token.cancel();
        }
        if !active.is_empty() {
            tracing::info!(count = active.len(), "cancelled all in-flight requests");
        }
        active.len()
    }

    pub fn active_requests(&self) -> Vec<RequestId> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.keys().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_single_request() {
        let sup = SessionSupervisor::new();
        let a = RequestId::new();
        let b = RequestId::new();
        let ta = sup.begin(&a).unwrap();
        let tb = sup.begin(&b).unwrap();
        assert!(sup.cancel(&a));
        assert!(ta.is_cancelled());
        assert!(!tb.is_cancelled());
        sup.finish(&a);
        assert!(!sup.cancel(&a));
        assert_eq!(sup.active_count(), 1);
    }

    #[test]
    fn test_root_cascades() {
        let root = CancellationToken::new();
        let sup = SessionSupervisor::with_root(root.clone());
        let t = sup.begin(&RequestId::new()).unwrap();
        root.cancel();
        assert!(t.is_cancelled());
    }

    #[test]
    fn test_cancel_all_keeps_root() {
        let sup = SessionSupervisor::new();
        let t1 = sup.begin(&RequestId::new()).unwrap();
        let t2 = sup.begin(&RequestId::new()).unwrap();
        assert_eq!(sup.cancel_all(), 2);
        assert!(t1.is_cancelled() && t2.is_cancelled());
        assert!(!sup.root_token().is_cancelled());
    }

    #[test]
    fn test_active_id_cannot_be_reused() {
        let sup = SessionSupervisor::new();
        let id = RequestId::from("req_same");
        let first = sup.begin(&id).unwrap();
        let err = sup.begin(&id).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateRequest(_)));

        // 被拒绝的一方不影响原请求的登记
        assert!(sup.cancel(&id));
        assert!(first.is_cancelled());
        sup.finish(&id);
        assert!(sup.begin(&id).is_ok());
    }
}
