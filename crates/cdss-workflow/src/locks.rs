//! 文档级处理锁
//!
//! 同一文档同一时刻只允许一个变更阶段运行，并发的重复请求立即以 `Conflict` 拒绝

use cdss_core::{CdssError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// 正在处理中的文档集合
#[derive(Debug, Default, Clone)]
pub struct DocumentLocks {
    active: Arc<Mutex<HashSet<Uuid>>>,
}

/// 持有期间文档处于锁定状态，释放时自动解锁
#[derive(Debug)]
pub struct DocumentGuard {
    document_id: Uuid,
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试锁定文档，已被占用时返回 `Conflict`
    pub fn try_acquire(&self, document_id: Uuid) -> Result<DocumentGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(document_id) {
            tracing::warn!("Rejected concurrent pipeline run for document {}", document_id);
            return Err(CdssError::Conflict(format!("文档 {} 正在处理中", document_id)));
        }

        Ok(DocumentGuard {
            document_id,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_locked(&self, document_id: Uuid) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&document_id)
    }
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.document_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_conflicts_until_release() {
        let locks = DocumentLocks::new();
        let document = Uuid::new_v4();

        let guard = locks.try_acquire(document).unwrap();
        assert!(locks.is_locked(document));
        assert!(matches!(locks.try_acquire(document), Err(CdssError::Conflict(_))));

        // 其他文档不受影响
        assert!(locks.try_acquire(Uuid::new_v4()).is_ok());

        drop(guard);
        assert!(!locks.is_locked(document));
        assert!(locks.try_acquire(document).is_ok());
    }
}
