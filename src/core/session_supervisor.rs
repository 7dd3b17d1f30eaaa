//! 会话监管：按会话串行化回合、管理取消令牌
//!
//! 同一会话的回合排队执行（每会话一把异步互斥锁），不同会话互不阻塞；
//! 每个进行中的回合持有一个子取消令牌，cancel(session) 只取消该会话的当前回合，
//! shutdown() 取消全部。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    root: CancellationToken,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    active: Mutex<HashMap<String, CancellationToken>>,
}

/// 回合许可：持有期间同一会话的其他回合等待
#[derive(Debug)]
pub struct TurnPermit {
    _guard: OwnedMutexGuard<()>,
    token: CancellationToken,
}

impl TurnPermit {
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            locks: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// 等待轮到该会话，返回回合许可
    pub async fn begin_turn(&self, session_id: &str) -> TurnPermit {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        let token = self.root.child_token();
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(session_id.to_string(), token.clone());
        TurnPermit {
            _guard: guard,
            token,
        }
    }

    /// 取消该会话正在进行的回合；没有进行中的回合时返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        match active.get(session_id) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// 取消所有会话的回合
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// 忘掉会话的锁与令牌（会话清理时调用）
    pub fn forget(&self, session_id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(session_id);
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(session_id);
    }

    /// 仍持有锁或令牌的会话数
    pub fn tracked_sessions(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        let only_active = active.keys().filter(|k| !locks.contains_key(*k)).count();
        locks.len() + only_active
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
