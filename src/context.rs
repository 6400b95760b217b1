use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{FsError, Result, StoreError};

/// 单个请求的上下文：取消令牌和可选的超时
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    timeout: Option<Duration>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// 派生子上下文，父上下文取消时子上下文随之取消
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            timeout: self.timeout,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 执行一次存储调用。取消或超时时丢弃该 future，存储调用随之中止。
    pub async fn run<T, F>(&self, op: &'static str, name: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        if self.token.is_cancelled() {
            return Err(FsError::Cancelled {
                op,
                name: name.to_string(),
            });
        }

        let guarded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(res) => Ok(res),
                    Err(_) => {
                        debug!("{} {:?}: deadline of {:?} exceeded", op, name, limit);
                        Err(FsError::TimedOut {
                            op,
                            name: name.to_string(),
                        })
                    }
                },
                None => Ok(fut.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!("{} {:?}: cancelled", op, name);
                Err(FsError::Cancelled { op, name: name.to_string() })
            }
            res = guarded => res?.map_err(|e| FsError::from_store(op, name, e)),
        }
    }
}
