// rust_websocket_session/src/scope.rs

//! 连接作用域：一代连接（或一个服务端会话）拥有的一组可取消后台任务。
//!
//! 每次连接成功都会创建一个新的作用域；取消只影响该作用域内的任务，
//! 绝不会波及之后重连产生的新一代任务。

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 取消令牌 + 任务跟踪器。
#[derive(Debug, Clone, Default)]
pub struct ConnectionScope {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectionScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在作用域内派生一个任务；作用域被取消时任务在下一个挂起点退出。
    ///
    /// 作用域取消后再派生的任务会立即结束。
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = task => {}
            }
        });
    }

    /// 取消作用域内的全部任务，并不再接受新任务。
    pub fn cancel(&self) {
        self.token.cancel();
        self.tracker.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待作用域被取消。
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// 等待作用域内所有任务结束。只有在 `cancel` 之后调用才会返回。
    ///
    /// 不要在作用域自己的任务里调用，否则会等待自身。
    pub async fn wait(&self) {
        self.tracker.wait().await
    }

    /// 当前仍在运行的任务数。
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }
}
